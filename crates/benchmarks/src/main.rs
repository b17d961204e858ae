//! Benchmark executable for memwall.

use anyhow::Result;
use clap::Parser;
use memwall_harness::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn suite_subcommands_parse() {
        for suite in ["memory", "matmul", "reduce", "vec-add", "info"] {
            assert!(Cli::try_parse_from(["memwall", suite]).is_ok(), "{suite}");
        }
    }
}
