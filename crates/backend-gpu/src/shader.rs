//! WGSL source preparation.
//!
//! Build options arrive in the same `-DNAME=VALUE` form the OpenCL backend
//! passes to its compiler. WGSL has no preprocessor, so each define becomes a
//! module-scope constant prepended to the sources; other flags are ignored.

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Define {
    pub name: String,
    pub value: String,
}

pub fn parse_defines(options: &str) -> Vec<Define> {
    let mut defines = Vec::new();
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        let body = match token {
            "-D" => match tokens.next() {
                Some(next) => next,
                None => break,
            },
            _ => match token.strip_prefix("-D") {
                Some(body) => body,
                None => {
                    debug!(flag = token, "ignoring build flag with no WGSL equivalent");
                    continue;
                }
            },
        };
        let (name, value) = body.split_once('=').unwrap_or((body, "1"));
        if !name.is_empty() {
            defines.push(Define {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }
    defines
}

/// `const NAME: u32 = Vu;` for integers, `f32` for anything with a decimal
/// point, and the value verbatim otherwise.
pub fn prelude(defines: &[Define]) -> String {
    defines
        .iter()
        .map(|define| {
            let value = define.value.as_str();
            if value.parse::<u32>().is_ok() {
                format!("const {}: u32 = {}u;\n", define.name, value)
            } else if value.contains('.') && value.parse::<f32>().is_ok() {
                format!("const {}: f32 = {};\n", define.name, value)
            } else {
                format!("const {} = {};\n", define.name, value)
            }
        })
        .collect()
}

pub fn assemble(sources: &[&str], options: &str) -> String {
    let mut text = prelude(&parse_defines(options));
    for source in sources {
        text.push('\n');
        text.push_str(source);
    }
    text
}

/// Names of the `@compute` entry points declared in `source`.
pub fn compute_entry_points(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = source;
    while let Some(at) = rest.find("@compute") {
        rest = &rest[at + "@compute".len()..];
        let Some(fn_at) = rest.find("fn ") else {
            break;
        };
        let after = rest[fn_at + 3..].trim_start();
        let name: String = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            names.push(name);
        }
        rest = &rest[fn_at + 3..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_become_typed_constants() {
        let defines = parse_defines("-DTILE_SIZE=16 -cl-std=CL2.0 -D WPT=4 -DSCALE=0.5 -DFAST");
        let names: Vec<_> = defines.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["TILE_SIZE", "WPT", "SCALE", "FAST"]);

        let text = prelude(&defines);
        assert!(text.contains("const TILE_SIZE: u32 = 16u;"));
        assert!(text.contains("const SCALE: f32 = 0.5;"));
        assert!(text.contains("const FAST: u32 = 1u;"));
    }

    #[test]
    fn entry_points_are_found_across_attributes() {
        let source = "@compute @workgroup_size(TILE_SIZE, TILE_SIZE)\nfn naive_matmul(@builtin(global_invocation_id) gid: vec3<u32>) {}\n\
                      fn helper() {}\n@compute @workgroup_size(64)\nfn  second() {}";
        assert_eq!(compute_entry_points(source), ["naive_matmul", "second"]);
    }

    #[test]
    fn prelude_precedes_sources() {
        let text = assemble(&["fn a() {}", "fn b() {}"], "-DLOCAL_SIZE=256");
        assert!(text.starts_with("const LOCAL_SIZE: u32 = 256u;"));
        assert!(text.find("fn a").unwrap() < text.find("fn b").unwrap());
    }
}
