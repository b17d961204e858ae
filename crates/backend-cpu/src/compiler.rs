//! Front end for OpenCL C text on the host device.
//!
//! The host device does not generate code: every entry point it can run has
//! a native implementation. Building a program still checks the source the
//! way a driver front end would reject it (unbalanced delimiters, `#error`
//! directives, duplicate kernels) and records the kernels it declares, so a
//! malformed source fails with a compiler-style log and only declared
//! kernels resolve.

use memwall_device::{ProbeError, Result};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProgram {
    entry_points: Vec<String>,
    options: String,
}

impl HostProgram {
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn declares(&self, name: &str) -> bool {
        self.entry_points.iter().any(|entry| entry == name)
    }
}

pub fn compile(sources: &[&str], options: &str) -> Result<HostProgram> {
    let mut log = String::new();
    let mut entry_points: Vec<String> = Vec::new();

    for (index, source) in sources.iter().enumerate() {
        let origin = format!("<source-{}>", index + 1);
        let code = strip_comments(source);
        check_directives(&origin, &code, &mut log);
        check_balance(&origin, &code, &mut log);
        for (line, name) in declared_kernels(&code) {
            if entry_points.contains(&name) {
                let _ = writeln!(log, "{origin}:{line}: error: redefinition of kernel '{name}'");
            } else {
                entry_points.push(name);
            }
        }
    }

    if !log.is_empty() {
        return Err(ProbeError::Build { log });
    }
    Ok(HostProgram {
        entry_points,
        options: options.trim().to_string(),
    })
}

/// Replace comments with spaces, keeping line breaks so positions survive.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = ' ';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn check_directives(origin: &str, code: &str, log: &mut String) {
    for (number, line) in code.lines().enumerate() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix('#') {
            if let Some(message) = rest.trim_start().strip_prefix("error") {
                let _ = writeln!(log, "{origin}:{}: error: {}", number + 1, message.trim());
            }
        }
    }
}

fn check_balance(origin: &str, code: &str, log: &mut String) {
    let mut open: Vec<(char, usize, usize)> = Vec::new();
    for (number, line) in code.lines().enumerate() {
        for (column, c) in line.chars().enumerate() {
            let expected = match c {
                '{' | '(' | '[' => {
                    open.push((c, number + 1, column + 1));
                    continue;
                }
                '}' => '{',
                ')' => '(',
                ']' => '[',
                _ => continue,
            };
            match open.pop() {
                Some((found, _, _)) if found == expected => {}
                _ => {
                    let _ = writeln!(
                        log,
                        "{origin}:{}:{}: error: unexpected '{c}'",
                        number + 1,
                        column + 1
                    );
                    return;
                }
            }
        }
    }
    if let Some((c, line, column)) = open.pop() {
        let _ = writeln!(log, "{origin}:{line}:{column}: error: '{c}' is never closed");
    }
}

/// `(line, name)` of every `__kernel void name(` declaration.
fn declared_kernels(code: &str) -> Vec<(usize, String)> {
    let mut tokens: Vec<(usize, String)> = Vec::new();
    for (number, line) in code.lines().enumerate() {
        let mut current = String::new();
        for c in line.chars().chain(std::iter::once(' ')) {
            if c.is_ascii_alphanumeric() || c == '_' {
                current.push(c);
                continue;
            }
            if !current.is_empty() {
                tokens.push((number + 1, std::mem::take(&mut current)));
            }
            if c == '(' {
                tokens.push((number + 1, "(".to_string()));
            }
        }
    }

    tokens
        .windows(4)
        .filter(|window| {
            matches!(window[0].1.as_str(), "__kernel" | "kernel")
                && window[1].1 == "void"
                && window[3].1 == "("
        })
        .map(|window| (window[2].0, window[2].1.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_kernels_become_entry_points() {
        let program = compile(
            &[
                "__kernel void first(__global float* a) { a[0] = 1.0f; }",
                "// __kernel void commented(int x) {}\nkernel void\nsecond(int n) {}",
            ],
            "-DTILE_SIZE=16 ",
        )
        .unwrap();
        assert_eq!(program.entry_points(), ["first", "second"]);
        assert_eq!(program.options(), "-DTILE_SIZE=16");
        assert!(!program.declares("commented"));
    }

    #[test]
    fn unbalanced_source_fails_with_a_positioned_log() {
        let err = compile(&["__kernel void broken(int n) {\n  if (n) {\n}\n"], "").unwrap_err();
        match err {
            ProbeError::Build { log } => {
                assert!(log.contains("<source-1>:1:29: error: '{' is never closed"), "{log}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn error_directive_is_reported() {
        let err = compile(&["#error TILE_SIZE must be set\n"], "").unwrap_err();
        assert!(err.to_string().contains("error: TILE_SIZE must be set"));
    }

    #[test]
    fn duplicate_kernels_are_rejected() {
        let source = "__kernel void twice(int n) {}";
        let err = compile(&[source, source], "").unwrap_err();
        assert!(err.to_string().contains("redefinition of kernel 'twice'"));
    }
}
