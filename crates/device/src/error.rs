//! Error taxonomy shared by every memwall crate.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

/// Coarse classification used for exit codes and run-state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Build,
    Resource,
    Io,
    Timeout,
    Device,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no compute platform found")]
    NoPlatformFound,

    #[error("no {class} device found on platform '{platform}'")]
    NoDeviceFound { platform: String, class: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The compiler log is kept verbatim; it is the only debugging aid for a
    /// malformed kernel.
    #[error("kernel build failed:\n{log}")]
    Build { log: String },

    #[error("kernel entry point '{name}' not found in program")]
    KernelNotFound { name: String },

    #[error("resource error{}: {detail}", case.as_ref().map(|c| format!(" in case {c}")).unwrap_or_default())]
    Resource { case: Option<String>, detail: String },

    #[error("kernel source '{name}' not found (looked in {location})")]
    FileNotFound { name: String, location: String },

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} did not complete within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("device call {operation} failed: {detail}")]
    Device { operation: String, detail: String },
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::NoPlatformFound
            | ProbeError::NoDeviceFound { .. }
            | ProbeError::InvalidConfig(_) => ErrorKind::Configuration,
            ProbeError::Build { .. } | ProbeError::KernelNotFound { .. } => ErrorKind::Build,
            ProbeError::Resource { .. } => ErrorKind::Resource,
            ProbeError::FileNotFound { .. } | ProbeError::Io { .. } => ErrorKind::Io,
            ProbeError::Timeout { .. } => ErrorKind::Timeout,
            ProbeError::Device { .. } => ErrorKind::Device,
        }
    }

    pub fn resource(detail: impl Into<String>) -> Self {
        ProbeError::Resource {
            case: None,
            detail: detail.into(),
        }
    }

    pub fn device(operation: impl Into<String>, detail: impl ToString) -> Self {
        ProbeError::Device {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProbeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the case label to a resource error; other kinds pass through.
    pub fn with_case(self, label: impl Into<String>) -> Self {
        match self {
            ProbeError::Resource { case: None, detail } => ProbeError::Resource {
                case: Some(label.into()),
                detail,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_error_names_the_case() {
        let err = ProbeError::resource("buffer of 8 GiB exceeds max allocation").with_case("N=4096");
        assert_eq!(err.kind(), ErrorKind::Resource);
        let message = err.to_string();
        assert!(message.contains("in case N=4096"), "{message}");
    }

    #[test]
    fn build_log_is_rendered_verbatim() {
        let log = "<source>:3:5: error: use of undeclared identifier 'x'\n    x = 1;\n    ^";
        let err = ProbeError::Build { log: log.into() };
        assert!(err.to_string().ends_with(log));
        assert_eq!(err.kind(), ErrorKind::Build);
    }

    #[test]
    fn with_case_does_not_touch_other_kinds() {
        let err = ProbeError::NoPlatformFound.with_case("ignored");
        assert!(matches!(err, ProbeError::NoPlatformFound));
    }
}
