//! Unified error handling for the world GeoJSON builder.
//!
//! Only run-aborting failures are errors. Per-route problems (missing
//! segment, unknown world, unusable stream) are logged and skipped by the
//! pipeline and never surface here.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for builder operations.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The zwift-data directory does not exist or cannot be read
    #[error("Unable to access zwift-data directory at {path}: {source}")]
    DataDirMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output or cache directory could not be created
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File read/write failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bare package specifier not found in any node_modules directory
    #[error("Cannot find package '{specifier}' from {from}")]
    PackageNotFound { specifier: String, from: PathBuf },

    /// Node built-in modules have no data to offer
    #[error("Built-in module '{specifier}' imported by {from} is not available")]
    UnsupportedBuiltin { specifier: String, from: PathBuf },

    /// Module source could not be tokenized or parsed
    #[error("Syntax error in {path}:{line}: {message}")]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Module uses a construct the literal evaluator does not execute
    #[error("Unsupported construct in {path}:{line}: {message}")]
    Unsupported {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Expression references a name that is neither local nor imported
    #[error("Unknown binding '{name}' in {path}")]
    UnknownBinding { path: PathBuf, name: String },

    /// JSON document failed to parse or serialize
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// HTTP/API error
    #[error("HTTP error{}: {message}", .status_code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        BuildError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for builder operations.
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuildError::Syntax {
            path: PathBuf::from("/data/src/routes.ts"),
            line: 12,
            message: "unexpected token '}'".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("routes.ts:12"));
        assert!(text.contains("unexpected token"));
    }

    #[test]
    fn test_http_display_with_and_without_status() {
        let with = BuildError::Http {
            message: "Not Found".to_string(),
            status_code: Some(404),
        };
        assert_eq!(with.to_string(), "HTTP error (404): Not Found");

        let without = BuildError::Http {
            message: "timed out".to_string(),
            status_code: None,
        };
        assert_eq!(without.to_string(), "HTTP error: timed out");
    }
}
