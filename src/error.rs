//! Error types for the statistics engine and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted value exists but does not match the expected schema.
    #[error("store error for key `{key}`: {message}")]
    Store { key: String, message: String },

    #[error("document error in {path}: {message}")]
    Document { path: PathBuf, message: String },

    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_names_the_key() {
        let err = MonitorError::Store {
            key: "globalStats".to_string(),
            message: "expected object".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "store error for key `globalStats`: expected object"
        );
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MonitorError = io.into();
        assert!(matches!(err, MonitorError::Io(_)));
    }
}
