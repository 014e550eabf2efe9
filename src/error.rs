//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for graphquant operations
#[derive(Error, Debug)]
pub enum QuantError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cluster stream parsing errors (malformed records, missing fields)
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Invalid data errors (empty alignment, start node absent from index)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Algorithm errors (non-finite probabilities, impossible states)
    #[error("Algorithm error: {message}")]
    Algorithm { message: String },

    /// Configuration errors (invalid CLI arguments)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// File not found errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },
}

/// Type alias for Results using QuantError
pub type Result<T> = std::result::Result<T, QuantError>;

impl QuantError {
    /// Create a parse error with a message
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an algorithm error
    pub fn algorithm(message: impl Into<String>) -> Self {
        Self::Algorithm {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for QuantError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            line: err.line(),
            message: err.to_string(),
        }
    }
}
