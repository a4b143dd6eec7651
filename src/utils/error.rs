//! Error Handling Module
//!
//! Defines the error type shared by the training driver. Uses thiserror for
//! ergonomic error definitions; the binary wraps these in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for ANODE training operations
#[derive(Error, Debug)]
pub enum AnodeError {
    /// Solver, network or run settings that cannot be used
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A resume path that does not name a regular file
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(PathBuf),

    /// Model or optimizer record could not be written or restored
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// The global tracing subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for ANODE training operations
pub type Result<T> = std::result::Result<T, AnodeError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| AnodeError::Dataset(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| AnodeError::Dataset(format!("{}: {}", f(), e)))
    }
}
