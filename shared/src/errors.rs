//! Shared error types for the capability test harness

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Message protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },
}

impl SharedError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError { message: message.into() }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;

/// Errors raised by the coverage session and its persistence strategy
#[derive(Error, Debug)]
pub enum CoverageError {
    /// A write or removal was aimed outside the bound directory
    #[error("Refusing to touch {target} outside coverage directory {root}")]
    ScopeViolation { target: PathBuf, root: PathBuf },

    #[error("No coverage data to combine in {dir}")]
    NothingToCombine { dir: PathBuf },

    #[error("Coverage data file {path} is corrupt: {message}")]
    CorruptData { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoverageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type CoverageResult<T> = Result<T, CoverageError>;
