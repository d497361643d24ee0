//! Worker error types

use shared::{CoverageError, SharedError};
use thiserror::Error;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Worker error types
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Missing worker environment variable: {name}")]
    MissingEnvironment { name: &'static str },

    #[error("Invalid worker environment: {name} = {value}")]
    InvalidEnvironment { name: &'static str, value: String },

    #[error("Result channel error: {message}")]
    ChannelError { message: String },

    #[error("Coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("Shared error: {0}")]
    Shared(#[from] SharedError),
}

impl WorkerError {
    pub fn channel(message: impl Into<String>) -> Self {
        Self::ChannelError { message: message.into() }
    }
}
