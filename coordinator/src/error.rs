//! Coordinator-specific error types

use thiserror::Error;
use shared::{CoverageError, SharedError};

use crate::core::failure::{ExitSummary, TestFailure};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Failed to spawn worker for {test}: {message}")]
    SpawnFailed { test: String, message: String },

    #[error("Result channel error: {message}")]
    ChannelError { message: String },

    /// A test failed, in a worker or in-process; carries the reconstructed failure
    #[error("{0}")]
    TestFailed(Box<TestFailure>),

    /// The worker exited without sending any result
    #[error("Worker for {test} exited without reporting a result ({status})")]
    WorkerCrashed { test: String, status: ExitSummary },

    #[error("Coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoordinatorError {
    pub fn channel(message: impl Into<String>) -> Self {
        Self::ChannelError { message: message.into() }
    }

    pub fn spawn(test: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            test: test.into(),
            message: message.into(),
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
