//! Trait definitions with mockall annotations for testing
//!
//! The suite runner depends on process isolation only through this trait, so
//! its accounting can be tested without spawning workers.

use shared::TestCase;

use crate::error::CoordinatorResult;

/// Process isolation abstraction
///
/// Runs one test in a fresh worker process and blocks until that process has
/// exited. There is no timeout: a worker that never exits blocks the caller.
#[mockall::automock]
#[async_trait::async_trait]
pub trait IsolationRunner: Send + Sync {
    /// Run `case` in a worker
    ///
    /// # Returns
    /// `Ok(())` when the worker reported success. A reported failure comes
    /// back as `CoordinatorError::TestFailed` with the reconstructed failure;
    /// a worker that exited without reporting as `CoordinatorError::WorkerCrashed`.
    async fn run_isolated(&self, case: &TestCase) -> CoordinatorResult<()>;
}
