//! Core coordinator logic
//!
//! Failure reconstruction, suite accounting and the run pipeline. Nothing
//! here spawns processes; isolation is reached only through `IsolationRunner`.

pub mod failure;
pub mod pipeline;
pub mod runner;

pub use failure::{ExitSummary, TestFailure};
pub use pipeline::RunOptions;
pub use runner::{SuiteRunner, SuiteSummary, TestOutcome, TestReport};
