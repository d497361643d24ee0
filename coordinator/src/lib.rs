//! Coordinator side of the capability test harness
//!
//! Runs a suite of tests, sending each isolated test to a fresh worker
//! process, rebuilds the failures workers report, and drives coverage
//! collection, combination and reporting for the whole run.

pub mod core;
pub mod error;
pub mod services;
pub mod suite;
pub mod traits;

// Re-export commonly used types
pub use core::{ExitSummary, RunOptions, SuiteRunner, SuiteSummary, TestFailure, TestOutcome, TestReport};
pub use error::{CoordinatorError, CoordinatorResult};
pub use services::RealIsolationRunner;
pub use traits::IsolationRunner;

/// Workspace root at build time; default root for relative source paths
pub const BUILD_SOURCE_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/..");
