//! Shared types for the capability test harness
//!
//! Everything both sides of the coordinator/worker process boundary need:
//! the failure snapshot and its wire format, the sandbox collaborator,
//! coverage persistence, test registration, and process-aware logging.

pub mod types;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod line_cache;
pub mod sandbox;
pub mod coverage;
pub mod suite;

pub use types::*;
pub use errors::*;

pub use messages::{
    // Worker → Coordinator result channel
    ResultMessage, MAX_FRAME_LEN,

    // Stack snapshot model
    CapturedFailure, FailureKind, StackFrame,
};

pub use coverage::{CoverageConfig, CoverageSession, PersistenceStrategy, ScopedDirWriter};
pub use line_cache::LineCache;
pub use sandbox::Sandbox;
pub use suite::{TestCase, TestContext, TestError, TestFn, TestRegistry, TestResult};
