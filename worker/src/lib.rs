//! Worker side of the isolated test protocol
//!
//! A worker is the coordinator binary re-executed with a `WorkerInvocation`
//! in its environment. It runs exactly one test, captures any failure as a
//! plain-data snapshot, writes one result into the inherited channel and
//! saves its own coverage slice through the inherited directory handle.

pub mod error;
pub mod invocation;
pub mod channel;
pub mod capture;
pub mod entry;

pub use error::{WorkerError, WorkerResult};
pub use invocation::WorkerInvocation;
pub use channel::ResultSender;
pub use capture::{isolated_entry, run_captured};
pub use entry::{run_from_env, run_worker, WORKER_HARNESS_FAILURE};
