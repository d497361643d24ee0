//! Message types exchanged between coordinator and workers
//!
//! - `snapshot`: the plain-data stack snapshot of a failure
//! - `result`: the one-per-worker result message and its framing

pub mod result;
pub mod snapshot;

pub use result::{ResultMessage, MAX_FRAME_LEN};
pub use snapshot::{CapturedFailure, FailureKind, StackFrame};
