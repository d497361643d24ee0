//! Worker body: run one isolated test and report it
//!
//! Order matters here. The test's own source file is loaded before the test
//! can enter restricted mode, exactly one result is sent, and the coverage
//! slice is saved last, whatever the outcome.

use std::process::ExitCode;
use std::sync::Arc;

use shared::coverage::{CoverageConfig, CoverageSession, ScopedDirWriter};
use shared::logging::{init_tracing_with_level, log_error, log_success};
use shared::{process_debug, process_warn, sandbox, CapturedFailure, FailureKind, LineCache, ProcessId, ResultMessage, TestContext, TestRegistry};

use crate::capture;
use crate::channel::{claim_fd, ResultSender};
use crate::error::WorkerResult;
use crate::invocation::WorkerInvocation;

/// Exit status of a worker that could not report through its channel
pub const WORKER_HARNESS_FAILURE: u8 = 70;

/// Run as a worker if this process was spawned as one
///
/// Returns `None` in a normal (coordinator) process.
pub fn run_from_env(registry: &TestRegistry) -> Option<ExitCode> {
    match WorkerInvocation::from_env() {
        Ok(None) => None,
        Ok(Some(invocation)) => Some(run_worker(invocation, registry)),
        Err(e) => {
            init_tracing_with_level(None);
            log_error(ProcessId::current(), "Worker setup", &e);
            Some(ExitCode::from(WORKER_HARNESS_FAILURE))
        }
    }
}

pub fn run_worker(invocation: WorkerInvocation, registry: &TestRegistry) -> ExitCode {
    let process_id = ProcessId::init_worker(invocation.worker_id);
    init_tracing_with_level(invocation.log_level.as_deref());

    match execute(&invocation, registry) {
        Ok(()) => {
            log_success(process_id, &format!("Reported {}", invocation.test_name));
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_error(process_id, &format!("Worker for {}", invocation.test_name), &e);
            ExitCode::from(WORKER_HARNESS_FAILURE)
        }
    }
}

fn execute(invocation: &WorkerInvocation, registry: &TestRegistry) -> WorkerResult<()> {
    let process_id = ProcessId::current();
    let sender = ResultSender::from_inherited(invocation.result_fd)?;

    let writer = ScopedDirWriter::from_inherited(invocation.coverage_dir.clone(), claim_fd(invocation.coverage_fd)?);
    let config = CoverageConfig::new(&invocation.coverage_dir).with_data_file(&invocation.data_file);
    let coverage = Arc::new(CoverageSession::new(config, Arc::new(writer)));
    coverage.start();

    let cache = match &invocation.source_root {
        Some(root) => LineCache::new().with_source_root(root),
        None => LineCache::new(),
    };

    let message = match registry.get(&invocation.test_name) {
        Some(case) => {
            if !cache.prewarm(case.file) {
                process_warn!(process_id, "⚠️ Source of {} unavailable; trace lines may be missing", case.file);
            }
            process_debug!(process_id, "Running {}", case.name);
            let ctx = TestContext::new(coverage.clone(), sandbox::system());
            capture::run_captured(case, &ctx, &cache)
        }
        None => ResultMessage::Failure(CapturedFailure::new(
            FailureKind::Harness,
            format!("No test named '{}' in this binary", invocation.test_name),
            Vec::new(),
        )),
    };

    let sent = sender.send(&message);

    coverage.stop();
    let saved = coverage.save_slice();

    sent?;
    let path = saved?;
    process_debug!(process_id, "Coverage slice saved to {}", path.display());
    Ok(())
}
