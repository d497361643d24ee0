//! Real process isolation
//!
//! Each isolated test runs in a fresh copy of the current executable. The
//! worker learns what to run from its environment and inherits exactly two
//! descriptors: the write end of its result channel and the coverage
//! directory handle.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::Command;

use shared::coverage::ScopedDirWriter;
use shared::{process_debug, process_warn, LineCache, ProcessId, ResultMessage, TestCase};
use worker::channel;
use worker::WorkerInvocation;

use crate::core::failure::{ExitSummary, TestFailure};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::traits::IsolationRunner;

const READ_CHUNK: usize = 8192;

/// Spawns one worker process per isolated test
pub struct RealIsolationRunner {
    /// Executable to run as the worker
    program: PathBuf,

    /// Extra arguments for `program`
    args: Vec<String>,

    /// Coverage directory bound by the coordinator; its handle is passed down
    writer: Arc<ScopedDirWriter>,

    /// Base name of the coverage data files
    data_file: String,

    /// Log level to pass to workers
    log_level: Option<String>,

    /// Root for resolving relative source paths in workers
    source_root: Option<PathBuf>,

    /// Coordinator-side cache used when reconstructing failures
    cache: Arc<LineCache>,

    next_worker_id: AtomicU32,
}

impl RealIsolationRunner {
    /// Runner that re-executes the current binary
    pub fn new(writer: Arc<ScopedDirWriter>, data_file: impl Into<String>, cache: Arc<LineCache>) -> CoordinatorResult<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: Vec::new(),
            writer,
            data_file: data_file.into(),
            log_level: None,
            source_root: None,
            cache,
            next_worker_id: AtomicU32::new(1),
        })
    }

    /// Configure the worker executable (fluent API)
    pub fn with_program(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// Configure log level (fluent API)
    pub fn with_log_level(mut self, log_level: Option<String>) -> Self {
        self.log_level = log_level;
        self
    }

    /// Configure source root (fluent API)
    pub fn with_source_root(mut self, source_root: Option<PathBuf>) -> Self {
        self.source_root = source_root;
        self
    }

    fn invocation(&self, case: &TestCase, result_fd: &OwnedFd) -> WorkerInvocation {
        WorkerInvocation {
            test_name: case.name.to_string(),
            worker_id: self.next_worker_id.fetch_add(1, Ordering::Relaxed),
            result_fd: result_fd.as_raw_fd(),
            coverage_dir: self.writer.dir_path().to_path_buf(),
            coverage_fd: self.writer.dir_fd().as_raw_fd(),
            data_file: self.data_file.clone(),
            log_level: self.log_level.clone(),
            source_root: self.source_root.clone(),
        }
    }

    /// Turn the drained channel contents and the exit status into the test's result
    pub fn interpret(&self, case: &TestCase, buf: &[u8], status: ExitStatus) -> CoordinatorResult<()> {
        let summary = ExitSummary::from(status);
        match ResultMessage::decode_channel(buf)? {
            None => Err(CoordinatorError::WorkerCrashed {
                test: case.name.to_string(),
                status: summary,
            }),
            Some(message) => {
                if !status.success() {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Worker for {} reported a result but then failed ({})",
                        case.name,
                        summary
                    );
                }
                match message {
                    ResultMessage::Success => Ok(()),
                    ResultMessage::Failure(captured) => Err(CoordinatorError::TestFailed(Box::new(
                        TestFailure::reconstruct(&captured, &self.cache),
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl IsolationRunner for RealIsolationRunner {
    async fn run_isolated(&self, case: &TestCase) -> CoordinatorResult<()> {
        let (read, write) = channel::pipe().map_err(|e| CoordinatorError::channel(format!("pipe: {e}")))?;
        let invocation = self.invocation(case, &write);
        let inherited = [invocation.result_fd, invocation.coverage_fd];

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(invocation.env_vars())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // SAFETY: the closure only calls fcntl(2), which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                for fd in inherited {
                    channel::set_cloexec(fd, false)?;
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CoordinatorError::spawn(case.name, format!("{}: {e}", self.program.display())))?;

        // Only the worker may hold the write end, or EOF never arrives
        drop(write);

        process_debug!(
            ProcessId::current(),
            "🧪 Spawned worker_{} (PID: {}) for {}",
            invocation.worker_id,
            child.id().unwrap_or(0),
            case.name
        );

        // Second handle on the same read end for the final drain
        let drain = read
            .try_clone()
            .map_err(|e| CoordinatorError::channel(format!("duplicate result channel: {e}")))?;
        let mut receiver = pipe::Receiver::from_owned_fd(read)
            .map_err(|e| CoordinatorError::channel(format!("register result channel: {e}")))?;

        // Drain while waiting so a large result cannot fill the pipe and stall the worker
        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut eof = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                received = receiver.read(&mut chunk), if !eof => match received {
                    Ok(0) => eof = true,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) => return Err(CoordinatorError::channel(format!("read result channel: {e}"))),
                },
            }
        };

        // Anything the worker wrote is buffered by now. A descendant may still
        // hold the write end, so take only what is there and never wait for EOF.
        drop(receiver);
        if !eof {
            channel::drain_available(drain, &mut buf)
                .map_err(|e| CoordinatorError::channel(format!("read result channel: {e}")))?;
        }

        process_debug!(
            ProcessId::current(),
            "worker_{} exited ({}) with {} result bytes",
            invocation.worker_id,
            ExitSummary::from(status),
            buf.len()
        );

        self.interpret(case, &buf, status)
    }
}
