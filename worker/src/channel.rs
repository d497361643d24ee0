//! Result channel plumbing
//!
//! The channel is a plain pipe. Both ends are created close-on-exec; the
//! coordinator clears the flag on the write end in the child only, so exactly
//! one worker ever holds a given channel.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd;

use shared::ResultMessage;

use crate::error::{WorkerError, WorkerResult};

const DRAIN_CHUNK: usize = 8192;

/// Create a pipe with both ends close-on-exec from the start: `(read, write)`
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    Ok(unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// Toggle `FD_CLOEXEC` on `fd`
///
/// Only calls fcntl(2), so it may run between fork and exec.
pub fn set_cloexec(fd: RawFd, enabled: bool) -> io::Result<()> {
    let mut flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    flags.set(FdFlag::FD_CLOEXEC, enabled);
    fcntl(fd, FcntlArg::F_SETFD(flags))?;
    Ok(())
}

/// Append whatever is already buffered in the read end `fd` to `buf`
///
/// Never waits: stops at end of file or as soon as a read would block, even
/// if some other process still holds the write end open.
pub fn drain_available(fd: OwnedFd, buf: &mut Vec<u8>) -> io::Result<()> {
    let status = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(status | OFlag::O_NONBLOCK))?;

    let mut channel = File::from(fd);
    let mut chunk = [0u8; DRAIN_CHUNK];
    loop {
        match channel.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Take ownership of a descriptor inherited across exec
///
/// Fails if `fd` is not open. The descriptor is marked close-on-exec again so
/// anything the test itself spawns does not inherit it.
pub fn claim_fd(fd: RawFd) -> WorkerResult<OwnedFd> {
    if fd < 0 {
        return Err(WorkerError::channel(format!("Invalid inherited descriptor {fd}")));
    }
    set_cloexec(fd, true)
        .map_err(|e| WorkerError::channel(format!("Inherited descriptor {fd} unusable: {e}")))?;
    // SAFETY: the descriptor is open (fcntl succeeded) and was handed to this
    // process for its exclusive use by the coordinator.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Producer end of the result channel
///
/// `send` consumes the sender, so a worker can report at most once.
#[derive(Debug)]
pub struct ResultSender {
    channel: File,
}

impl ResultSender {
    pub fn new(fd: OwnedFd) -> Self {
        Self { channel: File::from(fd) }
    }

    /// Claim the inherited write end numbered `fd`
    pub fn from_inherited(fd: RawFd) -> WorkerResult<Self> {
        Ok(Self::new(claim_fd(fd)?))
    }

    pub fn send(mut self, message: &ResultMessage) -> WorkerResult<()> {
        let frame = message.encode_frame()?;
        self.channel
            .write_all(&frame)
            .map_err(|e| WorkerError::channel(format!("Write result failed: {e}")))?;
        self.channel
            .flush()
            .map_err(|e| WorkerError::channel(format!("Flush result failed: {e}")))?;
        Ok(())
    }
}
