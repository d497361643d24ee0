//! Capability-mode collaborator
//!
//! The harness only needs three things from the sandbox: a way to enter
//! restricted mode, a way to ask whether we are in it, and the guarantee that
//! ambient path opens fail afterwards while descriptor-relative opens keep
//! working. On FreeBSD this is Capsicum; elsewhere an emulation tracks the
//! mode in-process so the harness and its tests behave the same way.

use std::ffi::{OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::dir::Dir;
use nix::fcntl::{self, AtFlags, OFlag};
use nix::sys::stat::{self, Mode, SFlag};
use nix::unistd::{self, UnlinkatFlags};

/// Capability-mode operations used by tests and by the harness diagnostics
#[mockall::automock]
pub trait Sandbox: Send + Sync {
    /// Enter restricted mode. Irreversible for the calling process.
    fn enter(&self) -> io::Result<()>;

    /// Whether the calling process is in restricted mode
    fn is_restricted(&self) -> bool;

    /// Open `path` for reading through ambient path resolution
    fn open_ambient(&self, path: &Path) -> io::Result<File>;
}

/// Marker carried by errors the emulated sandbox raises for denied operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDenied;

impl std::fmt::Display for CapabilityDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Not permitted in capability mode")
    }
}

impl std::error::Error for CapabilityDenied {}

/// Whether `err` reports an operation refused by capability mode
pub fn is_capability_error(err: &io::Error) -> bool {
    #[cfg(target_os = "freebsd")]
    {
        if matches!(err.raw_os_error(), Some(libc::ENOTCAPABLE) | Some(libc::ECAPMODE)) {
            return true;
        }
    }

    err.get_ref()
        .map(|inner| inner.is::<CapabilityDenied>())
        .unwrap_or(false)
}

/// Capsicum-backed sandbox
#[cfg(target_os = "freebsd")]
#[derive(Debug, Default)]
pub struct CapsicumSandbox;

#[cfg(target_os = "freebsd")]
impl Sandbox for CapsicumSandbox {
    fn enter(&self) -> io::Result<()> {
        // SAFETY: cap_enter takes no arguments and only changes process state.
        if unsafe { libc::cap_enter() } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn is_restricted(&self) -> bool {
        let mut mode: libc::c_uint = 0;
        // SAFETY: `mode` is a valid, writable c_uint for the duration of the call.
        let rc = unsafe { libc::cap_getmode(&mut mode) };
        rc == 0 && mode != 0
    }

    fn open_ambient(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }
}

/// In-process stand-in for platforms without Capsicum
#[derive(Debug, Default)]
pub struct EmulatedSandbox {
    restricted: AtomicBool,
}

impl EmulatedSandbox {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sandbox for EmulatedSandbox {
    fn enter(&self) -> io::Result<()> {
        self.restricted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_restricted(&self) -> bool {
        self.restricted.load(Ordering::SeqCst)
    }

    fn open_ambient(&self, path: &Path) -> io::Result<File> {
        if self.is_restricted() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, CapabilityDenied));
        }
        File::open(path)
    }
}

static SYSTEM_SANDBOX: OnceLock<Arc<dyn Sandbox>> = OnceLock::new();

/// The sandbox for this process: Capsicum where available, the emulation otherwise
pub fn system() -> Arc<dyn Sandbox> {
    SYSTEM_SANDBOX
        .get_or_init(|| {
            #[cfg(target_os = "freebsd")]
            {
                Arc::new(CapsicumSandbox)
            }
            #[cfg(not(target_os = "freebsd"))]
            {
                Arc::new(EmulatedSandbox::new())
            }
        })
        .clone()
}

/// Open a directory read-only; the descriptor is the capability for later relative opens
pub fn open_directory(path: &Path) -> io::Result<OwnedFd> {
    let dir = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(path)?;
    Ok(OwnedFd::from(dir))
}

/// Open `name` relative to `dir` without any ambient path resolution
pub fn open_relative(dir: BorrowedFd<'_>, name: &Path, flags: OFlag, mode: Mode) -> io::Result<OwnedFd> {
    let fd = fcntl::openat(Some(dir.as_raw_fd()), name, flags | OFlag::O_CLOEXEC, mode)?;
    // SAFETY: openat returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Remove `name` relative to `dir`
pub fn unlink_relative(dir: BorrowedFd<'_>, name: &Path) -> io::Result<()> {
    unistd::unlinkat(Some(dir.as_raw_fd()), name, UnlinkatFlags::NoRemoveDir)?;
    Ok(())
}

/// Names of the regular files directly inside `dir`, in directory order
///
/// Symlinks are followed when deciding what counts as a regular file.
pub fn list_relative(dir: BorrowedFd<'_>) -> io::Result<Vec<OsString>> {
    let handle = open_relative(dir, Path::new("."), OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())?;
    let mut listing = Dir::from(handle)?;

    let mut names = Vec::new();
    for entry in listing.iter() {
        let entry = entry?;
        let name = entry.file_name().to_bytes();
        if name == b"." || name == b".." {
            continue;
        }
        let name = OsStr::from_bytes(name);
        let stat = stat::fstatat(Some(dir.as_raw_fd()), name, AtFlags::empty())?;
        if SFlag::from_bits_truncate(stat.st_mode) & SFlag::S_IFMT == SFlag::S_IFREG {
            names.push(name.to_os_string());
        }
    }
    Ok(names)
}
