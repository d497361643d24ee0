//! Persistence strategies for coverage data
//!
//! `ScopedDirWriter` is the only strategy the harness installs. It holds an
//! open handle to the coverage directory and performs every read, write,
//! listing and removal relative to that handle, so it keeps working in a
//! worker that has entered restricted mode and can no longer resolve paths.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use crate::errors::{CoverageError, CoverageResult};
use crate::sandbox::{self, Sandbox};
use crate::{process_debug, process_info, ProcessId};

/// How the coverage session persists its data
#[mockall::automock]
pub trait PersistenceStrategy: Send + Sync {
    /// Create or truncate `target` and write `contents` to it
    fn write_file(&self, target: &Path, contents: &[u8]) -> CoverageResult<()>;

    /// Remove `target`
    fn remove_file(&self, target: &Path) -> CoverageResult<()>;

    /// Full contents of `target`
    fn read_file(&self, target: &Path) -> CoverageResult<Vec<u8>>;

    /// Regular files in the persistence directory, as full paths
    fn list_files(&self) -> CoverageResult<Vec<PathBuf>>;
}

/// Directory path and open directory handle, bound together at construction
pub struct ScopedDirWriter {
    /// Used only to validate membership and to name files in diagnostics
    dir_path: PathBuf,
    /// The capability every operation goes through
    dir_fd: OwnedFd,
    sandbox: Arc<dyn Sandbox>,
}

impl std::fmt::Debug for ScopedDirWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedDirWriter")
            .field("dir_path", &self.dir_path)
            .field("dir_fd", &self.dir_fd)
            .finish()
    }
}

impl ScopedDirWriter {
    /// Open `dir` read-only and bind it to its absolute path
    pub fn open(dir: &Path) -> CoverageResult<Self> {
        let dir_path = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| CoverageError::io(dir, e))?
                .join(dir)
        };

        let dir_fd = sandbox::open_directory(&dir_path).map_err(|e| CoverageError::io(&dir_path, e))?;

        process_debug!(ProcessId::current(), "📁 Bound coverage directory {}", dir_path.display());
        Ok(Self::from_inherited(dir_path, dir_fd))
    }

    /// Rebuild the binding from a handle inherited across process spawn
    pub fn from_inherited(dir_path: PathBuf, dir_fd: OwnedFd) -> Self {
        Self {
            dir_path,
            dir_fd,
            sandbox: sandbox::system(),
        }
    }

    /// Consult `sandbox` for restricted-mode diagnostics (fluent API)
    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    pub fn dir_fd(&self) -> BorrowedFd<'_> {
        self.dir_fd.as_fd()
    }

    /// Directory-relative name for `target`
    ///
    /// Purely lexical: `target` must be absolute, start with the bound path,
    /// and continue with plain name components only. Symlinks are not
    /// resolved.
    pub fn relative_name(&self, target: &Path) -> CoverageResult<PathBuf> {
        let violation = || CoverageError::ScopeViolation {
            target: target.to_path_buf(),
            root: self.dir_path.clone(),
        };

        if !target.is_absolute() {
            return Err(violation());
        }

        let relative = target.strip_prefix(&self.dir_path).map_err(|_| violation())?;
        let mut components = relative.components().peekable();
        if components.peek().is_none() {
            return Err(violation());
        }
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return Err(violation());
        }

        Ok(relative.to_path_buf())
    }
}

impl PersistenceStrategy for ScopedDirWriter {
    fn write_file(&self, target: &Path, contents: &[u8]) -> CoverageResult<()> {
        let name = self.relative_name(target)?;

        if self.sandbox.is_restricted() {
            process_info!(
                ProcessId::current(),
                "↳ Writing {} in {} (sandboxed test)",
                name.display(),
                self.dir_path.display()
            );
        } else {
            process_debug!(ProcessId::current(), "Writing {} in {}", name.display(), self.dir_path.display());
        }

        let fd = sandbox::open_relative(
            self.dir_fd.as_fd(),
            &name,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::from_bits_truncate(0o644),
        )
        .map_err(|e| CoverageError::io(target, e))?;

        let mut file = File::from(fd);
        file.write_all(contents).map_err(|e| CoverageError::io(target, e))?;
        file.flush().map_err(|e| CoverageError::io(target, e))?;
        Ok(())
    }

    fn remove_file(&self, target: &Path) -> CoverageResult<()> {
        let name = self.relative_name(target)?;
        sandbox::unlink_relative(self.dir_fd.as_fd(), &name).map_err(|e| CoverageError::io(target, e))
    }

    fn read_file(&self, target: &Path) -> CoverageResult<Vec<u8>> {
        let name = self.relative_name(target)?;
        let fd = sandbox::open_relative(self.dir_fd.as_fd(), &name, OFlag::O_RDONLY, Mode::empty())
            .map_err(|e| CoverageError::io(target, e))?;

        let mut contents = Vec::new();
        File::from(fd)
            .read_to_end(&mut contents)
            .map_err(|e| CoverageError::io(target, e))?;
        Ok(contents)
    }

    fn list_files(&self) -> CoverageResult<Vec<PathBuf>> {
        let names = sandbox::list_relative(self.dir_fd.as_fd()).map_err(|e| CoverageError::io(&self.dir_path, e))?;
        Ok(names.into_iter().map(|name| self.dir_path.join(name)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{EmulatedSandbox, MockSandbox};

    fn bound(dir: &Path) -> ScopedDirWriter {
        ScopedDirWriter::open(dir).unwrap().with_sandbox(Arc::new(EmulatedSandbox::new()))
    }

    #[test]
    fn test_relative_name_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        let writer = bound(dir.path());

        let name = writer.relative_name(&dir.path().join("worker1.cov")).unwrap();
        assert_eq!(name, PathBuf::from("worker1.cov"));
    }

    #[test]
    fn test_relative_name_rejects_outside_paths() {
        let writer = ScopedDirWriter::from_inherited(
            PathBuf::from("/tmp/covdata"),
            sandbox::open_directory(&std::env::temp_dir()).unwrap(),
        );

        for target in [
            "/tmp/other/file.cov",
            "/tmp/covdata2/file.cov",
            "/tmp/covdata",
            "/tmp/covdata/../other/file.cov",
            "covdata/file.cov",
            "/",
        ] {
            let err = writer.relative_name(Path::new(target)).unwrap_err();
            assert!(
                matches!(err, CoverageError::ScopeViolation { .. }),
                "{target} should be rejected"
            );
        }
    }

    #[test]
    fn test_write_outside_scope_touches_nothing() {
        let root = tempfile::tempdir().unwrap();
        let covdata = root.path().join("covdata");
        let other = root.path().join("other");
        std::fs::create_dir(&covdata).unwrap();
        std::fs::create_dir(&other).unwrap();

        let writer = bound(&covdata);
        let err = writer.write_file(&other.join("file.cov"), b"{}").unwrap_err();

        assert!(matches!(err, CoverageError::ScopeViolation { .. }));
        assert!(!other.join("file.cov").exists());
    }

    #[test]
    fn test_write_succeeds_after_entering_restricted_mode() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(EmulatedSandbox::new());
        let writer = ScopedDirWriter::open(dir.path()).unwrap().with_sandbox(sandbox.clone());
        let target = dir.path().join("worker1.cov");
        std::fs::write(&target, "stale").unwrap();

        sandbox.enter().unwrap();
        assert!(sandbox.open_ambient(&target).is_err());

        writer.write_file(&target, b"fresh").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "fresh");
    }

    #[test]
    fn test_write_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = bound(dir.path());
        let target = dir.path().join(".coverage");

        writer.write_file(&target, b"a much longer first payload").unwrap();
        writer.write_file(&target, b"short").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "short");
    }

    #[test]
    fn test_remove_file_through_handle() {
        let dir = tempfile::tempdir().unwrap();
        let writer = bound(dir.path());
        let target = dir.path().join(".coverage.host.1.X000001");
        std::fs::write(&target, "{}").unwrap();

        writer.remove_file(&target).unwrap();
        assert!(!target.exists());
        assert!(writer.remove_file(&dir.path().join("../escape")).is_err());
    }

    #[test]
    fn test_read_and_list_after_entering_restricted_mode() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(EmulatedSandbox::new());
        let writer = ScopedDirWriter::open(dir.path()).unwrap().with_sandbox(sandbox.clone());
        let target = dir.path().join(".coverage.host.7.X000007");
        std::fs::write(&target, "{\"files\":{}}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        sandbox.enter().unwrap();
        assert!(sandbox.open_ambient(&target).is_err());

        assert_eq!(writer.list_files().unwrap(), vec![target.clone()]);
        assert_eq!(writer.read_file(&target).unwrap(), b"{\"files\":{}}");
        assert!(matches!(
            writer.read_file(&dir.path().join("../escape")),
            Err(CoverageError::ScopeViolation { .. })
        ));
    }

    #[test]
    fn test_restricted_mode_is_consulted_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut sandbox = MockSandbox::new();
        sandbox.expect_is_restricted().times(1).returning(|| true);

        let writer = ScopedDirWriter::open(dir.path()).unwrap().with_sandbox(Arc::new(sandbox));
        writer.write_file(&dir.path().join("slice.cov"), b"{}").unwrap();
    }
}
