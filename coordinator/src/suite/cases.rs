//! Capability-mode tests shipped with `captest`
//!
//! Everything that enters restricted mode is registered as isolated: entry
//! is irreversible, so doing it in the coordinator would break every test
//! that follows.

use std::os::fd::AsFd;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use shared::sandbox::{self, is_capability_error};
use shared::{cover, FailureKind, SharedResult, TestCase, TestContext, TestError, TestRegistry, TestResult};

/// Directory opened before entry and used for the handle-relative open
const DEVICE_DIR: &str = "/dev";
const NULL_DEVICE: &str = "null";

/// Every bundled test, in run order
pub fn registry() -> SharedResult<TestRegistry> {
    let mut registry = TestRegistry::new();
    registry.register(TestCase::in_process("api_names", file!(), api_names))?;
    registry.register(TestCase::isolated("sandbox_trivial", file!(), sandbox_trivial))?;
    registry.register(TestCase::isolated("sandbox_openat", file!(), sandbox_openat))?;
    registry.register(TestCase::isolated("coverage_after_entry", file!(), coverage_after_entry))?;
    Ok(registry)
}

/// The failure taxonomy and the sandbox API are present and consistent
fn api_names(ctx: &TestContext) -> TestResult {
    cover!(ctx);
    for kind in FailureKind::ALL {
        if FailureKind::from_type_name(kind.as_str()) != Some(kind) {
            return Err(TestError::assertion(format!("{} does not name itself", kind.as_str())));
        }
    }
    assert_eq!(FailureKind::from_type_name("KeyError"), None);
    assert!(!ctx.sandbox().is_restricted(), "coordinator must never be restricted");
    Ok(())
}

fn sandbox_trivial(ctx: &TestContext) -> TestResult {
    ctx.sandbox().enter()?;
    cover!(ctx);
    assert!(ctx.sandbox().is_restricted(), "expected true");
    Ok(())
}

/// Ambient opens are refused after entry; opens relative to a held directory are not
fn sandbox_openat(ctx: &TestContext) -> TestResult {
    let dir = sandbox::open_directory(Path::new(DEVICE_DIR))?;
    ctx.sandbox().enter()?;
    cover!(ctx);

    match ctx.sandbox().open_ambient(&Path::new(DEVICE_DIR).join(NULL_DEVICE)) {
        Ok(_) => return Err(TestError::assertion("ambient open succeeded in restricted mode")),
        Err(e) if is_capability_error(&e) => {}
        Err(e) => return Err(TestError::from(e)),
    }

    sandbox::open_relative(dir.as_fd(), Path::new(NULL_DEVICE), OFlag::O_RDONLY, Mode::empty())?;
    Ok(())
}

/// A coverage slice can still be written once restricted
fn coverage_after_entry(ctx: &TestContext) -> TestResult {
    ctx.sandbox().enter()?;
    cover!(ctx);

    let path = ctx
        .coverage()
        .save_slice()
        .map_err(|e| TestError::new(FailureKind::Io, e.to_string()))?;
    assert!(path.starts_with(&ctx.coverage().config().data_dir));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::coverage::{CoverageConfig, CoverageSession, ScopedDirWriter};
    use shared::sandbox::EmulatedSandbox;
    use std::sync::Arc;

    fn context(dir: &Path) -> TestContext {
        let writer = ScopedDirWriter::open(dir).unwrap();
        let coverage = Arc::new(CoverageSession::new(CoverageConfig::new(dir), Arc::new(writer)));
        coverage.start();
        TestContext::new(coverage, Arc::new(EmulatedSandbox::new()))
    }

    #[test]
    fn test_registry_layout() {
        let registry = registry().unwrap();
        let names: Vec<_> = registry.select(&[]).iter().map(|c| (c.name, c.isolated)).collect();
        assert_eq!(
            names,
            vec![
                ("api_names", false),
                ("sandbox_trivial", true),
                ("sandbox_openat", true),
                ("coverage_after_entry", true),
            ]
        );
    }

    #[test]
    fn test_bundled_cases_pass_against_emulated_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        for case in registry().unwrap().select(&[]) {
            let ctx = context(dir.path());
            assert_eq!((case.body)(&ctx), Ok(()), "{}", case.name);
        }
    }

    #[test]
    fn test_hit_lines_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        sandbox_trivial(&ctx).unwrap();

        let data = ctx.coverage().data();
        assert_eq!(data.lines_for(file!()).map(|lines| lines.len()), Some(1));
    }

    #[test]
    fn test_coverage_slice_written_after_entry() {
        let dir = tempfile::tempdir().unwrap();
        coverage_after_entry(&context(dir.path())).unwrap();

        let slices = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".coverage."))
            .count();
        assert_eq!(slices, 1);
    }
}
