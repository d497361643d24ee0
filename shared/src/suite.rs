//! Test registration and the context handed to test bodies
//!
//! The same registry is compiled into the coordinator and into every worker
//! (a worker is the coordinator binary re-executed), so a test is identified
//! across the process boundary by name alone.

use std::fmt;
use std::io;
use std::panic::Location;
use std::sync::Arc;

use crate::coverage::CoverageSession;
use crate::errors::{SharedError, SharedResult};
use crate::messages::FailureKind;
use crate::sandbox::{self, Sandbox};

/// Error returned from a test body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError {
    pub kind: FailureKind,
    pub message: String,
    pub location: &'static Location<'static>,
}

impl TestError {
    #[track_caller]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// Failed check, reported like an `assert!`
    #[track_caller]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TestError {}

impl From<io::Error> for TestError {
    /// Records the location of the `?` that propagated the error
    #[track_caller]
    fn from(err: io::Error) -> Self {
        let kind = if sandbox::is_capability_error(&err) {
            FailureKind::Capability
        } else {
            FailureKind::Io
        };
        Self::new(kind, err.to_string())
    }
}

pub type TestResult = Result<(), TestError>;

/// Signature of every test body
pub type TestFn = fn(&TestContext) -> TestResult;

/// Explicit handles available to a running test
#[derive(Clone)]
pub struct TestContext {
    coverage: Arc<CoverageSession>,
    sandbox: Arc<dyn Sandbox>,
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("coverage", &self.coverage)
            .field("restricted", &self.sandbox.is_restricted())
            .finish()
    }
}

impl TestContext {
    pub fn new(coverage: Arc<CoverageSession>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { coverage, sandbox }
    }

    pub fn coverage(&self) -> &CoverageSession {
        &self.coverage
    }

    pub fn sandbox(&self) -> &dyn Sandbox {
        self.sandbox.as_ref()
    }
}

/// Record a coverage hit at the call site
#[macro_export]
macro_rules! cover {
    ($ctx:expr) => {
        $ctx.coverage().record(file!(), line!())
    };
}

#[derive(Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    /// Source file of the body; pre-loaded into the line cache before sandbox entry
    pub file: &'static str,
    /// Run in a dedicated worker process
    pub isolated: bool,
    pub body: TestFn,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("isolated", &self.isolated)
            .finish()
    }
}

impl TestCase {
    pub fn in_process(name: &'static str, file: &'static str, body: TestFn) -> Self {
        Self {
            name,
            file,
            isolated: false,
            body,
        }
    }

    pub fn isolated(name: &'static str, file: &'static str, body: TestFn) -> Self {
        Self {
            name,
            file,
            isolated: true,
            body,
        }
    }
}

/// Ordered set of uniquely named tests
#[derive(Debug, Default, Clone)]
pub struct TestRegistry {
    cases: Vec<TestCase>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, case: TestCase) -> SharedResult<()> {
        if self.get(case.name).is_some() {
            return Err(SharedError::InvalidConfig {
                field: "test name".to_string(),
                value: case.name.to_string(),
            });
        }
        self.cases.push(case);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|case| case.name == name)
    }

    /// Tests in registration order whose name contains any filter; all tests for no filters
    pub fn select(&self, filters: &[String]) -> Vec<TestCase> {
        self.cases
            .iter()
            .filter(|case| filters.is_empty() || filters.iter().any(|f| case.name.contains(f.as_str())))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageConfig, ScopedDirWriter};
    use crate::sandbox::EmulatedSandbox;

    fn passing(_ctx: &TestContext) -> TestResult {
        Ok(())
    }

    fn failing(_ctx: &TestContext) -> TestResult {
        Err(TestError::assertion("expected true"))
    }

    fn covering(ctx: &TestContext) -> TestResult {
        cover!(ctx);
        Ok(())
    }

    fn registry() -> TestRegistry {
        let mut registry = TestRegistry::new();
        registry.register(TestCase::in_process("api_names", file!(), passing)).unwrap();
        registry.register(TestCase::isolated("sandbox_trivial", file!(), failing)).unwrap();
        registry.register(TestCase::isolated("sandbox_open", file!(), passing)).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = registry();
        let err = registry.register(TestCase::in_process("api_names", file!(), passing)).unwrap_err();
        assert!(matches!(err, SharedError::InvalidConfig { .. }));
        assert_eq!(registry.select(&[]).len(), 3);
    }

    #[test]
    fn test_select_keeps_registration_order() {
        let registry = registry();
        let names: Vec<_> = registry.select(&[]).iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["api_names", "sandbox_trivial", "sandbox_open"]);

        let names: Vec<_> = registry
            .select(&["sandbox".to_string()])
            .iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["sandbox_trivial", "sandbox_open"]);
        assert!(registry.get("sandbox_open").unwrap().isolated);
    }

    #[test]
    fn test_error_records_caller_location() {
        let line = line!() + 1;
        let err = TestError::assertion("expected true");
        assert_eq!(err.location.line(), line);
        assert_eq!(err.location.file(), file!());
        assert_eq!(err.to_string(), "AssertionError: expected true");
    }

    #[test]
    fn test_io_error_conversion_uses_question_mark_site() {
        fn open_missing() -> TestResult {
            std::fs::File::open("/definitely/not/here")?;
            Ok(())
        }

        let err = open_missing().unwrap_err();
        assert_eq!(err.kind, FailureKind::Io);
        assert_eq!(err.location.file(), file!());
    }

    #[test]
    fn test_capability_denial_maps_to_capability_kind() {
        let sandbox = EmulatedSandbox::new();
        sandbox.enter().unwrap();
        let err: TestError = sandbox.open_ambient(std::path::Path::new("/etc/hosts")).unwrap_err().into();
        assert_eq!(err.kind, FailureKind::Capability);
    }

    #[test]
    fn test_cover_records_call_site() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ScopedDirWriter::open(dir.path()).unwrap();
        let coverage = Arc::new(CoverageSession::new(CoverageConfig::new(dir.path()), Arc::new(writer)));
        let ctx = TestContext::new(coverage.clone(), Arc::new(EmulatedSandbox::new()));

        coverage.start();
        covering(&ctx).unwrap();
        assert_eq!(coverage.data().lines_for(file!()).map(|l| l.len()), Some(1));
    }
}
