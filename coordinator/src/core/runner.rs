//! Suite runner and result accounting
//!
//! Isolated tests go through an `IsolationRunner`; all others run in-process
//! through the same capture path the worker uses, so both kinds of failure
//! reach the report as the same `TestFailure`.

use std::io::{self, Write};
use std::sync::Arc;

use shared::{process_debug, process_warn, LineCache, ProcessId, ResultMessage, Sandbox, TestCase, TestContext};
use shared::coverage::CoverageSession;

use crate::core::failure::{ExitSummary, TestFailure};
use crate::error::CoordinatorError;
use crate::traits::IsolationRunner;

/// Outcome of one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(Box<TestFailure>),
    /// Worker exited without reporting a result
    Crashed(ExitSummary),
    /// Fault in the harness rather than in the test
    Errored(String),
}

impl TestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "ok",
            TestOutcome::Failed(_) => "FAIL",
            TestOutcome::Crashed(_) => "CRASH",
            TestOutcome::Errored(_) => "ERROR",
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    /// Fold the result of an isolated run into an outcome
    pub fn from_isolated(result: Result<(), CoordinatorError>) -> Self {
        match result {
            Ok(()) => TestOutcome::Passed,
            Err(CoordinatorError::TestFailed(failure)) => TestOutcome::Failed(failure),
            Err(CoordinatorError::WorkerCrashed { status, .. }) => TestOutcome::Crashed(status),
            Err(other) => TestOutcome::Errored(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub name: String,
    pub outcome: TestOutcome,
}

/// Outcomes of a whole run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteSummary {
    pub reports: Vec<TestReport>,
}

impl SuiteSummary {
    fn count(&self, label: &str) -> usize {
        self.reports.iter().filter(|r| r.outcome.label() == label).count()
    }

    pub fn passed(&self) -> usize {
        self.count("ok")
    }

    pub fn failed(&self) -> usize {
        self.count("FAIL")
    }

    pub fn crashed(&self) -> usize {
        self.count("CRASH")
    }

    pub fn errored(&self) -> usize {
        self.count("ERROR")
    }

    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(|r| r.outcome.is_passed())
    }

    /// Details of every test that did not pass, then the totals line
    pub fn write_details(&self, dest: &mut dyn Write) -> io::Result<()> {
        for report in self.reports.iter().filter(|r| !r.outcome.is_passed()) {
            writeln!(dest)?;
            writeln!(dest, "==== {}: {}", report.outcome.label(), report.name)?;
            match &report.outcome {
                TestOutcome::Failed(failure) => writeln!(dest, "{}", failure.render())?,
                TestOutcome::Crashed(status) => writeln!(dest, "worker exited without reporting a result ({status})")?,
                TestOutcome::Errored(message) => writeln!(dest, "{message}")?,
                TestOutcome::Passed => {}
            }
        }

        writeln!(dest)?;
        writeln!(
            dest,
            "test result: {}. {} passed; {} failed; {} crashed; {} errored",
            if self.all_passed() { "ok" } else { "FAILED" },
            self.passed(),
            self.failed(),
            self.crashed(),
            self.errored()
        )
    }
}

/// Runs a selection of tests and accounts for their outcomes
pub struct SuiteRunner<R: IsolationRunner> {
    isolation: R,
    coverage: Arc<CoverageSession>,
    sandbox: Arc<dyn Sandbox>,
    cache: Arc<LineCache>,
}

impl<R: IsolationRunner> SuiteRunner<R> {
    pub fn new(isolation: R, coverage: Arc<CoverageSession>, sandbox: Arc<dyn Sandbox>, cache: Arc<LineCache>) -> Self {
        Self {
            isolation,
            coverage,
            sandbox,
            cache,
        }
    }

    pub fn coverage(&self) -> &Arc<CoverageSession> {
        &self.coverage
    }

    pub fn cache(&self) -> &Arc<LineCache> {
        &self.cache
    }

    /// Run `cases` in order, printing one progress line per test to `out`
    pub async fn run<W: Write>(&self, cases: &[TestCase], out: &mut W) -> io::Result<SuiteSummary> {
        writeln!(out, "running {} tests", cases.len())?;

        let mut summary = SuiteSummary::default();
        for case in cases {
            write!(out, "{} ... ", case.name)?;
            out.flush()?;

            let outcome = if case.isolated {
                TestOutcome::from_isolated(self.isolation.run_isolated(case).await)
            } else {
                self.run_in_process(case)
            };

            writeln!(out, "{}", outcome.label())?;
            if let TestOutcome::Crashed(status) = &outcome {
                process_warn!(ProcessId::current(), "💥 Worker for {} died: {}", case.name, status);
            }
            summary.reports.push(TestReport {
                name: case.name.to_string(),
                outcome,
            });
        }

        summary.write_details(out)?;
        Ok(summary)
    }

    fn run_in_process(&self, case: &TestCase) -> TestOutcome {
        process_debug!(ProcessId::current(), "Running {} in-process", case.name);
        let ctx = TestContext::new(self.coverage.clone(), self.sandbox.clone());
        match worker::run_captured(case, &ctx, &self.cache) {
            ResultMessage::Success => TestOutcome::Passed,
            ResultMessage::Failure(captured) => {
                TestOutcome::Failed(Box::new(TestFailure::reconstruct(&captured, &self.cache)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockIsolationRunner;
    use shared::coverage::{CoverageConfig, ScopedDirWriter};
    use shared::sandbox::EmulatedSandbox;
    use shared::{FailureKind, TestError, TestResult};

    fn passes(_ctx: &TestContext) -> TestResult {
        Ok(())
    }

    fn fails_in_process(_ctx: &TestContext) -> TestResult {
        assert_eq!(1 + 1, 3);
        Ok(())
    }

    fn returns_error(_ctx: &TestContext) -> TestResult {
        Err(TestError::assertion("expected true"))
    }

    fn suite_runner(isolation: MockIsolationRunner, dir: &std::path::Path) -> SuiteRunner<MockIsolationRunner> {
        let writer = ScopedDirWriter::open(dir).unwrap();
        let coverage = Arc::new(CoverageSession::new(CoverageConfig::new(dir), Arc::new(writer)));
        SuiteRunner::new(isolation, coverage, Arc::new(EmulatedSandbox::new()), Arc::new(LineCache::new()))
    }

    fn failure(message: &str) -> CoordinatorError {
        CoordinatorError::TestFailed(Box::new(TestFailure {
            kind: Some(FailureKind::Assertion),
            exception_type: "AssertionError".to_string(),
            message: message.to_string(),
            frames: vec![],
        }))
    }

    #[tokio::test]
    async fn test_isolated_and_in_process_outcomes_accounted() {
        let dir = tempfile::tempdir().unwrap();
        let mut isolation = MockIsolationRunner::new();
        isolation
            .expect_run_isolated()
            .withf(|case| case.name == "isolated_ok")
            .times(1)
            .returning(|_| Ok(()));
        isolation
            .expect_run_isolated()
            .withf(|case| case.name == "isolated_fail")
            .times(1)
            .returning(|_| Err(failure("expected true")));
        isolation
            .expect_run_isolated()
            .withf(|case| case.name == "isolated_crash")
            .times(1)
            .returning(|case| {
                Err(CoordinatorError::WorkerCrashed {
                    test: case.name.to_string(),
                    status: ExitSummary { code: None, signal: Some(9) },
                })
            });
        isolation
            .expect_run_isolated()
            .withf(|case| case.name == "isolated_error")
            .times(1)
            .returning(|case| Err(CoordinatorError::spawn(case.name, "no such file")));

        let cases = vec![
            TestCase::in_process("in_process_ok", file!(), passes),
            TestCase::in_process("in_process_fail", file!(), fails_in_process),
            TestCase::isolated("isolated_ok", file!(), passes),
            TestCase::isolated("isolated_fail", file!(), passes),
            TestCase::isolated("isolated_crash", file!(), passes),
            TestCase::isolated("isolated_error", file!(), passes),
        ];

        let mut out = Vec::new();
        let summary = suite_runner(isolation, dir.path()).run(&cases, &mut out).await.unwrap();

        assert_eq!(summary.passed(), 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.crashed(), 1);
        assert_eq!(summary.errored(), 1);
        assert!(!summary.all_passed());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("in_process_ok ... ok\n"));
        assert!(text.contains("isolated_fail ... FAIL\n"));
        assert!(text.contains("isolated_crash ... CRASH\n"));
        assert!(text.contains("killed by signal 9"));
        assert!(text.ends_with("test result: FAILED. 2 passed; 2 failed; 1 crashed; 1 errored\n"));
    }

    #[tokio::test]
    async fn test_in_process_failure_matches_isolated_representation() {
        let dir = tempfile::tempdir().unwrap();
        let mut isolation = MockIsolationRunner::new();
        isolation.expect_run_isolated().times(0);

        let cases = vec![TestCase::in_process("returns_error", file!(), returns_error)];
        let mut out = Vec::new();
        let summary = suite_runner(isolation, dir.path()).run(&cases, &mut out).await.unwrap();

        match &summary.reports[0].outcome {
            TestOutcome::Failed(failure) => {
                assert_eq!(failure.kind, Some(FailureKind::Assertion));
                assert_eq!(failure.message, "expected true");
                assert_eq!(failure.frames.len(), 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_all_passing_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut isolation = MockIsolationRunner::new();
        isolation.expect_run_isolated().times(1).returning(|_| Ok(()));

        let cases = vec![
            TestCase::in_process("a", file!(), passes),
            TestCase::isolated("b", file!(), passes),
        ];
        let mut out = Vec::new();
        let summary = tokio_test::block_on(suite_runner(isolation, dir.path()).run(&cases, &mut out)).unwrap();

        assert!(summary.all_passed());
        assert!(String::from_utf8(out).unwrap().ends_with("test result: ok. 2 passed; 0 failed; 0 crashed; 0 errored\n"));
    }
}
