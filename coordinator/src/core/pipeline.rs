//! One complete coordinator run
//!
//! Tests first, then the coverage pipeline. The coordinator's own slice is
//! saved before combining so in-process hits end up in the same merge as
//! every worker's, and the merged data is written twice: once tagged with
//! the runtime suffix and once as the canonical data file.

use std::io::Write;

use shared::coverage::runtime_suffix;
use shared::{process_debug, process_info, ProcessId, TestCase};

use crate::core::runner::SuiteRunner;
use crate::error::CoordinatorResult;
use crate::traits::IsolationRunner;

/// Knobs for the coverage half of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Fail when there is nothing to combine
    pub combine_strict: bool,
    /// Print covered sources with hit lines marked after the summary
    pub annotate: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            combine_strict: true,
            annotate: false,
        }
    }
}

/// Run `cases`, then save, combine and report coverage
///
/// Returns `Ok(false)` when any test did not pass. Coverage is still saved
/// and reported in that case.
pub async fn run<R, W>(
    runner: &SuiteRunner<R>,
    cases: &[TestCase],
    options: RunOptions,
    out: &mut W,
) -> CoordinatorResult<bool>
where
    R: IsolationRunner,
    W: Write,
{
    let coverage = runner.coverage();

    coverage.start();
    let summary = runner.run(cases, &mut *out).await;
    coverage.stop();
    let summary = summary?;

    let slice = coverage.save_slice()?;
    process_debug!(ProcessId::current(), "Saved coordinator slice {}", slice.display());

    let combined = coverage.combine(options.combine_strict)?;
    let versioned = coverage.save(Some(&runtime_suffix()))?;
    let canonical = coverage.save(None)?;
    process_info!(
        ProcessId::current(),
        "💾 Wrote {} and {} from {} data file(s)",
        versioned.display(),
        canonical.display(),
        combined
    );

    writeln!(out)?;
    coverage.report(out)?;
    if options.annotate {
        writeln!(out)?;
        coverage.annotate(out, runner.cache())?;
    }

    Ok(summary.all_passed())
}
