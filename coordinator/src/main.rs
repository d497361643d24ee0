//! Main entry point for the captest binary
//!
//! The same executable is both the coordinator and, when spawned with a
//! worker invocation in its environment, the worker for one isolated test.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use coordinator::core::pipeline;
use coordinator::{suite, RealIsolationRunner, RunOptions, SuiteRunner, BUILD_SOURCE_ROOT};
use shared::coverage::{CoverageConfig, CoverageSession, ScopedDirWriter, DEFAULT_DATA_FILE};
use shared::logging::{self, init_tracing_with_level};
use shared::{process_debug, process_warn, sandbox, LineCache, ProcessId, TestRegistry};

/// Exit status when the harness itself fails before a report is produced
const HARNESS_FAILURE: u8 = 2;

/// Process-isolated capability test runner with coverage
#[derive(Parser)]
#[command(name = "captest")]
#[command(about = "Runs capability-mode tests in isolated worker processes and reports coverage")]
pub struct Args {
    /// Directory holding coverage data files
    #[arg(long, default_value = ".")]
    pub coverage_dir: PathBuf,

    /// Base name of the coverage data files
    #[arg(long, default_value = DEFAULT_DATA_FILE)]
    pub data_file: String,

    /// Only run tests whose name contains this substring (repeatable)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Root for resolving relative source paths in traces and annotations
    #[arg(long)]
    pub source_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print covered sources with hit lines marked after the summary
    #[arg(long)]
    pub annotate: bool,

    /// Do not fail when there is no coverage data to combine
    #[arg(long)]
    pub no_combine_strict: bool,
}

fn main() -> ExitCode {
    let registry = match suite::registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("captest: invalid test registry: {e}");
            return ExitCode::from(HARNESS_FAILURE);
        }
    };

    if let Some(code) = worker::run_from_env(&registry) {
        return code;
    }

    let args = Args::parse();
    ProcessId::init_coordinator();
    init_tracing_with_level(Some(&args.log_level));

    match run_coordinator(args, &registry) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            logging::log_error(ProcessId::current(), "captest", &format!("{e:#}"));
            ExitCode::from(HARNESS_FAILURE)
        }
    }
}

/// Wire up the real collaborators and run the selected tests; `Ok(false)` when a test did not pass
#[tokio::main]
async fn run_coordinator(args: Args, registry: &TestRegistry) -> anyhow::Result<bool> {
    logging::log_startup(ProcessId::current(), "captest coordinator");

    let writer = Arc::new(
        ScopedDirWriter::open(&args.coverage_dir)
            .with_context(|| format!("Failed to bind coverage directory {}", args.coverage_dir.display()))?,
    );
    let config = CoverageConfig::new(writer.dir_path()).with_data_file(&args.data_file);
    let coverage = Arc::new(CoverageSession::new(config, writer.clone()));

    let source_root = args.source_root.clone().unwrap_or_else(|| PathBuf::from(BUILD_SOURCE_ROOT));
    let cache = Arc::new(LineCache::new().with_source_root(&source_root));
    process_debug!(
        ProcessId::current(),
        "Coverage in {}, sources under {}",
        writer.dir_path().display(),
        source_root.display()
    );

    let isolation = RealIsolationRunner::new(writer.clone(), args.data_file.clone(), cache.clone())
        .context("Failed to locate the worker executable")?
        .with_log_level(Some(args.log_level.clone()))
        .with_source_root(Some(source_root));
    let runner = SuiteRunner::new(isolation, coverage, sandbox::system(), cache);

    let cases = registry.select(&args.filter);
    if cases.is_empty() {
        process_warn!(ProcessId::current(), "⚠️ No tests match {:?}", args.filter);
    }

    let options = RunOptions {
        combine_strict: !args.no_combine_strict,
        annotate: args.annotate,
    };
    let all_passed = pipeline::run(&runner, &cases, options, &mut io::stdout())
        .await
        .context("Coordinator run failed")?;

    logging::log_shutdown(
        ProcessId::current(),
        if all_passed { "all tests passed" } else { "some tests did not pass" },
    );
    Ok(all_passed)
}
