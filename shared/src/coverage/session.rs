//! Coverage session controller
//!
//! One session per process. The coordinator creates it with a freshly bound
//! `ScopedDirWriter`; each worker rebuilds it around the directory handle it
//! inherited and saves its own slice before exiting. Combining happens only in
//! the coordinator, after every worker has exited.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;

use super::data::CoverageData;
use super::report;
use super::writer::PersistenceStrategy;
use crate::errors::{CoverageError, CoverageResult};
use crate::line_cache::LineCache;
use crate::{process_debug, process_info, ProcessId};

/// Default data file name inside the coverage directory
pub const DEFAULT_DATA_FILE: &str = ".coverage";

/// Where coverage data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageConfig {
    /// Absolute path of the bound coverage directory
    pub data_dir: PathBuf,
    /// Base name of the data files inside `data_dir`
    pub data_file: String,
}

impl CoverageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            data_file: DEFAULT_DATA_FILE.to_string(),
        }
    }

    /// Use a different data file base name (fluent API)
    pub fn with_data_file(mut self, data_file: impl Into<String>) -> Self {
        self.data_file = data_file.into();
        self
    }

    /// Path of the data file carrying `suffix`, or the canonical file for `None`
    pub fn data_path(&self, suffix: Option<&str>) -> PathBuf {
        match suffix {
            Some(suffix) => self.data_dir.join(format!("{}.{}", self.data_file, suffix)),
            None => self.data_dir.join(&self.data_file),
        }
    }
}

/// Suffix tagging data saved by this build: `rs` + compiler major + minor
pub fn runtime_suffix() -> String {
    let mut parts = env!("CAPTEST_RUSTC_VERSION").split('.');
    let major = parts.next().unwrap_or("0");
    let minor = parts.next().unwrap_or("0");
    format!("rs{major}{minor}")
}

/// Unique per-process slice suffix: `<host>.<pid>.X<random>`
pub fn process_suffix() -> String {
    let host = nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let random: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{host}.{}.X{random:06}", std::process::id())
}

fn is_runtime_suffix(suffix: &str) -> bool {
    suffix
        .strip_prefix("rs")
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

pub struct CoverageSession {
    config: CoverageConfig,
    persistence: Arc<dyn PersistenceStrategy>,
    collecting: AtomicBool,
    data: Mutex<CoverageData>,
}

impl std::fmt::Debug for CoverageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageSession")
            .field("config", &self.config)
            .field("collecting", &self.is_collecting())
            .finish()
    }
}

impl CoverageSession {
    /// Create a session that persists exclusively through `persistence`
    pub fn new(config: CoverageConfig, persistence: Arc<dyn PersistenceStrategy>) -> Self {
        Self {
            config,
            persistence,
            collecting: AtomicBool::new(false),
            data: Mutex::new(CoverageData::new()),
        }
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    pub fn start(&self) {
        if !self.collecting.swap(true, Ordering::SeqCst) {
            process_debug!(ProcessId::current(), "Coverage collection started");
        }
    }

    pub fn stop(&self) {
        if self.collecting.swap(false, Ordering::SeqCst) {
            process_debug!(ProcessId::current(), "Coverage collection stopped");
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    /// Record a hit line; ignored while the session is stopped
    pub fn record(&self, file: &str, line: u32) {
        if self.is_collecting() {
            self.lock_data().add_line(file, line);
        }
    }

    /// Snapshot of the data collected or combined so far
    pub fn data(&self) -> CoverageData {
        self.lock_data().clone()
    }

    /// Persist the current data under `suffix`, or as the canonical file for `None`
    ///
    /// Overwrites any previous file of the same name, so saving twice is safe.
    pub fn save(&self, suffix: Option<&str>) -> CoverageResult<PathBuf> {
        let target = self.config.data_path(suffix);
        let bytes = self.lock_data().to_json_bytes()?;
        self.persistence.write_file(&target, &bytes)?;
        process_debug!(ProcessId::current(), "Saved coverage data to {}", target.display());
        Ok(target)
    }

    /// Persist this process's slice under a unique process suffix
    pub fn save_slice(&self) -> CoverageResult<PathBuf> {
        self.save(Some(&process_suffix()))
    }

    /// Merge every `<data_file>.*` file in the directory into this session
    ///
    /// Per-process slices are removed once merged; runtime-suffixed files stay
    /// so runs from other toolchains keep accumulating. With `strict`, finding
    /// no files at all is an error.
    pub fn combine(&self, strict: bool) -> CoverageResult<usize> {
        let files = self.discover()?;
        if files.is_empty() {
            if strict {
                return Err(CoverageError::NothingToCombine {
                    dir: self.config.data_dir.clone(),
                });
            }
            process_debug!(ProcessId::current(), "No coverage data to combine");
            return Ok(0);
        }

        let mut combined = CoverageData::new();
        for (path, _) in &files {
            let bytes = self.persistence.read_file(path)?;
            combined.merge(&CoverageData::from_json_bytes(path, &bytes)?);
        }
        self.lock_data().merge(&combined);

        for (path, suffix) in &files {
            if !is_runtime_suffix(suffix) {
                self.persistence.remove_file(path)?;
            }
        }

        process_info!(
            ProcessId::current(),
            "📊 Combined {} coverage data file(s) from {}",
            files.len(),
            self.config.data_dir.display()
        );
        Ok(files.len())
    }

    /// Print the per-file summary table to `dest`
    pub fn report(&self, dest: &mut dyn Write) -> CoverageResult<()> {
        let data = self.data();
        report::write_summary(&data, dest).map_err(|e| CoverageError::io("<report>", e))
    }

    /// Print every covered source file with hit lines marked to `dest`
    pub fn annotate(&self, dest: &mut dyn Write, cache: &LineCache) -> CoverageResult<()> {
        let data = self.data();
        report::write_annotated(&data, cache, dest).map_err(|e| CoverageError::io("<annotate>", e))
    }

    /// Data files eligible for combining, sorted by name, with their suffixes
    fn discover(&self) -> CoverageResult<Vec<(PathBuf, String)>> {
        let prefix = format!("{}.", self.config.data_file);

        let mut files = Vec::new();
        for path in self.persistence.list_files()? {
            let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
                continue;
            };
            match name.strip_prefix(&prefix) {
                Some(suffix) if !suffix.is_empty() => files.push((path, suffix.to_string())),
                _ => {}
            }
        }

        files.sort();
        Ok(files)
    }

    fn lock_data(&self) -> MutexGuard<'_, CoverageData> {
        match self.data.lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
