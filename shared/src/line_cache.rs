//! Source line cache
//!
//! Files are read at most once and never re-validated: a worker pre-warms the
//! cache with its test's own source file before it enters restricted mode,
//! because afterwards it may not be able to open the file at all. The
//! coordinator fills in whatever the worker could not, assuming the file did
//! not change in between.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{process_debug, ProcessId};

type Lines = Arc<Vec<String>>;

#[derive(Debug, Default)]
pub struct LineCache {
    /// Base directory for relative paths as recorded by the compiler
    source_root: Option<PathBuf>,
    /// Loaded files; `None` records a failed load so it is not retried
    files: Mutex<HashMap<String, Option<Lines>>>,
}

impl LineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root` as well as the working directory (fluent API)
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    /// Load `file` now. Returns whether its lines are available.
    pub fn prewarm(&self, file: &str) -> bool {
        self.lines(file).is_some()
    }

    /// Stripped text of `line` (1-based) in `file`, `None` if unavailable or blank
    pub fn get_line(&self, file: &str, line: u32) -> Option<String> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        let lines = self.lines(file)?;
        let text = lines.get(index)?.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// All lines of `file`, loading it on first use
    pub fn lines(&self, file: &str) -> Option<Lines> {
        let mut files = match self.files.lock() {
            Ok(files) => files,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = files.get(file) {
            return entry.clone();
        }

        let loaded = self.load(file).map(Arc::new);
        if loaded.is_none() {
            process_debug!(ProcessId::current(), "Source unavailable for {}", file);
        }
        files.insert(file.to_string(), loaded.clone());
        loaded
    }

    fn load(&self, file: &str) -> Option<Vec<String>> {
        self.candidates(file)
            .into_iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .map(|text| text.lines().map(str::to_string).collect())
    }

    fn candidates(&self, file: &str) -> Vec<PathBuf> {
        let path = Path::new(file);
        let mut candidates = vec![path.to_path_buf()];
        if path.is_relative() {
            if let Some(root) = &self.source_root {
                candidates.push(root.join(path));
            }
        }
        candidates
    }
}
