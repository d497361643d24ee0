//! Coverage data model and its on-disk JSON form

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::errors::{CoverageError, CoverageResult};

const FORMAT: &str = "captest-coverage/1";

/// Hit lines per source file for one process (a slice) or for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageData {
    lines: BTreeMap<String, BTreeSet<u32>>,
}

/// Serialized envelope, tagged so foreign files are rejected instead of merged
#[derive(Serialize, Deserialize)]
struct DataFile {
    format: String,
    lines: BTreeMap<String, BTreeSet<u32>>,
}

impl CoverageData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&mut self, file: &str, line: u32) {
        self.lines.entry(file.to_string()).or_default().insert(line);
    }

    /// Union `other` into this data
    pub fn merge(&mut self, other: &CoverageData) {
        for (file, lines) in &other.lines {
            self.lines
                .entry(file.clone())
                .or_default()
                .extend(lines.iter().copied());
        }
    }

    /// Covered files in path order
    pub fn files(&self) -> impl Iterator<Item = (&str, &BTreeSet<u32>)> {
        self.lines.iter().map(|(file, lines)| (file.as_str(), lines))
    }

    pub fn lines_for(&self, file: &str) -> Option<&BTreeSet<u32>> {
        self.lines.get(file)
    }

    /// Total number of distinct hit lines across all files
    pub fn line_count(&self) -> usize {
        self.lines.values().map(BTreeSet::len).sum()
    }

    pub fn to_json_bytes(&self) -> CoverageResult<Vec<u8>> {
        let file = DataFile {
            format: FORMAT.to_string(),
            lines: self.lines.clone(),
        };
        Ok(serde_json::to_vec(&file)?)
    }

    /// Parse a data file read from `path`
    pub fn from_json_bytes(path: &Path, bytes: &[u8]) -> CoverageResult<Self> {
        let file: DataFile = serde_json::from_slice(bytes).map_err(|e| CoverageError::CorruptData {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if file.format != FORMAT {
            return Err(CoverageError::CorruptData {
                path: path.to_path_buf(),
                message: format!("unsupported format '{}'", file.format),
            });
        }

        Ok(Self { lines: file.lines })
    }
}
