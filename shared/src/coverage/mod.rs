//! Coverage collection, persistence and reporting
//!
//! - `data`: hit lines per file and the JSON data file format
//! - `session`: the per-process session controller
//! - `writer`: persistence strategies, including the scoped directory writer
//! - `report`: summary and annotated renderings

pub mod data;
pub mod report;
pub mod session;
pub mod writer;

pub use data::CoverageData;
pub use session::{process_suffix, runtime_suffix, CoverageConfig, CoverageSession, DEFAULT_DATA_FILE};
pub use writer::{MockPersistenceStrategy, PersistenceStrategy, ScopedDirWriter};
