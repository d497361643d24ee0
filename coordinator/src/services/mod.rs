//! Service implementations
//!
//! Real implementations of the coordinator's service traits, the ones that
//! actually spawn processes and touch descriptors.

pub mod isolation_runner;

pub use isolation_runner::RealIsolationRunner;

#[cfg(test)]
mod tests;
