//! Bundled capability test suite

pub mod cases;

pub use cases::registry;
