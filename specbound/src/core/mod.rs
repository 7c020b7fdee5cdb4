//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod binder;
pub mod compliance;
pub mod contract;
pub mod exit_path;
pub mod extractor;
pub mod taxonomy;
pub mod types;
