//! Deterministic, pure logic shared by the invocation pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod batch;
pub mod bind;
pub mod invocation;
pub mod run_options;
pub mod signature;
pub mod sweep;
pub mod types;
