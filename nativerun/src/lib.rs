//! Call exported C functions of compiled shared libraries, in-process or isolated.
//!
//! An [`InvocationDescriptor`](core::invocation::InvocationDescriptor) names a
//! function, its arguments, the counters to collect and the run options to
//! apply. Descriptors are grouped into a [`RunBatch`](core::batch::RunBatch)
//! and executed by an [`ExecutionMethod`](core::batch::ExecutionMethod):
//!
//! - **[`core`]**: Pure logic (binding, descriptors, batches, sweeps).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (dynamic libraries, child processes,
//!   files, zip transport). Seams are traits so tests can swap in fakes.
//!
//! [`launch`] is the child-process side of isolated execution and backs the
//! `nativerun` binary.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod launch;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
