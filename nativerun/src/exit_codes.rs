//! Stable exit codes for the `nativerun` launcher.

/// A results file was written. It may still hold an invocation error.
pub const OK: i32 = 0;
/// No results file: the batch could not be read or the results could not be written.
pub const INVALID: i32 = 1;
