//! Side-effecting operations: native calls, processes, files and transport.

pub mod config;
pub mod execution;
pub mod files;
pub mod instrumentation;
pub mod invoker;
pub mod native;
pub mod process;
pub mod run_option_interpreter;
pub mod transport;
pub mod wire;
