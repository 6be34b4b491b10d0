//! Error taxonomy shared by both sides of the process boundary.
//!
//! [`RunError`] is serializable: the launcher ships a caught error back to the
//! dispatcher as data, and the dispatcher re-raises it unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while describing, binding, or executing invocations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunError {
    /// A signature parameter had no matching argument.
    #[error("missing argument '{name}'")]
    MissingArgument { name: String },

    /// An argument did not correspond to any signature parameter.
    #[error("unused argument '{name}'")]
    UnusedArgument { name: String },

    /// A supplied value could not be converted to the parameter's type.
    #[error(
        "invalid value for argument '{parameter}': expected a value compatible with '{expected}', got '{supplied}'"
    )]
    IncorrectArgumentType {
        parameter: String,
        expected: String,
        supplied: String,
    },

    /// A descriptor was malformed at construction time.
    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    /// A run option could not be applied as written.
    #[error("invalid run option: {0}")]
    InvalidRunOption(String),

    /// The instrumentation runtime rejected a counter name.
    #[error("unknown performance counter '{0}'")]
    UnknownPerformanceCounter(String),

    /// Signature or symbol resolution failed.
    #[error("{0}")]
    Runner(String),

    /// The child or remote process failed without describing why.
    #[error("execution method failed: {message}{}", describe_exit(.exit_code, .signal))]
    ExecutionMethod {
        message: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        output: String,
    },
}

impl RunError {
    pub fn execution_method(message: impl Into<String>) -> Self {
        RunError::ExecutionMethod {
            message: message.into(),
            exit_code: None,
            signal: None,
            output: String::new(),
        }
    }

    /// Collapse an I/O-layer error chain into an execution-method failure.
    pub fn from_io(err: &anyhow::Error) -> Self {
        RunError::execution_method(format!("{err:#}"))
    }

    /// True for errors that mean "the process died", as opposed to errors the
    /// invoked code's environment could describe.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, RunError::ExecutionMethod { .. })
    }
}

fn describe_exit(exit_code: &Option<i32>, signal: &Option<i32>) -> String {
    match (*exit_code, *signal) {
        (_, Some(signal)) => format!(" (killed by signal {signal})"),
        (Some(code), None) => format!(" (exit code {code})"),
        (None, None) => String::new(),
    }
}
