//! Run options applied as an ambient scope around one native call.

#![allow(unsafe_code)]

use std::env;
use std::ffi::OsString;

use tracing::{debug, warn};

use crate::core::run_options::{RunOptions, render_run_options, validate_run_options};
use crate::error::RunError;

/// Applies run options to the process and puts things back afterwards.
pub trait RunOptionInterpreter {
    fn apply(&mut self, options: &RunOptions) -> Result<(), RunError>;

    /// Restore whatever `apply` changed. Must tolerate a partial `apply`.
    fn revert(&mut self) -> Result<(), RunError>;
}

/// Run options as environment variables.
///
/// Prior values are remembered per key and restored in reverse order, so a
/// variable that did not exist before is removed again.
#[derive(Debug, Default)]
pub struct EnvironmentInterpreter {
    saved: Vec<(String, Option<OsString>)>,
}

impl EnvironmentInterpreter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunOptionInterpreter for EnvironmentInterpreter {
    fn apply(&mut self, options: &RunOptions) -> Result<(), RunError> {
        validate_run_options(options)?;
        for (key, value) in render_run_options(options) {
            self.saved.push((key.clone(), env::var_os(&key)));
            debug!(key = %key, value = %value, "set run option");
            // SAFETY: invocations run one at a time on the invoking thread and
            // no native code executes while the variable changes.
            unsafe { env::set_var(&key, &value) };
        }
        Ok(())
    }

    fn revert(&mut self) -> Result<(), RunError> {
        while let Some((key, prior)) = self.saved.pop() {
            // SAFETY: as in `apply`.
            match prior {
                Some(value) => unsafe { env::set_var(&key, value) },
                None => unsafe { env::remove_var(&key) },
            }
        }
        Ok(())
    }
}

/// Guard that keeps run options applied while it lives.
///
/// Revert runs exactly once: through [`RunOptionScope::release`], or on drop
/// for every other exit path, including an `apply` that failed half-way.
pub struct RunOptionScope<'a> {
    interpreter: &'a mut dyn RunOptionInterpreter,
    released: bool,
}

impl<'a> RunOptionScope<'a> {
    pub fn acquire(
        interpreter: &'a mut dyn RunOptionInterpreter,
        options: &RunOptions,
    ) -> Result<Self, RunError> {
        let scope = RunOptionScope {
            interpreter,
            released: false,
        };
        scope.interpreter.apply(options)?;
        Ok(scope)
    }

    /// Revert now and report the outcome.
    pub fn release(mut self) -> Result<(), RunError> {
        self.released = true;
        self.interpreter.revert()
    }
}

impl Drop for RunOptionScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.interpreter.revert() {
            warn!(err = %err, "failed to revert run options");
        }
    }
}
