//! The Invoker: one descriptor in, one result out, inside the current process.

use tracing::{debug, instrument};

use crate::core::bind::bind;
use crate::core::invocation::{InvocationDescriptor, InvocationResult};
use crate::core::types::BoundValue;
use crate::error::RunError;
use crate::io::config::InvokerConfig;
use crate::io::instrumentation::{Instrumentation, sink_path};
use crate::io::native::{DynamicLibraryLoader, LibraryLoader, LoadedLibrary};
use crate::io::run_option_interpreter::{
    EnvironmentInterpreter, RunOptionInterpreter, RunOptionScope,
};

/// Calls native functions described by [`InvocationDescriptor`]s.
///
/// Invocations share process-wide state (counters, run options), so an
/// Invoker runs them strictly one at a time.
pub struct Invoker {
    config: InvokerConfig,
    loader: Box<dyn LibraryLoader>,
    interpreter: Box<dyn RunOptionInterpreter>,
}

impl Invoker {
    /// Invoker using the dynamic linker and environment-variable run options.
    pub fn new(config: InvokerConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(DynamicLibraryLoader),
            Box::new(EnvironmentInterpreter::new()),
        )
    }

    pub fn with_parts(
        config: InvokerConfig,
        loader: Box<dyn LibraryLoader>,
        interpreter: Box<dyn RunOptionInterpreter>,
    ) -> Self {
        Self {
            config,
            loader,
            interpreter,
        }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    #[instrument(skip_all, fields(function = descriptor.function()))]
    pub fn invoke(
        &mut self,
        descriptor: &InvocationDescriptor,
    ) -> Result<InvocationResult, RunError> {
        let signature = descriptor.signature()?;
        let executable = descriptor.executable();

        let target = self.loader.load(&executable.library_path)?;
        let runtime = match &self.config.runtime_library {
            Some(path) => Some(self.loader.load(path)?),
            None => None,
        };
        let hooks = Instrumentation::new(runtime.as_deref().unwrap_or(target.as_ref()));
        hooks.reset()?;
        hooks.install(descriptor.perf_counters())?;

        let bound = bind(descriptor.arguments(), signature)?;
        let resolved = resolve_function_pointers(target.as_ref(), &bound)?;
        target.symbol_address(descriptor.function())?;

        let scope = RunOptionScope::acquire(self.interpreter.as_mut(), descriptor.run_options())?;
        let returned = target.call(descriptor.function(), signature.return_type, &resolved);
        let released = scope.release();
        let return_value = returned?;
        released?;
        debug!(?return_value, "call returned");

        let rows = hooks.harvest(&sink_path(executable, descriptor.function(), &bound))?;
        debug!(rows = rows.len(), "measurements harvested");
        Ok(InvocationResult::new(
            descriptor.clone(),
            return_value,
            rows,
        ))
    }
}

/// Replace function-pointer arguments with the addresses of their symbols.
fn resolve_function_pointers(
    library: &dyn LoadedLibrary,
    bound: &[BoundValue],
) -> Result<Vec<BoundValue>, RunError> {
    bound
        .iter()
        .map(|value| match value {
            BoundValue::Function(symbol) => library.symbol_address(symbol).map(BoundValue::Address),
            other => Ok(other.clone()),
        })
        .collect()
}
