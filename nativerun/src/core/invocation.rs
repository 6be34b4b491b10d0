//! Invocation descriptors and the results they produce.

use std::sync::Arc;

use globset::Glob;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::bind::{Arguments, bind};
use crate::core::run_options::{RunOptions, validate_run_options};
use crate::core::signature::{Executable, FunctionSignature};
use crate::core::types::Scalar;
use crate::error::RunError;

/// One validated request to call one function of one executable.
///
/// Construct through [`InvocationDescriptor::builder`]; `build` validates
/// eagerly so a malformed request never reaches a process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationDescriptor {
    executable: Arc<Executable>,
    function: String,
    arguments: Arguments,
    perf_counters: Vec<String>,
    run_options: RunOptions,
    extra_input_files: Vec<String>,
    extra_output_files: Vec<String>,
}

impl InvocationDescriptor {
    pub fn builder(
        executable: Arc<Executable>,
        function: impl Into<String>,
    ) -> InvocationDescriptorBuilder {
        InvocationDescriptorBuilder {
            descriptor: InvocationDescriptor {
                executable,
                function: function.into(),
                arguments: Arguments::new(),
                perf_counters: Vec::new(),
                run_options: RunOptions::new(),
                extra_input_files: Vec::new(),
                extra_output_files: Vec::new(),
            },
        }
    }

    pub fn executable(&self) -> &Arc<Executable> {
        &self.executable
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn perf_counters(&self) -> &[String] {
        &self.perf_counters
    }

    pub fn run_options(&self) -> &RunOptions {
        &self.run_options
    }

    pub fn extra_input_files(&self) -> &[String] {
        &self.extra_input_files
    }

    pub fn extra_output_files(&self) -> &[String] {
        &self.extra_output_files
    }

    /// Signature of the target function, or the "missing prototype" error.
    pub fn signature(&self) -> Result<&FunctionSignature, RunError> {
        self.executable.signature(&self.function).ok_or_else(|| {
            RunError::Runner(format!(
                "couldn't find a prototype for '{}'; options are [{}]. Was it declared extern \"C\"?",
                self.function,
                self.executable.function_names()
            ))
        })
    }

    /// Re-run the construction-time checks.
    ///
    /// Deserialized descriptors skip the builder, so the launcher calls this
    /// before executing anything it read from disk.
    pub fn validate(&self) -> Result<(), RunError> {
        let signature = self.signature()?;
        bind(&self.arguments, signature)?;
        for counter in &self.perf_counters {
            if counter.trim().is_empty() || counter.contains('\0') {
                return Err(RunError::InvalidInvocation(format!(
                    "performance counter names must be non-empty text, got '{}'",
                    counter.escape_default()
                )));
            }
        }
        validate_run_options(&self.run_options)?;
        for pattern in self
            .extra_input_files
            .iter()
            .chain(&self.extra_output_files)
        {
            if pattern.is_empty() {
                return Err(RunError::InvalidInvocation(
                    "file patterns must be non-empty".to_string(),
                ));
            }
            Glob::new(pattern).map_err(|e| {
                RunError::InvalidInvocation(format!("invalid file pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Library plus extra input patterns, before glob expansion.
    pub fn input_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .executable
            .compute_input_files()
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect();
        patterns.extend(self.extra_input_files.iter().cloned());
        patterns
    }

    /// Copy of this descriptor pointing at a different executable.
    pub fn with_executable(&self, executable: Arc<Executable>) -> InvocationDescriptor {
        InvocationDescriptor {
            executable,
            ..self.clone()
        }
    }

    /// Copy of this descriptor with different extra input and output patterns.
    pub fn with_extra_files(
        &self,
        extra_input_files: Vec<String>,
        extra_output_files: Vec<String>,
    ) -> InvocationDescriptor {
        InvocationDescriptor {
            extra_input_files,
            extra_output_files,
            ..self.clone()
        }
    }

    /// Whether `other` asks for the same call, ignoring where files live.
    pub fn same_call(&self, other: &InvocationDescriptor) -> bool {
        self.function == other.function
            && self.arguments == other.arguments
            && self.run_options == other.run_options
            && self.perf_counters == other.perf_counters
    }
}

/// Builder for [`InvocationDescriptor`].
#[derive(Debug, Clone)]
pub struct InvocationDescriptorBuilder {
    descriptor: InvocationDescriptor,
}

impl InvocationDescriptorBuilder {
    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.descriptor
            .arguments
            .insert(name.into(), value.into());
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.descriptor.arguments.extend(arguments);
        self
    }

    pub fn perf_counters<I, S>(mut self, counters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .perf_counters
            .extend(counters.into_iter().map(Into::into));
        self
    }

    pub fn run_option(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.descriptor
            .run_options
            .insert(name.into(), value.into());
        self
    }

    pub fn run_options(mut self, options: RunOptions) -> Self {
        self.descriptor.run_options.extend(options);
        self
    }

    pub fn extra_input_files<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .extra_input_files
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn extra_output_files<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .extra_output_files
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Validate and freeze the descriptor.
    pub fn build(self) -> Result<InvocationDescriptor, RunError> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }
}

/// One measurement row, keyed by column name in the order the columns were written.
pub type MeasurementRow = IndexMap<String, String>;

/// Return value and measurements of one completed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    invocation: InvocationDescriptor,
    return_value: Option<Scalar>,
    measurement_rows: Vec<MeasurementRow>,
}

impl InvocationResult {
    pub fn new(
        invocation: InvocationDescriptor,
        return_value: Option<Scalar>,
        measurement_rows: Vec<MeasurementRow>,
    ) -> Self {
        Self {
            invocation,
            return_value,
            measurement_rows,
        }
    }

    pub fn invocation(&self) -> &InvocationDescriptor {
        &self.invocation
    }

    pub fn return_value(&self) -> Option<&Scalar> {
        self.return_value.as_ref()
    }

    pub fn measurement_rows(&self) -> &[MeasurementRow] {
        &self.measurement_rows
    }

    /// Column names of the first row; empty when nothing was measured.
    pub fn field_names(&self) -> Vec<&str> {
        self.measurement_rows
            .first()
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Same result, re-associated with the descriptor the caller submitted.
    pub fn with_invocation(self, invocation: InvocationDescriptor) -> Self {
        Self { invocation, ..self }
    }
}
