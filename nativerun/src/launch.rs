//! The launcher: the child-process side of isolated execution.
//!
//! Reads a batch file, runs every invocation in this process, and writes a
//! results file. Invocation errors travel inside the results file; only a
//! batch file that can't be read, or a results file that can't be written,
//! leaves no results behind.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::batch::{ExecutionMethod, RunBatch};
use crate::core::invocation::InvocationResult;
use crate::error::RunError;
use crate::io::execution::DirectExecution;
use crate::io::wire::{Outcome, ResultsEnvelope, read_batch, write_results};

/// Run the batch in `batch_path` and write its outcome to `results_path`.
#[instrument(skip_all, fields(batch = %batch_path.display(), results = %results_path.display()))]
pub fn run_launcher(batch_path: &Path, results_path: &Path) -> Result<Outcome> {
    let envelope = read_batch(batch_path)?;
    debug!(invocations = envelope.batch.len(), "batch read");

    let method = DirectExecution::new(envelope.config);
    let outcome = Outcome::from(run_validated(&envelope.batch, &method));
    match &outcome {
        Outcome::Completed(results) => info!(results = results.len(), "batch completed"),
        Outcome::Failed(err) => info!(err = %err, "batch failed"),
    }

    write_results(results_path, &ResultsEnvelope::new(outcome.clone()))
        .with_context(|| format!("write results {}", results_path.display()))?;
    Ok(outcome)
}

/// Descriptors arrive deserialized, so they skip the builder's checks.
fn run_validated(
    batch: &RunBatch,
    method: &dyn ExecutionMethod,
) -> Result<Vec<InvocationResult>, RunError> {
    for descriptor in batch.invocations() {
        descriptor.validate()?;
    }
    method.execute(batch)
}
