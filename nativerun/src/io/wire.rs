//! Batch and results files exchanged with the launcher.
//!
//! Both are JSON envelopes carrying [`WIRE_VERSION`]; a reader refuses any
//! other version instead of guessing at the layout.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::batch::RunBatch;
use crate::core::invocation::InvocationResult;
use crate::error::RunError;
use crate::io::config::InvokerConfig;
use crate::io::files::write_atomic;

pub const WIRE_VERSION: u32 = 1;

/// Request message: the Invoker configuration and the batch to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub version: u32,
    pub config: InvokerConfig,
    pub batch: RunBatch,
}

impl BatchEnvelope {
    pub fn new(config: InvokerConfig, batch: RunBatch) -> Self {
        Self {
            version: WIRE_VERSION,
            config,
            batch,
        }
    }
}

/// What the launcher produced for a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Completed(Vec<InvocationResult>),
    Failed(RunError),
}

impl Outcome {
    pub fn into_result(self) -> Result<Vec<InvocationResult>, RunError> {
        match self {
            Outcome::Completed(results) => Ok(results),
            Outcome::Failed(err) => Err(err),
        }
    }
}

impl From<Result<Vec<InvocationResult>, RunError>> for Outcome {
    fn from(result: Result<Vec<InvocationResult>, RunError>) -> Self {
        match result {
            Ok(results) => Outcome::Completed(results),
            Err(err) => Outcome::Failed(err),
        }
    }
}

/// Response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsEnvelope {
    pub version: u32,
    pub outcome: Outcome,
}

impl ResultsEnvelope {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            version: WIRE_VERSION,
            outcome,
        }
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

/// Parse JSON after checking its `version` field.
fn decode_versioned<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    let header: VersionHeader =
        serde_json::from_slice(bytes).with_context(|| format!("parse {what} version"))?;
    if header.version != WIRE_VERSION {
        bail!(
            "{what} has wire version {}, expected {WIRE_VERSION}",
            header.version
        );
    }
    serde_json::from_slice(bytes).with_context(|| format!("parse {what}"))
}

#[instrument(skip_all, fields(path = %path.display(), invocations = envelope.batch.len()))]
pub fn write_batch(path: &Path, envelope: &BatchEnvelope) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(envelope).context("serialize batch")?;
    write_atomic(path, &bytes)?;
    debug!(bytes = bytes.len(), "batch file written");
    Ok(())
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_batch(path: &Path) -> Result<BatchEnvelope> {
    let bytes = fs::read(path).with_context(|| format!("read batch {}", path.display()))?;
    decode_versioned(&bytes, "batch file")
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_results(path: &Path, envelope: &ResultsEnvelope) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(envelope).context("serialize results")?;
    write_atomic(path, &bytes)?;
    debug!(bytes = bytes.len(), "results file written");
    Ok(())
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_results(path: &Path) -> Result<ResultsEnvelope> {
    let bytes = fs::read(path).with_context(|| format!("read results {}", path.display()))?;
    decode_versioned(&bytes, "results file")
}
