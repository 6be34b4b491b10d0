//! Ordered batches of invocations and the execution-method seam.

use serde::{Deserialize, Serialize};

use crate::core::invocation::{InvocationDescriptor, InvocationResult};
use crate::error::RunError;

/// Strategy for where and how a batch actually runs.
///
/// Implementations must return exactly one result per descriptor, in order,
/// or fail the whole batch.
pub trait ExecutionMethod {
    fn execute(&self, batch: &RunBatch) -> Result<Vec<InvocationResult>, RunError>;
}

/// An ordered list of invocations and, once executed, their results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunBatch {
    invocations: Vec<InvocationDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<Vec<InvocationResult>>,
}

impl RunBatch {
    pub fn new(invocations: Vec<InvocationDescriptor>) -> Self {
        Self {
            invocations,
            results: None,
        }
    }

    pub fn invocations(&self) -> &[InvocationDescriptor] {
        &self.invocations
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// Results of the last successful `execute`, if any.
    pub fn results(&self) -> Option<&[InvocationResult]> {
        self.results.as_deref()
    }

    /// Run the batch through `method` and keep the results.
    ///
    /// The batch is atomic: a failed or mis-ordered execution leaves no
    /// results behind.
    pub fn execute(
        &mut self,
        method: &dyn ExecutionMethod,
    ) -> Result<&[InvocationResult], RunError> {
        self.results = None;
        let results = method.execute(self)?;
        check_results(&self.invocations, &results)?;
        Ok(self.results.insert(results).as_slice())
    }
}

/// Verify `results` answers `invocations` one-to-one and in order.
pub fn check_results(
    invocations: &[InvocationDescriptor],
    results: &[InvocationResult],
) -> Result<(), RunError> {
    if invocations.len() != results.len() {
        return Err(RunError::execution_method(format!(
            "expected {} results, got {}",
            invocations.len(),
            results.len()
        )));
    }
    for (index, (invocation, result)) in invocations.iter().zip(results).enumerate() {
        if !invocation.same_call(result.invocation()) {
            return Err(RunError::execution_method(format!(
                "result {index} answers '{}' but invocation {index} is '{}'",
                result.invocation().function(),
                invocation.function()
            )));
        }
    }
    Ok(())
}
