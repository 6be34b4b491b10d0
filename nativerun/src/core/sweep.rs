//! Argument sweeps: named cross products expanded into descriptors.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::invocation::InvocationDescriptor;
use crate::core::signature::Executable;
use crate::core::types::Scalar;
use crate::error::RunError;

/// A map of names to scalars: one argument set or one run-option set.
pub type ScalarMap = BTreeMap<String, Scalar>;

/// Named cross product of value lists.
///
/// The first name varies slowest. An empty parameter list yields one empty
/// map; a name with no values yields nothing.
pub fn arg_map<N, V>(parameters: impl IntoIterator<Item = (N, V)>) -> Vec<ScalarMap>
where
    N: Into<String>,
    V: IntoIterator<Item = Scalar>,
{
    let expanded: Vec<Vec<ScalarMap>> = parameters
        .into_iter()
        .map(|(name, values)| {
            let name = name.into();
            values
                .into_iter()
                .map(|value| ScalarMap::from([(name.clone(), value)]))
                .collect()
        })
        .collect();
    arg_product(&expanded)
}

/// Cross product of several lists of maps, merging each combination.
///
/// Later lists override keys of earlier ones.
pub fn arg_product(lists: &[Vec<ScalarMap>]) -> Vec<ScalarMap> {
    lists.iter().fold(vec![ScalarMap::new()], |acc, list| {
        acc.iter()
            .flat_map(|left| {
                list.iter().map(move |right| {
                    let mut merged = left.clone();
                    merged.extend(right.iter().map(|(k, v)| (k.clone(), v.clone())));
                    merged
                })
            })
            .collect()
    })
}

/// Every combination of executables, functions, arguments, run options and
/// counter sets, expanded into validated descriptors.
#[derive(Debug, Clone)]
pub struct Sweep {
    executables: Vec<Arc<Executable>>,
    functions: Vec<String>,
    arguments: Vec<ScalarMap>,
    run_options: Vec<ScalarMap>,
    default_run_options: Vec<ScalarMap>,
    perf_counters: Vec<Vec<String>>,
}

impl Sweep {
    pub fn new<I, S>(executables: Vec<Arc<Executable>>, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executables,
            functions: functions.into_iter().map(Into::into).collect(),
            arguments: vec![ScalarMap::new()],
            run_options: vec![ScalarMap::new()],
            default_run_options: vec![ScalarMap::new()],
            perf_counters: vec![Vec::new()],
        }
    }

    pub fn arguments(mut self, arguments: Vec<ScalarMap>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn run_options(mut self, run_options: Vec<ScalarMap>) -> Self {
        self.run_options = run_options;
        self
    }

    /// Defaults merged under every run-option set; several default sets
    /// multiply the sweep.
    pub fn default_run_options(mut self, defaults: Vec<ScalarMap>) -> Self {
        self.default_run_options = defaults;
        self
    }

    /// One counter set: every descriptor collects all of these together.
    pub fn perf_counters<I, S>(mut self, counters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.perf_counters = vec![counters.into_iter().map(Into::into).collect()];
        self
    }

    /// Several counter sets: one descriptor per set.
    pub fn perf_counter_sets(mut self, sets: Vec<Vec<String>>) -> Self {
        self.perf_counters = sets;
        self
    }

    /// Expand into descriptors, validating each one.
    pub fn descriptors(&self) -> Result<Vec<InvocationDescriptor>, RunError> {
        let full_run_options =
            arg_product(&[self.default_run_options.clone(), self.run_options.clone()]);
        if full_run_options.is_empty() {
            return Err(RunError::InvalidRunOption(
                "run-option sweep has no combinations".to_string(),
            ));
        }

        let mut descriptors = Vec::new();
        for executable in &self.executables {
            for function in &self.functions {
                for arguments in &self.arguments {
                    for run_options in &full_run_options {
                        for counters in &self.perf_counters {
                            let descriptor =
                                InvocationDescriptor::builder(Arc::clone(executable), function)
                                    .arguments(arguments.clone())
                                    .run_options(run_options.clone())
                                    .perf_counters(counters.iter().cloned())
                                    .build()?;
                            descriptors.push(descriptor);
                        }
                    }
                }
            }
        }
        Ok(descriptors)
    }
}
