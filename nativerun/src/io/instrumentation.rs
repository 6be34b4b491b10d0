//! Instrumentation hooks: counter setup before a call and measurement harvest after.
//!
//! The runtime exposes four C functions. Any of them may be absent; an absent
//! hook means the runtime does not measure that aspect.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::core::invocation::MeasurementRow;
use crate::core::signature::Executable;
use crate::core::types::{BoundValue, Scalar, TypeTag};
use crate::error::RunError;
use crate::io::native::LoadedLibrary;

pub const CLEAR_STATS: &str = "clear_stats";
pub const CLEAR_PERF_COUNTERS: &str = "clear_perf_counters";
pub const ADD_PERF_COUNTER: &str = "add_perf_counter";
pub const WRITE_STATS: &str = "write_stats";

/// Hooks of one instrumentation runtime.
pub struct Instrumentation<'a> {
    runtime: &'a dyn LoadedLibrary,
}

impl<'a> Instrumentation<'a> {
    pub fn new(runtime: &'a dyn LoadedLibrary) -> Self {
        Self { runtime }
    }

    /// Clear counters and collected statistics. Safe to call repeatedly.
    #[instrument(skip_all)]
    pub fn reset(&self) -> Result<(), RunError> {
        for hook in [CLEAR_PERF_COUNTERS, CLEAR_STATS] {
            if self.runtime.has_symbol(hook) {
                self.runtime.call(hook, None, &[])?;
            } else {
                debug!(hook, "runtime has no hook");
            }
        }
        Ok(())
    }

    /// Ask the runtime to collect each named counter.
    #[instrument(skip_all, fields(count = counters.len()))]
    pub fn install(&self, counters: &[String]) -> Result<(), RunError> {
        if counters.is_empty() {
            return Ok(());
        }
        if !self.runtime.has_symbol(ADD_PERF_COUNTER) {
            return Err(RunError::UnknownPerformanceCounter(format!(
                "{} (runtime {} cannot collect counters)",
                counters.join(", "),
                self.runtime.path().display()
            )));
        }
        for counter in counters {
            let accepted = self.runtime.call(
                ADD_PERF_COUNTER,
                Some(TypeTag::Bool),
                &[BoundValue::Text(counter.clone())],
            )?;
            if accepted != Some(Scalar::Bool(true)) {
                return Err(RunError::UnknownPerformanceCounter(counter.clone()));
            }
        }
        Ok(())
    }

    /// Have the runtime write its statistics to `sink` and read them back.
    ///
    /// A runtime without `write_stats`, or one that writes nothing, yields no rows.
    #[instrument(skip_all, fields(sink = %sink.display()))]
    pub fn harvest(&self, sink: &Path) -> Result<Vec<MeasurementRow>, RunError> {
        if !self.runtime.has_symbol(WRITE_STATS) {
            return Ok(Vec::new());
        }
        match fs::remove_file(sink) {
            Ok(()) => debug!("removed stale measurement file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RunError::Runner(format!(
                    "remove stale measurements {}: {e}",
                    sink.display()
                )));
            }
        }
        self.runtime.call(
            WRITE_STATS,
            None,
            &[BoundValue::Text(sink.to_string_lossy().into_owned())],
        )?;
        read_measurements(sink)
    }
}

/// Longest file name most filesystems accept, in bytes.
const MAX_FILE_NAME: usize = 255;

/// `<build_dir>/<sink stem>.<function>(<arg>, <arg>).csv`
///
/// A name longer than [`MAX_FILE_NAME`] is cut short and tagged with a hash
/// of the full name, so distinct calls still get distinct files.
pub fn sink_path(executable: &Executable, function: &str, arguments: &[BoundValue]) -> PathBuf {
    let rendered = arguments
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let stem = format!("{}.{function}({rendered})", executable.sink_stem())
        .replace(['/', '\0'], "_");
    executable.build_directory.join(bounded_file_name(&stem, "csv"))
}

fn bounded_file_name(stem: &str, extension: &str) -> String {
    let full = format!("{stem}.{extension}");
    if full.len() <= MAX_FILE_NAME {
        return full;
    }
    let mut hasher = Sha256::new();
    hasher.update(stem.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..8]);
    let mut keep = MAX_FILE_NAME - digest.len() - extension.len() - 2;
    while !stem.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}~{digest}.{extension}", &stem[..keep])
}

/// Read a measurement file; missing or empty files hold zero rows.
pub fn read_measurements(path: &Path) -> Result<Vec<MeasurementRow>, RunError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(RunError::Runner(format!(
                "open measurements {}: {e}",
                path.display()
            )));
        }
    };
    let mut reader = csv::Reader::from_reader(file);
    let malformed =
        |e: csv::Error| RunError::Runner(format!("read measurements {}: {e}", path.display()));
    let headers = reader.headers().map_err(malformed)?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );
    }
    Ok(rows)
}
