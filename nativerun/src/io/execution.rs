//! Execution methods: where a batch actually runs.
//!
//! - [`DirectExecution`] calls the Invoker in this process.
//! - [`IsolatedExecution`] ships the batch to a launcher child process so a
//!   crashing native call cannot take the caller down.
//! - [`SelfContainedExecution`] packs everything the batch needs into an
//!   archive and hands it to a [`Delegator`], which may run it anywhere.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub use crate::core::batch::ExecutionMethod;
use crate::core::batch::{RunBatch, check_results};
use crate::core::invocation::{InvocationDescriptor, InvocationResult};
use crate::error::RunError;
use crate::io::config::{DelegatorKind, ExecutionConfig, InvokerConfig, LauncherConfig, MethodKind};
use crate::io::files::{expand_patterns, relative_to_root};
use crate::io::invoker::Invoker;
use crate::io::process::run_command_with_timeout;
use crate::io::transport::{pack_files, unpack_files};
use crate::io::wire::{BatchEnvelope, read_results, write_batch};

const BATCH_FILE: &str = "batch.json";
const RESULTS_FILE: &str = "results.json";

/// Progress of one out-of-process batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Packaged,
    Dispatched,
    Completed,
    Failed,
}

fn enter(state: BatchState) {
    debug!(?state, "batch state");
}

fn finish<T>(result: Result<T, RunError>) -> Result<T, RunError> {
    match &result {
        Ok(_) => enter(BatchState::Completed),
        Err(err) => {
            enter(BatchState::Failed);
            warn!(err = %err, "batch failed");
        }
    }
    result
}

/// Runs every invocation in this process, in order.
pub struct DirectExecution {
    invoker: RefCell<Invoker>,
}

impl DirectExecution {
    pub fn new(config: InvokerConfig) -> Self {
        Self::with_invoker(Invoker::new(config))
    }

    pub fn with_invoker(invoker: Invoker) -> Self {
        Self {
            invoker: RefCell::new(invoker),
        }
    }
}

impl ExecutionMethod for DirectExecution {
    #[instrument(skip_all, fields(invocations = batch.len()))]
    fn execute(&self, batch: &RunBatch) -> Result<Vec<InvocationResult>, RunError> {
        let mut invoker = self
            .invoker
            .try_borrow_mut()
            .map_err(|_| RunError::Runner("invoker is already running a batch".to_string()))?;
        batch
            .invocations()
            .iter()
            .map(|descriptor| invoker.invoke(descriptor))
            .collect()
    }
}

/// How the launcher child ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    /// Captured stdout and stderr.
    pub output: String,
}

impl LaunchOutcome {
    fn failure(&self, message: impl Into<String>) -> RunError {
        RunError::ExecutionMethod {
            message: message.into(),
            exit_code: self.exit_code,
            signal: self.signal,
            output: self.output.clone(),
        }
    }
}

/// Starts `<launcher> --batch <path> --results <path>` and waits for it.
pub trait CommandLauncher {
    fn launch(
        &self,
        batch_path: &Path,
        results_path: &Path,
        working_dir: Option<&Path>,
    ) -> Result<LaunchOutcome>;
}

/// [`CommandLauncher`] running the launcher as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    command: Vec<String>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl SubprocessLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self::from_config(&LauncherConfig {
            command,
            ..LauncherConfig::default()
        })
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl CommandLauncher for SubprocessLauncher {
    #[instrument(skip_all, fields(batch = %batch_path.display()))]
    fn launch(
        &self,
        batch_path: &Path,
        results_path: &Path,
        working_dir: Option<&Path>,
    ) -> Result<LaunchOutcome> {
        let (program, prefix) = self
            .command
            .split_first()
            .context("launcher command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .arg("--batch")
            .arg(batch_path)
            .arg("--results")
            .arg(results_path);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)?;
        Ok(LaunchOutcome {
            exit_code: output.status.code(),
            signal: output.signal(),
            timed_out: output.timed_out,
            output: output.combined_output(),
        })
    }
}

/// Fail unless the launcher ended normally and left a results file.
///
/// A zero exit status proves nothing: only a readable results file does.
fn check_launch(outcome: &LaunchOutcome, results_path: &Path) -> Result<(), RunError> {
    if outcome.timed_out {
        return Err(outcome.failure("launcher timed out"));
    }
    if outcome.signal.is_some() {
        return Err(outcome.failure("launcher was killed by a signal"));
    }
    if !results_path.is_file() {
        return Err(outcome.failure(format!(
            "launcher exited without writing {}",
            results_path.display()
        )));
    }
    Ok(())
}

fn collect_results(
    outcome: &LaunchOutcome,
    results_path: &Path,
) -> Result<Vec<InvocationResult>, RunError> {
    check_launch(outcome, results_path)?;
    read_results(results_path)
        .map_err(|e| outcome.failure(format!("{e:#}")))?
        .outcome
        .into_result()
}

/// Runs each batch in a launcher child process.
pub struct IsolatedExecution {
    config: InvokerConfig,
    work_dir: PathBuf,
    launcher: Box<dyn CommandLauncher>,
}

impl IsolatedExecution {
    pub fn new(
        config: InvokerConfig,
        work_dir: impl Into<PathBuf>,
        launcher: Box<dyn CommandLauncher>,
    ) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            launcher,
        }
    }

    fn run(&self, batch: &RunBatch) -> Result<Vec<InvocationResult>, RunError> {
        enter(BatchState::Pending);
        let scratch = scratch_dir(&self.work_dir).map_err(|e| RunError::from_io(&e))?;
        let batch_path = scratch.path().join(BATCH_FILE);
        let results_path = scratch.path().join(RESULTS_FILE);

        write_batch(&batch_path, &BatchEnvelope::new(self.config.clone(), batch.clone()))
            .map_err(|e| RunError::from_io(&e))?;
        remove_stale(&results_path).map_err(|e| RunError::from_io(&e))?;

        enter(BatchState::Dispatched);
        let outcome = self
            .launcher
            .launch(&batch_path, &results_path, None)
            .map_err(|e| RunError::from_io(&e))?;
        debug!(exit_code = ?outcome.exit_code, signal = ?outcome.signal, "launcher finished");
        collect_results(&outcome, &results_path)
    }
}

impl ExecutionMethod for IsolatedExecution {
    #[instrument(skip_all, fields(invocations = batch.len()))]
    fn execute(&self, batch: &RunBatch) -> Result<Vec<InvocationResult>, RunError> {
        info!("running batch in launcher process");
        finish(self.run(batch))
    }
}

fn scratch_dir(parent: &Path) -> Result<tempfile::TempDir> {
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    tempfile::Builder::new()
        .prefix("batch-")
        .tempdir_in(parent)
        .with_context(|| format!("create scratch directory in {}", parent.display()))
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove stale {}", path.display())),
    }
}

/// The far-side half of a self-contained execution.
///
/// Paths are relative to the directory the job runs in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub batch_file: PathBuf,
    pub results_file: PathBuf,
    pub output_patterns: Vec<String>,
    pub launcher: LauncherConfig,
}

impl RemoteJob {
    /// Unpack `archive` into `dir`, run the launcher there, and pack what it produced.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn run(&self, archive: &[u8], dir: &Path) -> Result<Vec<u8>, RunError> {
        unpack_files(archive, dir).map_err(|e| RunError::from_io(&e))?;
        let results_path = dir.join(&self.results_file);
        remove_stale(&results_path).map_err(|e| RunError::from_io(&e))?;

        let outcome = SubprocessLauncher::from_config(&self.launcher)
            .launch(&self.batch_file, &self.results_file, Some(dir))
            .map_err(|e| RunError::from_io(&e))?;
        check_launch(&outcome, &results_path)?;

        let mut patterns = self.output_patterns.clone();
        patterns.push(self.results_file.to_string_lossy().into_owned());
        let outputs = expand_patterns(dir, &patterns).map_err(|e| RunError::from_io(&e))?;
        debug!(outputs = outputs.len(), "collected outputs");
        pack_files(dir, &outputs).map_err(|e| RunError::from_io(&e))
    }
}

/// Carries an input archive to wherever a [`RemoteJob`] runs and returns its output archive.
///
/// Timeouts, transfer retries and remote placement are the delegator's business.
pub trait Delegator {
    fn delegate(&self, archive: Vec<u8>, job: &RemoteJob) -> Result<Vec<u8>, RunError>;
}

/// Runs the job directly in the transport root.
#[derive(Debug, Clone)]
pub struct InPlaceDelegator {
    root: PathBuf,
}

impl InPlaceDelegator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Delegator for InPlaceDelegator {
    fn delegate(&self, archive: Vec<u8>, job: &RemoteJob) -> Result<Vec<u8>, RunError> {
        job.run(&archive, &self.root)
    }
}

/// Runs the job in a fresh temporary directory, standing in for a remote host.
#[derive(Debug, Clone, Default)]
pub struct TempDirDelegator;

impl Delegator for TempDirDelegator {
    fn delegate(&self, archive: Vec<u8>, job: &RemoteJob) -> Result<Vec<u8>, RunError> {
        let dir = tempfile::Builder::new()
            .prefix("nativerun-remote-")
            .tempdir()
            .context("create remote directory")
            .map_err(|e| RunError::from_io(&e))?;
        job.run(&archive, dir.path())
    }
}

/// Packs a batch with its inputs, delegates it, and unpacks the outputs.
pub struct SelfContainedExecution {
    root: PathBuf,
    work_dir: PathBuf,
    config: InvokerConfig,
    launcher: LauncherConfig,
    delegator: Box<dyn Delegator>,
}

impl SelfContainedExecution {
    /// `root` is the transport root every transported path is relative to;
    /// `work_dir` (relative to it) holds the batch and results files.
    pub fn new(
        root: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        config: InvokerConfig,
        launcher: LauncherConfig,
        delegator: Box<dyn Delegator>,
    ) -> Self {
        Self {
            root: root.into(),
            work_dir: work_dir.into(),
            config,
            launcher,
            delegator,
        }
    }

    /// Copy of `batch` whose executables and extra file patterns point inside
    /// the transport root.
    fn rebase(&self, batch: &RunBatch) -> Result<RunBatch, RunError> {
        let mut rebased = Vec::with_capacity(batch.len());
        for descriptor in batch.invocations() {
            let executable = descriptor.executable().rebased(&self.root).ok_or_else(|| {
                RunError::execution_method(format!(
                    "{} lies outside transport root {}",
                    descriptor.executable().library_path.display(),
                    self.root.display()
                ))
            })?;
            let inputs = self.rebase_patterns(descriptor.extra_input_files())?;
            let outputs = self.rebase_patterns(descriptor.extra_output_files())?;
            rebased.push(
                descriptor
                    .with_executable(Arc::new(executable))
                    .with_extra_files(inputs, outputs),
            );
        }
        Ok(RunBatch::new(rebased))
    }

    fn rebase_patterns(&self, patterns: &[String]) -> Result<Vec<String>, RunError> {
        patterns
            .iter()
            .map(|pattern| {
                let relative = relative_to_root(&self.root, Path::new(pattern)).map_err(|e| {
                    RunError::execution_method(format!(
                        "file pattern '{pattern}' lies outside transport root: {e:#}"
                    ))
                })?;
                if relative.as_os_str().is_empty() {
                    return Err(RunError::execution_method(format!(
                        "file pattern '{pattern}' names the transport root itself"
                    )));
                }
                Ok(relative.to_string_lossy().into_owned())
            })
            .collect()
    }

    fn run(&self, batch: &RunBatch) -> Result<Vec<InvocationResult>, RunError> {
        enter(BatchState::Pending);
        let io = |e: anyhow::Error| RunError::from_io(&e);
        let rebased = self.rebase(batch)?;

        let scratch = scratch_dir(&self.root.join(&self.work_dir)).map_err(io)?;
        let scratch_relative = relative_to_root(&self.root, scratch.path()).map_err(io)?;
        let batch_file = scratch_relative.join(BATCH_FILE);
        let results_file = scratch_relative.join(RESULTS_FILE);
        write_batch(
            &self.root.join(&batch_file),
            &BatchEnvelope::new(self.config.clone(), rebased.clone()),
        )
        .map_err(io)?;

        let mut inputs = rebased.compute_input_files(&self.root).map_err(io)?;
        inputs.push(batch_file.clone());
        let archive = pack_files(&self.root, &inputs).map_err(io)?;
        enter(BatchState::Packaged);

        let job = RemoteJob {
            batch_file,
            results_file: results_file.clone(),
            output_patterns: output_patterns(&rebased),
            launcher: self.launcher.clone(),
        };
        enter(BatchState::Dispatched);
        let returned = self.delegator.delegate(archive, &job)?;

        unpack_files(&returned, &self.root).map_err(io)?;
        let results_path = self.root.join(&results_file);
        if !results_path.is_file() {
            return Err(RunError::execution_method(format!(
                "returned archive holds no {}",
                results_file.display()
            )));
        }
        let results = read_results(&results_path).map_err(io)?.outcome.into_result()?;

        check_results(rebased.invocations(), &results)?;
        Ok(results
            .into_iter()
            .zip(batch.invocations())
            .map(|(result, original)| result.with_invocation(original.clone()))
            .collect())
    }
}

fn output_patterns(batch: &RunBatch) -> Vec<String> {
    let mut patterns: Vec<String> = batch
        .invocations()
        .iter()
        .flat_map(InvocationDescriptor::extra_output_files)
        .cloned()
        .collect();
    patterns.sort();
    patterns.dedup();
    patterns
}

impl ExecutionMethod for SelfContainedExecution {
    #[instrument(skip_all, fields(invocations = batch.len(), root = %self.root.display()))]
    fn execute(&self, batch: &RunBatch) -> Result<Vec<InvocationResult>, RunError> {
        info!("running batch through transport");
        finish(self.run(batch))
    }
}

/// Build the execution method `config.method` names.
pub fn execution_method_from_config(config: &ExecutionConfig) -> Result<Box<dyn ExecutionMethod>> {
    config.validate()?;
    let method: Box<dyn ExecutionMethod> = match config.method {
        MethodKind::Direct => Box::new(DirectExecution::new(config.invoker.clone())),
        MethodKind::Isolated => Box::new(IsolatedExecution::new(
            config.invoker.clone(),
            config.work_dir.clone(),
            Box::new(SubprocessLauncher::from_config(&config.launcher)),
        )),
        MethodKind::SelfContained => {
            let root = std::env::current_dir().context("resolve transport root")?;
            let delegator: Box<dyn Delegator> = match config.transport.delegator {
                DelegatorKind::InPlace => Box::new(InPlaceDelegator::new(root.clone())),
                DelegatorKind::TempDir => Box::new(TempDirDelegator),
            };
            Box::new(SelfContainedExecution::new(
                root,
                config.work_dir.clone(),
                config.invoker.clone(),
                config.launcher.clone(),
                delegator,
            ))
        }
    };
    Ok(method)
}
