//! Execution configuration stored as TOML (conventionally `nativerun.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::files::write_atomic;

/// Which execution method a batch runs through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Direct,
    #[default]
    Isolated,
    SelfContained,
}

/// Which delegator a configured self-contained method hands archives to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DelegatorKind {
    InPlace,
    #[default]
    TempDir,
}

/// Execution configuration (TOML).
///
/// Missing fields default to running every batch in an isolated child process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub method: MethodKind,

    /// Directory holding the batch and results wire files.
    pub work_dir: PathBuf,

    pub launcher: LauncherConfig,
    pub invoker: InvokerConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LauncherConfig {
    /// Argv prefix of the companion launcher (e.g. `["nativerun"]`).
    pub command: Vec<String>,

    /// Wall-clock limit for one launcher run; 0 disables it.
    pub timeout_secs: u64,

    /// Truncate captured launcher stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Settings the Invoker needs; shipped inside every batch file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct InvokerConfig {
    /// Separately loaded instrumentation runtime. When absent the hooks are
    /// looked up in the target library.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_library: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TransportConfig {
    pub delegator: DelegatorKind,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            command: vec!["nativerun".to_string()],
            timeout_secs: 0,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            method: MethodKind::default(),
            work_dir: PathBuf::from(".nativerun"),
            launcher: LauncherConfig::default(),
            invoker: InvokerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(anyhow!("work_dir must be non-empty"));
        }
        if self.launcher.output_limit_bytes == 0 {
            return Err(anyhow!("launcher.output_limit_bytes must be > 0"));
        }
        if self.launcher.command.is_empty() || self.launcher.command[0].trim().is_empty() {
            return Err(anyhow!("launcher.command must be a non-empty array"));
        }
        if let Some(runtime) = &self.invoker.runtime_library
            && runtime.as_os_str().is_empty()
        {
            return Err(anyhow!("invoker.runtime_library must be non-empty when set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ExecutionConfig::default()`.
pub fn load_config(path: &Path) -> Result<ExecutionConfig> {
    if !path.exists() {
        let cfg = ExecutionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ExecutionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ExecutionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ExecutionConfig::default());
        assert_eq!(cfg.method, MethodKind::Isolated);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nativerun.toml");
        let mut cfg = ExecutionConfig::default();
        cfg.method = MethodKind::SelfContained;
        cfg.invoker.runtime_library = Some(PathBuf::from("/opt/lib/libstats.so"));
        cfg.transport.delegator = DelegatorKind::InPlace;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nativerun.toml");
        fs::write(&path, "method = \"direct\"\n[launcher]\ntimeout_secs = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.method, MethodKind::Direct);
        assert_eq!(cfg.launcher.timeout_secs, 5);
        assert_eq!(cfg.launcher.command, vec!["nativerun".to_string()]);
    }

    #[test]
    fn rejects_empty_launcher_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nativerun.toml");
        fs::write(&path, "[launcher]\ncommand = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("launcher.command"));
    }
}
