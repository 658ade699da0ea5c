use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use super::failure::ContainmentFailure;
use crate::process::CancelToken;

/// Identifies a containment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Docker,
    Bubblewrap,
    None,
}

impl ProviderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::Docker => "docker",
            ProviderType::Bubblewrap => "bubblewrap",
            ProviderType::None => "none",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub name: String,
    pub description: String,
    /// 0 (no isolation) to 10 (hardware isolation).
    pub security_level: u8,
    pub requirements: Vec<String>,
}

/// Per-invocation sandbox request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub working_dir: Option<PathBuf>,
    /// Writable mounts; relative entries are anchored at `working_dir`.
    pub allowed_paths: Vec<PathBuf>,
    pub read_only_paths: Vec<PathBuf>,
    pub environment: BTreeMap<String, String>,
    /// 0 means the configured default.
    pub max_memory_mb: u32,
    /// 0 means the configured default.
    pub max_cpu_percent: u32,
    pub network_access: bool,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// 0 means no limit.
    pub timeout_seconds: u64,
}

impl ExecutionConfig {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    /// The working directory made absolute against the process cwd.
    pub(crate) fn absolute_working_dir(&self) -> Result<Option<PathBuf>, PrepareError> {
        self.working_dir.as_deref().map(absolutize).transpose()
    }

    /// Absolute form of `path`, anchored at the working directory when
    /// relative.
    pub(crate) fn anchor(&self, path: &Path) -> Result<PathBuf, PrepareError> {
        if path.is_absolute() {
            return absolutize(path);
        }
        match self.absolute_working_dir()? {
            Some(dir) => absolutize(&dir.join(path)),
            None => absolutize(path),
        }
    }

    /// Effective limit: the request when set, never above the configured cap.
    pub(crate) fn effective_limit(requested: u32, configured: u32) -> u32 {
        if requested > 0 {
            requested.min(configured)
        } else {
            configured
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, PrepareError> {
    let absolute = std::path::absolute(path).map_err(|e| PrepareError::InvalidPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(crate::bundle::fsops::lexical_clean(&absolute))
}

/// A fully specified subprocess invocation. The caller owns start and wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment, or the whole environment
    /// when `clear_env` is set.
    pub env: Vec<(String, String)>,
    pub clear_env: bool,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            clear_env: false,
            timeout: None,
        }
    }

    /// Builds a `tokio` command with piped output that dies with its handle.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.clear_env {
            cmd.env_clear();
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrepareError {
    #[error("no command specified")]
    NoCommand,

    #[error("invalid path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("{0} is not supported on this platform")]
    Unsupported(String),
}

/// A subprocess sandboxing strategy.
#[async_trait]
pub trait ContainmentProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Probes availability afresh; nothing is cached.
    async fn check_availability(&self, cancel: &CancelToken) -> Result<(), ContainmentFailure>;

    async fn is_available(&self, cancel: &CancelToken) -> bool {
        self.check_availability(cancel).await.is_ok()
    }

    fn prepare_command(&self, exec: &ExecutionConfig) -> Result<CommandSpec, PrepareError>;

    fn info(&self) -> ProviderInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_relative_paths() {
        let exec = ExecutionConfig {
            working_dir: Some(PathBuf::from("/work")),
            ..ExecutionConfig::new(["true"])
        };
        assert_eq!(exec.anchor(Path::new("data")).unwrap(), PathBuf::from("/work/data"));
        assert_eq!(exec.anchor(Path::new("../up")).unwrap(), PathBuf::from("/up"));
        assert_eq!(exec.anchor(Path::new("/abs")).unwrap(), PathBuf::from("/abs"));
    }

    #[test]
    fn test_relative_working_dir_is_not_doubled() {
        let cwd = std::env::current_dir().unwrap();
        let exec = ExecutionConfig {
            working_dir: Some(PathBuf::from("proj")),
            ..ExecutionConfig::new(["true"])
        };
        assert_eq!(exec.absolute_working_dir().unwrap(), Some(cwd.join("proj")));
        assert_eq!(exec.anchor(Path::new("data")).unwrap(), cwd.join("proj/data"));
        assert_eq!(ExecutionConfig::default().absolute_working_dir().unwrap(), None);
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(ExecutionConfig::effective_limit(0, 2048), 2048);
        assert_eq!(ExecutionConfig::effective_limit(512, 2048), 512);
        assert_eq!(ExecutionConfig::effective_limit(4096, 2048), 2048);
    }

    #[test]
    fn test_timeout() {
        let mut exec = ExecutionConfig::new(["sleep", "1"]);
        assert_eq!(exec.timeout(), None);
        exec.timeout_seconds = 3;
        assert_eq!(exec.timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_provider_type_serde() {
        assert_eq!(serde_json::to_value(ProviderType::Bubblewrap).unwrap(), "bubblewrap");
        assert_eq!(ProviderType::None.to_string(), "none");
    }
}
