//! Subprocess seams shared by the packager and the containment layer.
//!
//! Everything that shells out (toolchains, `docker info`, `bwrap --version`)
//! goes through [`CommandRunner`], and every `PATH` probe goes through
//! [`CommandLookup`]. Production code uses [`SystemRunner`] and
//! [`SystemLookup`]; tests substitute mocks so no host tool is touched.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Errors visible to callers of a [`CommandRunner`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("'{0}' not found in PATH")]
    NotFound(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with status {status}: {output}")]
    Failed {
        program: String,
        status: i32,
        output: String,
    },

    #[error("'{program}' timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("operation cancelled")]
    Cancelled,
}

/// A fully described subprocess invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Value of an environment entry set on this invocation.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// `PATH` lookup.
#[cfg_attr(test, mockall::automock)]
pub trait CommandLookup: Send + Sync {
    fn look_path(&self, name: &str) -> Option<PathBuf>;
}

/// Runs a subprocess to completion and returns its combined stdout+stderr.
///
/// A nonzero exit becomes [`ProcessError::Failed`] carrying the trimmed
/// combined output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation, cancel: &CancelToken)
    -> Result<String, ProcessError>;
}

/// Looks binaries up in the process `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl CommandLookup for SystemLookup {
    fn look_path(&self, name: &str) -> Option<PathBuf> {
        let candidate = Path::new(name);
        if candidate.components().count() > 1 {
            return is_executable(candidate).then(|| candidate.to_path_buf());
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var).find_map(|dir| {
            executable_names(name)
                .into_iter()
                .map(|n| dir.join(n))
                .find(|p| is_executable(p))
        })
    }
}

#[cfg(windows)]
fn executable_names(name: &str) -> Vec<String> {
    if Path::new(name).extension().is_some() {
        return vec![name.to_string()];
    }
    ["exe", "cmd", "bat"]
        .iter()
        .map(|ext| format!("{name}.{ext}"))
        .collect()
}

#[cfg(not(windows))]
fn executable_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[cfg(unix)]
pub(crate) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub(crate) fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
    ) -> Result<String, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let program = invocation.program.clone();
        debug!(program = %program, args = ?invocation.args, "running command");

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future (timeout or cancellation) kills the child.
            .kill_on_drop(true);
        if let Some(dir) = &invocation.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound(program.clone())
            } else {
                ProcessError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let limit = invocation.timeout;
        let wait = async move {
            let waited = match limit {
                Some(after) => match tokio::time::timeout(after, child.wait_with_output()).await {
                    Ok(result) => result,
                    Err(_) => return Err(ProcessError::Timeout { program, after }),
                },
                None => child.wait_with_output().await,
            };
            match waited {
                Ok(output) => Ok((program, output)),
                Err(source) => Err(ProcessError::Spawn { program, source }),
            }
        };

        let (program, output) = tokio::select! {
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
            result = wait => result?,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ProcessError::Failed {
                program,
                status: output.status.code().unwrap_or(-1),
                output: combined.trim().to_string(),
            })
        }
    }
}

/// Shared cancellation signal threaded through every blocking call.
///
/// Cloning shares the underlying flag; cancelling any clone cancels all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("go")
            .arg("build")
            .args(["-o", "out"])
            .env("GOOS", "linux")
            .env("GOOS", "darwin")
            .current_dir("/src");

        assert_eq!(inv.program, "go");
        assert_eq!(inv.args, vec!["build", "-o", "out"]);
        assert_eq!(inv.env_value("GOOS"), Some("darwin"));
        assert_eq!(inv.env_value("GOARCH"), None);
        assert_eq!(inv.dir, Some(PathBuf::from("/src")));
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_runner_rejects_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let err = SystemRunner
            .run(&Invocation::new("true"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
    }

    #[tokio::test]
    async fn test_runner_reports_missing_binary() {
        let err = SystemRunner
            .run(
                &Invocation::new("definitely-not-a-real-binary-7f3a"),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_combines_output_on_failure() {
        let inv = Invocation::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let err = SystemRunner
            .run(&inv, &CancelToken::new())
            .await
            .unwrap_err();
        match err {
            ProcessError::Failed { status, output, .. } => {
                assert_eq!(status, 3);
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_times_out() {
        let inv = Invocation::new("sleep")
            .arg("10")
            .timeout(Duration::from_millis(100));
        let err = SystemRunner
            .run(&inv, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_lookup_finds_sh() {
        assert!(SystemLookup.look_path("sh").is_some());
        assert!(SystemLookup.look_path("definitely-not-a-real-binary-7f3a").is_none());
    }
}
