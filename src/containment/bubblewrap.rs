//! Bubblewrap (`bwrap`) user-namespace provider. Linux only.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::failure::ContainmentFailure;
use super::provider::{
    CommandSpec, ContainmentProvider, ExecutionConfig, PrepareError, ProviderInfo, ProviderType,
};
use crate::config::ContainmentConfig;
use crate::process::{CancelToken, CommandLookup, CommandRunner, Invocation, ProcessError};

pub const BUBBLEWRAP_SECURITY_LEVEL: u8 = 5;

/// Mounted read-only when present on the host.
const SYSTEM_DIRS: [&str; 6] = ["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc"];

pub struct BubblewrapProvider {
    config: ContainmentConfig,
    lookup: Arc<dyn CommandLookup>,
    runner: Arc<dyn CommandRunner>,
}

impl BubblewrapProvider {
    pub fn new(
        config: ContainmentConfig,
        lookup: Arc<dyn CommandLookup>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            lookup,
            runner,
        }
    }

    fn bwrap_program(&self) -> PathBuf {
        self.lookup
            .look_path("bwrap")
            .unwrap_or_else(|| PathBuf::from("bwrap"))
    }
}

#[async_trait]
impl ContainmentProvider for BubblewrapProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Bubblewrap
    }

    async fn check_availability(&self, cancel: &CancelToken) -> Result<(), ContainmentFailure> {
        if !cfg!(target_os = "linux") {
            return Err(ContainmentFailure::bubblewrap_unavailable(
                "bubblewrap requires Linux user namespaces",
            ));
        }
        let Some(bwrap) = self.lookup.look_path("bwrap") else {
            return Err(ContainmentFailure::bubblewrap_unavailable(
                "'bwrap' not found in PATH",
            ));
        };

        let timeout = self.config.availability_timeout_seconds;
        let probe = Invocation::new(bwrap.to_string_lossy())
            .arg("--version")
            .timeout(Duration::from_secs(timeout));
        match self.runner.run(&probe, cancel).await {
            Ok(_) => Ok(()),
            Err(ProcessError::Timeout { .. }) => Err(ContainmentFailure::bubblewrap_unavailable(
                format!("'bwrap --version' exceeded {timeout}s"),
            )),
            Err(err) => Err(ContainmentFailure::bubblewrap_unavailable(err.to_string())),
        }
    }

    fn prepare_command(&self, exec: &ExecutionConfig) -> Result<CommandSpec, PrepareError> {
        if exec.command.is_empty() {
            return Err(PrepareError::NoCommand);
        }
        if !cfg!(target_os = "linux") {
            return Err(PrepareError::Unsupported("bubblewrap".into()));
        }

        let mut args: Vec<String> = vec![
            "--die-with-parent".into(),
            "--unshare-all".into(),
        ];
        if exec.network_access {
            args.push("--share-net".into());
        }

        for dir in SYSTEM_DIRS {
            if Path::new(dir).exists() {
                push_mount(&mut args, "--ro-bind", Path::new(dir));
            }
        }
        args.extend(
            ["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"]
                .into_iter()
                .map(String::from),
        );

        let working_dir = exec.absolute_working_dir()?;
        if let Some(dir) = &working_dir {
            push_mount(&mut args, "--bind", dir);
        }
        for path in &exec.allowed_paths {
            push_mount(&mut args, "--bind", &exec.anchor(path)?);
        }
        for path in &exec.read_only_paths {
            push_mount(&mut args, "--ro-bind", &exec.anchor(path)?);
        }

        for (key, value) in &exec.environment {
            args.push("--setenv".into());
            args.push(key.clone());
            args.push(value.clone());
        }
        if let Some(dir) = &working_dir {
            args.push("--chdir".into());
            args.push(dir.display().to_string());
        }

        args.push("--".into());
        args.extend(exec.command.iter().cloned());

        let mut spec = CommandSpec::new(self.bwrap_program());
        spec.args = args;
        spec.timeout = exec.timeout();
        Ok(spec)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: ProviderType::Bubblewrap,
            name: "Bubblewrap".into(),
            description: "Runs commands in unprivileged Linux namespaces with a minimal filesystem view"
                .into(),
            security_level: BUBBLEWRAP_SECURITY_LEVEL,
            requirements: vec![
                "Linux with unprivileged user namespaces".into(),
                "bwrap on PATH".into(),
                "memory and CPU limits are not enforced".into(),
            ],
        }
    }
}

fn push_mount(args: &mut Vec<String>, flag: &str, path: &Path) {
    let path = path.display().to_string();
    args.push(flag.into());
    args.push(path.clone());
    args.push(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containment::failure::FailureCode;
    use crate::process::{MockCommandLookup, MockCommandRunner};

    fn provider(lookup: MockCommandLookup, runner: MockCommandRunner) -> BubblewrapProvider {
        BubblewrapProvider::new(ContainmentConfig::default(), Arc::new(lookup), Arc::new(runner))
    }

    fn lookup_found() -> MockCommandLookup {
        let mut lookup = MockCommandLookup::new();
        lookup
            .expect_look_path()
            .returning(|_| Some(PathBuf::from("/usr/bin/bwrap")));
        lookup
    }

    #[tokio::test]
    async fn test_unavailable_without_binary() {
        let mut lookup = MockCommandLookup::new();
        lookup.expect_look_path().returning(|_| None);

        let err = provider(lookup, MockCommandRunner::new())
            .check_availability(&CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::BubblewrapUnavailable);
        assert!(err.is_degradable);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_available_when_version_succeeds() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv, _| inv.args == ["--version"])
            .returning(|_, _| Ok("bubblewrap 0.9.0".into()));

        assert!(provider(lookup_found(), runner).is_available(&CancelToken::new()).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_unavailable_when_version_fails() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _| {
            Err(ProcessError::Failed {
                program: "bwrap".into(),
                status: 1,
                output: "No permissions to create new namespace".into(),
            })
        });

        let err = provider(lookup_found(), runner)
            .check_availability(&CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.internal_details.unwrap().contains("namespace"));
    }

    #[test]
    fn test_prepare_rejects_empty_command() {
        let p = provider(lookup_found(), MockCommandRunner::new());
        assert_eq!(
            p.prepare_command(&ExecutionConfig::default()),
            Err(PrepareError::NoCommand)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_prepare_argument_vector() {
        let p = provider(lookup_found(), MockCommandRunner::new());
        let exec = ExecutionConfig {
            working_dir: Some(PathBuf::from("/work")),
            read_only_paths: vec![PathBuf::from("refs")],
            environment: [("HOME".to_string(), "/work".to_string())].into(),
            ..ExecutionConfig::new(["ls", "-la"])
        };

        let spec = p.prepare_command(&exec).unwrap();
        let args = spec.args.join(" ");
        assert!(args.starts_with("--die-with-parent --unshare-all "));
        assert!(!args.contains("--share-net"));
        assert!(args.contains("--proc /proc --dev /dev --tmpfs /tmp"));
        assert!(args.contains("--bind /work /work"));
        assert!(args.contains("--ro-bind /work/refs /work/refs"));
        assert!(args.contains("--setenv HOME /work"));
        assert!(args.ends_with("--chdir /work -- ls -la"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_prepare_shares_network_on_request() {
        let p = provider(lookup_found(), MockCommandRunner::new());
        let exec = ExecutionConfig {
            network_access: true,
            ..ExecutionConfig::new(["curl", "example.com"])
        };
        let spec = p.prepare_command(&exec).unwrap();
        assert!(spec.args.iter().any(|a| a == "--share-net"));
    }

    #[test]
    fn test_info() {
        let info = provider(lookup_found(), MockCommandRunner::new()).info();
        assert_eq!(info.security_level, 5);
    }
}
