//! Docker container provider.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::failure::ContainmentFailure;
use super::provider::{
    CommandSpec, ContainmentProvider, ExecutionConfig, PrepareError, ProviderInfo, ProviderType,
};
use crate::config::ContainmentConfig;
use crate::process::{CancelToken, CommandLookup, CommandRunner, Invocation, ProcessError};

pub const DOCKER_SECURITY_LEVEL: u8 = 7;

/// Docker's CPU quota for 100% of one core is 100000 µs per period.
const CPU_QUOTA_PER_PERCENT: u64 = 1000;

pub struct DockerProvider {
    config: ContainmentConfig,
    lookup: Arc<dyn CommandLookup>,
    runner: Arc<dyn CommandRunner>,
}

impl DockerProvider {
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

    /// Two-phase probe: `docker` on PATH, then `docker info` answering
    /// within the availability timeout.
    pub async fn check_docker_availability(
        &self,
        cancel: &CancelToken,
    ) -> Result<(), ContainmentFailure> {
        let Some(docker) = self.lookup.look_path("docker") else {
            return Err(ContainmentFailure::docker_binary_not_found());
        };

        let timeout = self.config.availability_timeout_seconds;
        let probe = Invocation::new(docker.to_string_lossy())
            .args(["info", "--format", "{{.ServerVersion}}"])
            .timeout(Duration::from_secs(timeout));

        match self.runner.run(&probe, cancel).await {
            Ok(version) => {
                debug!(version = %version.trim(), "docker daemon reachable");
                Ok(())
            }
            Err(ProcessError::NotFound(_)) => Err(ContainmentFailure::docker_binary_not_found()),
            Err(ProcessError::Timeout { .. }) => Err(ContainmentFailure::docker_timeout(timeout)),
            Err(ProcessError::Cancelled) => Err(ContainmentFailure::docker_timeout(timeout)
                .with_internal_details("availability probe cancelled")),
            Err(ProcessError::Failed { output, .. }) => {
                Err(ContainmentFailure::docker_daemon_not_running(output))
            }
            Err(err @ ProcessError::Spawn { .. }) => {
                Err(ContainmentFailure::docker_daemon_not_running(err.to_string()))
            }
        }
    }

    fn docker_program(&self) -> PathBuf {
        self.lookup
            .look_path("docker")
            .unwrap_or_else(|| PathBuf::from("docker"))
    }
}

#[async_trait]
impl ContainmentProvider for DockerProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Docker
    }

    async fn check_availability(&self, cancel: &CancelToken) -> Result<(), ContainmentFailure> {
        self.check_docker_availability(cancel).await
    }

    fn prepare_command(&self, exec: &ExecutionConfig) -> Result<CommandSpec, PrepareError> {
        if exec.command.is_empty() {
            return Err(PrepareError::NoCommand);
        }

        let mut args: Vec<String> = vec!["run".into(), "--rm".into()];

        if self.config.no_new_privileges {
            args.push("--security-opt=no-new-privileges:true".into());
        }
        if self.config.drop_all_capabilities {
            args.push("--cap-drop=ALL".into());
        }
        if self.config.read_only_root_fs {
            args.push("--read-only".into());
        }

        if let Some(dir) = exec.absolute_working_dir()? {
            let dir = dir.display();
            args.push("-v".into());
            args.push(format!("{dir}:{dir}"));
            args.push("-w".into());
            args.push(dir.to_string());
        }
        for path in &exec.allowed_paths {
            let path = exec.anchor(path)?;
            args.push("-v".into());
            args.push(format!("{0}:{0}", path.display()));
        }
        for path in &exec.read_only_paths {
            let path = exec.anchor(path)?;
            args.push("-v".into());
            args.push(format!("{0}:{0}:ro", path.display()));
        }

        for (key, value) in &exec.environment {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }

        let memory =
            ExecutionConfig::effective_limit(exec.max_memory_mb, self.config.max_memory_mb);
        if memory > 0 {
            args.push(format!("--memory={memory}m"));
            args.push(format!("--memory-swap={memory}m"));
        }
        let cpu = ExecutionConfig::effective_limit(exec.max_cpu_percent, self.config.max_cpu_percent);
        if cpu > 0 {
            args.push(format!("--cpu-quota={}", u64::from(cpu) * CPU_QUOTA_PER_PERCENT));
        }

        if !exec.network_access {
            args.push("--network=none".into());
        }

        args.extend(self.config.extra_docker_args.iter().cloned());
        args.push(self.config.docker_image.clone());
        args.extend(exec.command.iter().cloned());

        let mut spec = CommandSpec::new(self.docker_program());
        spec.args = args;
        spec.timeout = exec.timeout();
        Ok(spec)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: ProviderType::Docker,
            name: "Docker".into(),
            description: format!(
                "Runs commands in disposable '{}' containers with dropped capabilities and resource limits",
                self.config.docker_image
            ),
            security_level: DOCKER_SECURITY_LEVEL,
            requirements: vec![
                "docker CLI on PATH".into(),
                "running Docker daemon".into(),
            ],
        }
    }
}
