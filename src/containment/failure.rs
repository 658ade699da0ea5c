//! Structured containment failures.
//!
//! A [`ContainmentFailure`] carries a user-safe half (`message`,
//! `recovery_hint`) and an internal half (`internal_details`) that only ever
//! reaches structured logs. [`ContainmentFailure::to_response`] is the only
//! view handed to API consumers.

use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

use super::provider::{PrepareError, ProviderType};

/// Closed set of failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureCode {
    DockerBinaryNotFound,
    DockerDaemonNotRunning,
    DockerTimeout,
    BubblewrapUnavailable,
    NoContainmentAvailable,
    PrepareCommandFailed,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::DockerBinaryNotFound => "DockerBinaryNotFound",
            FailureCode::DockerDaemonNotRunning => "DockerDaemonNotRunning",
            FailureCode::DockerTimeout => "DockerTimeout",
            FailureCode::BubblewrapUnavailable => "BubblewrapUnavailable",
            FailureCode::NoContainmentAvailable => "NoContainmentAvailable",
            FailureCode::PrepareCommandFailed => "PrepareCommandFailed",
        }
    }

    /// Whether execution may continue at a lower security level.
    pub fn is_degradable(self) -> bool {
        !matches!(self, FailureCode::PrepareCommandFailed)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ContainmentFailure {
    pub code: FailureCode,
    pub provider: ProviderType,
    pub message: String,
    pub recovery_hint: String,
    /// Logs only; never part of a response.
    pub internal_details: Option<String>,
    pub is_degradable: bool,
}

/// What API consumers see of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResponse {
    pub code: FailureCode,
    pub provider: ProviderType,
    pub message: String,
    pub recovery_hint: String,
    pub is_degradable: bool,
}

impl ContainmentFailure {
    fn new(
        code: FailureCode,
        provider: ProviderType,
        message: impl Into<String>,
        recovery_hint: impl Into<String>,
        internal_details: Option<String>,
    ) -> Self {
        Self {
            code,
            provider,
            message: message.into(),
            recovery_hint: recovery_hint.into(),
            internal_details,
            is_degradable: code.is_degradable(),
        }
    }

    pub fn docker_binary_not_found() -> Self {
        Self::new(
            FailureCode::DockerBinaryNotFound,
            ProviderType::Docker,
            "Docker is not installed.",
            "Install Docker (https://docs.docker.com/get-docker/) and make sure `docker` is on PATH.",
            None,
        )
    }

    pub fn docker_daemon_not_running(details: impl Into<String>) -> Self {
        Self::new(
            FailureCode::DockerDaemonNotRunning,
            ProviderType::Docker,
            "Docker is installed but the daemon is not responding.",
            "Start Docker (e.g. `sudo systemctl start docker` or launch Docker Desktop) and retry.",
            Some(details.into()),
        )
    }

    pub fn docker_timeout(timeout_secs: u64) -> Self {
        Self::new(
            FailureCode::DockerTimeout,
            ProviderType::Docker,
            format!("Docker did not respond within {timeout_secs}s."),
            "Check that the Docker daemon is healthy, or raise CONTAINMENT_AVAILABILITY_TIMEOUT_SECONDS.",
            Some(format!("`docker info` exceeded {timeout_secs}s")),
        )
    }

    pub fn bubblewrap_unavailable(details: impl Into<String>) -> Self {
        Self::new(
            FailureCode::BubblewrapUnavailable,
            ProviderType::Bubblewrap,
            "Bubblewrap sandboxing is not available.",
            "Install bubblewrap (`bwrap`) and make sure unprivileged user namespaces are enabled.",
            Some(details.into()),
        )
    }

    pub fn no_containment_available() -> Self {
        Self::new(
            FailureCode::NoContainmentAvailable,
            ProviderType::None,
            "No sandbox provider is available.",
            "Install Docker or bubblewrap to run commands in isolation.",
            None,
        )
    }

    pub fn prepare_command_failed(provider: ProviderType, err: &PrepareError) -> Self {
        Self::new(
            FailureCode::PrepareCommandFailed,
            provider,
            format!("Could not prepare the sandboxed command: {err}"),
            "Check the command and paths passed to the sandbox.",
            Some(format!("{err:?}")),
        )
    }

    pub fn with_internal_details(mut self, details: impl Into<String>) -> Self {
        self.internal_details = Some(details.into());
        self
    }

    /// User-safe view without internal details.
    pub fn to_response(&self) -> FailureResponse {
        FailureResponse {
            code: self.code,
            provider: self.provider,
            message: self.message.clone(),
            recovery_hint: self.recovery_hint.clone(),
            is_degradable: self.is_degradable,
        }
    }

    /// Emits the structured `containment_*` log record.
    pub fn log(&self) {
        let details = self.internal_details.as_deref().unwrap_or("");
        if self.is_degradable {
            warn!(
                containment_code = %self.code,
                containment_provider = %self.provider,
                containment_message = %self.message,
                containment_degradable = self.is_degradable,
                containment_internal_details = details,
                "containment provider unavailable"
            );
        } else {
            error!(
                containment_code = %self.code,
                containment_provider = %self.provider,
                containment_message = %self.message,
                containment_degradable = self.is_degradable,
                containment_internal_details = details,
                "containment failure"
            );
        }
    }
}
