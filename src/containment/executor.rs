use std::time::Duration;
use tracing::{info, warn};

use super::assessment::{assess_security_level, decide_on_containment_failure};
use super::failure::ContainmentFailure;
use super::manager::Manager;
use super::provider::{CommandSpec, ExecutionConfig, ProviderType};
use crate::process::CancelToken;

/// Per-stream cap on captured output.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command cancelled")]
    Cancelled,
}

/// Runs a prepared command to completion. The child is killed when the
/// timeout elapses or `cancel` fires.
pub async fn run_prepared(spec: &CommandSpec, cancel: &CancelToken) -> Result<ExecOutput, ExecError> {
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }
    let child = spec.to_command().spawn().map_err(|source| ExecError::Spawn {
        program: spec.program.display().to_string(),
        source,
    })?;

    let wait = async {
        match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecError::Timeout(limit)),
            None => Ok(child.wait_with_output().await),
        }
    };

    let waited = tokio::select! {
        res = wait => res?,
        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
    };
    let output = waited.map_err(|source| ExecError::Spawn {
        program: spec.program.display().to_string(),
        source,
    })?;

    let (stdout, out_cut) = truncate(&output.stdout);
    let (stderr, err_cut) = truncate(&output.stderr);
    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code: output.status.code().unwrap_or(-1),
        truncated: out_cut || err_cut,
    })
}

fn truncate(bytes: &[u8]) -> (String, bool) {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    let mut text = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned();
    text.push_str(&format!("\n\n[Output truncated, {} bytes total]", bytes.len()));
    (text, true)
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandboxed execution aborted: {reason}")]
    Aborted {
        reason: String,
        failure: ContainmentFailure,
    },

    #[error(transparent)]
    Prepare(ContainmentFailure),

    #[error("sandboxed execution cancelled")]
    Cancelled,
}

impl SandboxError {
    /// The containment failure behind the error; `None` when cancelled.
    pub fn failure(&self) -> Option<&ContainmentFailure> {
        match self {
            SandboxError::Aborted { failure, .. } | SandboxError::Prepare(failure) => Some(failure),
            SandboxError::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedExecution {
    pub provider: ProviderType,
    pub security_level: u8,
    pub spec: CommandSpec,
    /// User-facing warnings about weakened isolation.
    pub warnings: Vec<String>,
}

/// Selects a provider, applies the degradation policy when only the
/// fallback remains, and prepares the command.
pub async fn prepare_sandboxed(
    manager: &Manager,
    exec: &ExecutionConfig,
    cancel: &CancelToken,
) -> Result<PreparedExecution, SandboxError> {
    let decision = manager.decide_provider(cancel).await;
    // Probes report cancellation as unavailability; never degrade on it.
    if cancel.is_cancelled() {
        return Err(SandboxError::Cancelled);
    }
    let mut warnings = Vec::new();

    if decision.used_fallback {
        let failure = decision
            .primary_failure()
            .cloned()
            .unwrap_or_else(ContainmentFailure::no_containment_available);
        failure.log();

        let degrade = decide_on_containment_failure(manager.config(), failure);
        if !degrade.should_continue {
            return Err(SandboxError::Aborted {
                reason: degrade.reason,
                failure: degrade.original_failure,
            });
        }
        warn!(reason = %degrade.reason, "continuing without containment");
        warnings.extend(degrade.warning_for_user);
    }

    let provider = decision.selected;
    let info = provider.info();
    let assessment = assess_security_level(decision.selected_type, info.security_level);
    if !decision.used_fallback {
        warnings.extend(assessment.warnings);
    }

    let spec = provider.prepare_command(exec).map_err(|err| {
        let failure = ContainmentFailure::prepare_command_failed(decision.selected_type, &err);
        failure.log();
        SandboxError::Prepare(failure)
    })?;

    info!(
        provider = %decision.selected_type,
        security_level = info.security_level,
        "prepared sandboxed command"
    );
    Ok(PreparedExecution {
        provider: decision.selected_type,
        security_level: info.security_level,
        spec,
        warnings,
    })
}
