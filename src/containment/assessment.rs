//! Security-level assessment and the continue-or-abort decision taken when
//! containment is unavailable.

use serde::Serialize;

use super::failure::{ContainmentFailure, FailureCode};
use super::provider::ProviderType;
use crate::config::ContainmentConfig;

/// Lowest security level considered adequate.
pub const MIN_ADEQUATE_LEVEL: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityAssessment {
    pub level: u8,
    pub adequate: bool,
    pub warnings: Vec<String>,
}

pub fn assess_security_level(provider_type: ProviderType, level: u8) -> SecurityAssessment {
    let mut warnings = Vec::new();
    let adequate = if provider_type == ProviderType::None || level == 0 {
        warnings.push(
            "No OS-level isolation is in effect: commands run directly on the host. \
             Install Docker to enable sandboxed execution."
                .to_string(),
        );
        false
    } else if level < MIN_ADEQUATE_LEVEL {
        warnings.push(format!(
            "Containment provider '{provider_type}' offers only security level {level}/10. \
             Install Docker for stronger isolation."
        ));
        false
    } else {
        true
    };
    SecurityAssessment {
        level,
        adequate,
        warnings,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationDecision {
    pub should_continue: bool,
    pub reason: String,
    pub warning_for_user: Option<String>,
    pub security_level: u8,
    pub original_failure: ContainmentFailure,
}

/// Continue without containment only when fallback is allowed and the
/// failure is degradable.
pub fn decide_on_containment_failure(
    config: &ContainmentConfig,
    failure: ContainmentFailure,
) -> DegradationDecision {
    if !config.allow_fallback {
        return DegradationDecision {
            should_continue: false,
            reason: format!(
                "containment is required (CONTAINMENT_ALLOW_FALLBACK=false) but {} prevents sandboxed execution",
                failure.code
            ),
            warning_for_user: None,
            security_level: 0,
            original_failure: failure,
        };
    }
    if !failure.is_degradable {
        return DegradationDecision {
            should_continue: false,
            reason: format!("{} is not degradable; aborting", failure.code),
            warning_for_user: None,
            security_level: 0,
            original_failure: failure,
        };
    }

    let warning = match failure.code {
        FailureCode::DockerBinaryNotFound => {
            "Docker is not installed, so commands run without isolation. Install Docker to enable sandboxed execution."
        }
        FailureCode::DockerDaemonNotRunning => {
            "Docker is not running, so commands run without isolation. Start Docker to enable sandboxed execution."
        }
        FailureCode::DockerTimeout => {
            "Docker is slow; consider increasing the timeout (CONTAINMENT_AVAILABILITY_TIMEOUT_SECONDS). Commands run without isolation meanwhile."
        }
        _ => "No sandbox is available, so commands run without isolation.",
    };
    DegradationDecision {
        should_continue: true,
        reason: format!("{} is degradable and fallback is allowed", failure.code),
        warning_for_user: Some(warning.to_string()),
        security_level: 0,
        original_failure: failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containment::provider::PrepareError;

    fn config(allow_fallback: bool) -> ContainmentConfig {
        ContainmentConfig {
            allow_fallback,
            ..ContainmentConfig::default()
        }
    }

    #[test]
    fn test_assessment_levels() {
        let a = assess_security_level(ProviderType::None, 0);
        assert!(!a.adequate);
        assert!(a.warnings[0].contains("Install Docker"));

        let a = assess_security_level(ProviderType::Bubblewrap, 3);
        assert!(!a.adequate);
        assert!(a.warnings[0].contains("3/10"));

        let a = assess_security_level(ProviderType::Bubblewrap, 5);
        assert!(a.adequate && a.warnings.is_empty());

        let a = assess_security_level(ProviderType::Docker, 7);
        assert!(a.adequate && a.warnings.is_empty());
    }

    #[test]
    fn test_degradable_failure_continues_with_code_specific_warning() {
        let d = decide_on_containment_failure(
            &config(true),
            ContainmentFailure::docker_binary_not_found(),
        );
        assert!(d.should_continue);
        assert_eq!(d.security_level, 0);
        assert!(d.warning_for_user.unwrap().contains("Install"));

        let d = decide_on_containment_failure(
            &config(true),
            ContainmentFailure::docker_daemon_not_running("x"),
        );
        assert!(d.warning_for_user.unwrap().contains("Start Docker"));

        let d = decide_on_containment_failure(&config(true), ContainmentFailure::docker_timeout(5));
        assert!(d.warning_for_user.unwrap().contains("increasing the timeout"));

        let d = decide_on_containment_failure(
            &config(true),
            ContainmentFailure::bubblewrap_unavailable("x"),
        );
        assert!(d.should_continue);
        assert!(d.warning_for_user.is_some());
    }

    #[test]
    fn test_fallback_disallowed_aborts_every_failure() {
        let failures = [
            ContainmentFailure::docker_binary_not_found(),
            ContainmentFailure::docker_daemon_not_running("x"),
            ContainmentFailure::docker_timeout(5),
            ContainmentFailure::bubblewrap_unavailable("x"),
            ContainmentFailure::no_containment_available(),
        ];
        for failure in failures {
            let d = decide_on_containment_failure(&config(false), failure);
            assert!(!d.should_continue);
            assert!(d.reason.contains("CONTAINMENT_ALLOW_FALLBACK"));
            assert!(d.warning_for_user.is_none());
        }
    }

    #[test]
    fn test_non_degradable_always_aborts() {
        for allow in [true, false] {
            let failure =
                ContainmentFailure::prepare_command_failed(ProviderType::Docker, &PrepareError::NoCommand);
            let d = decide_on_containment_failure(&config(allow), failure);
            assert!(!d.should_continue);
            assert_eq!(d.original_failure.code, FailureCode::PrepareCommandFailed);
        }
    }
}
