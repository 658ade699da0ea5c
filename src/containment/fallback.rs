//! No-isolation provider used when nothing better is available.

use async_trait::async_trait;

use super::failure::ContainmentFailure;
use super::provider::{
    CommandSpec, ContainmentProvider, ExecutionConfig, PrepareError, ProviderInfo, ProviderType,
};
use crate::process::CancelToken;

/// Runs the command directly. Always available; enforces no limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackProvider;

#[async_trait]
impl ContainmentProvider for FallbackProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::None
    }

    async fn check_availability(&self, _cancel: &CancelToken) -> Result<(), ContainmentFailure> {
        Ok(())
    }

    fn prepare_command(&self, exec: &ExecutionConfig) -> Result<CommandSpec, PrepareError> {
        let Some((program, args)) = exec.command.split_first() else {
            return Err(PrepareError::NoCommand);
        };

        let mut spec = CommandSpec::new(program);
        spec.args = args.to_vec();
        spec.working_dir = exec.absolute_working_dir()?;
        spec.env = exec
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        spec.timeout = exec.timeout();
        Ok(spec)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: ProviderType::None,
            name: "No containment".into(),
            description: "Runs commands directly on the host without isolation".into(),
            security_level: 0,
            requirements: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_always_available_at_level_zero() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(FallbackProvider.is_available(&cancel).await);
        assert_eq!(FallbackProvider.info().security_level, 0);
        assert_eq!(FallbackProvider.provider_type(), ProviderType::None);
    }

    #[test]
    fn test_prepare_plain_command() {
        let exec = ExecutionConfig {
            working_dir: Some(PathBuf::from("/work")),
            environment: [("RUST_LOG".to_string(), "debug".to_string())].into(),
            max_memory_mb: 128,
            ..ExecutionConfig::new(["cargo", "test"])
        };
        let spec = FallbackProvider.prepare_command(&exec).unwrap();
        assert_eq!(spec.program, PathBuf::from("cargo"));
        assert_eq!(spec.args, vec!["test"]);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/work")));
        assert_eq!(spec.env, vec![("RUST_LOG".to_string(), "debug".to_string())]);
        assert!(!spec.clear_env);
    }

    #[test]
    fn test_relative_working_dir_resolves_against_cwd() {
        let exec = ExecutionConfig {
            working_dir: Some(PathBuf::from("proj")),
            ..ExecutionConfig::new(["ls"])
        };
        let spec = FallbackProvider.prepare_command(&exec).unwrap();
        let expected = std::env::current_dir().unwrap().join("proj");
        assert_eq!(spec.working_dir, Some(expected));
    }

    #[test]
    fn test_prepare_rejects_empty_command() {
        assert_eq!(
            FallbackProvider.prepare_command(&ExecutionConfig::default()),
            Err(PrepareError::NoCommand)
        );
    }
}
