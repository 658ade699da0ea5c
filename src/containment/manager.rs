//! Provider selection.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::assessment::assess_security_level;
use super::bubblewrap::BubblewrapProvider;
use super::docker::DockerProvider;
use super::failure::ContainmentFailure;
use super::fallback::FallbackProvider;
use super::provider::{ContainmentProvider, ProviderInfo, ProviderType};
use crate::config::ContainmentConfig;
use crate::process::{CancelToken, CommandLookup, CommandRunner};

/// Result of probing one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCheck {
    pub provider_type: ProviderType,
    pub available: bool,
    pub reason: String,
    pub failure: Option<ContainmentFailure>,
}

pub struct ProviderDecision {
    pub selected: Arc<dyn ContainmentProvider>,
    pub selected_type: ProviderType,
    pub reason: String,
    /// Every provider probed, in order. The fallback is not probed.
    pub checked: Vec<ProviderCheck>,
    pub used_fallback: bool,
}

impl ProviderDecision {
    /// The first probe failure, i.e. the one from the most preferred provider.
    pub fn primary_failure(&self) -> Option<&ContainmentFailure> {
        self.checked.iter().find_map(|c| c.failure.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainmentStatus {
    pub active_provider: ProviderType,
    pub available_providers: Vec<ProviderType>,
    pub security_level: u8,
    pub warnings: Vec<String>,
}

/// Holds the ordered providers, the fallback and the config. Holds no
/// per-call state, so concurrent calls probe independently.
pub struct Manager {
    providers: Vec<Arc<dyn ContainmentProvider>>,
    fallback: Arc<dyn ContainmentProvider>,
    config: ContainmentConfig,
}

impl Manager {
    pub fn new(
        providers: Vec<Arc<dyn ContainmentProvider>>,
        fallback: Arc<dyn ContainmentProvider>,
        config: ContainmentConfig,
    ) -> Self {
        Self {
            providers,
            fallback,
            config,
        }
    }

    /// Docker and Bubblewrap ordered by `prefer_docker`, plus the no-op
    /// fallback.
    pub fn with_defaults(
        config: ContainmentConfig,
        lookup: Arc<dyn CommandLookup>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let docker: Arc<dyn ContainmentProvider> = Arc::new(DockerProvider::new(
            config.clone(),
            Arc::clone(&lookup),
            Arc::clone(&runner),
        ));
        let bwrap: Arc<dyn ContainmentProvider> =
            Arc::new(BubblewrapProvider::new(config.clone(), lookup, runner));
        let providers = if config.prefer_docker {
            vec![docker, bwrap]
        } else {
            vec![bwrap, docker]
        };
        Self::new(providers, Arc::new(FallbackProvider), config)
    }

    pub fn config(&self) -> &ContainmentConfig {
        &self.config
    }

    pub async fn decide_provider(&self, cancel: &CancelToken) -> ProviderDecision {
        let mut checked = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let provider_type = provider.provider_type();
            match provider.check_availability(cancel).await {
                Ok(()) => {
                    checked.push(ProviderCheck {
                        provider_type,
                        available: true,
                        reason: "available".into(),
                        failure: None,
                    });
                    debug!(provider = %provider_type, "containment provider selected");
                    return ProviderDecision {
                        selected: Arc::clone(provider),
                        selected_type: provider_type,
                        reason: format!("{provider_type} is available"),
                        checked,
                        used_fallback: false,
                    };
                }
                Err(failure) => {
                    debug!(provider = %provider_type, code = %failure.code, "containment provider unavailable");
                    checked.push(ProviderCheck {
                        provider_type,
                        available: false,
                        reason: failure.message.clone(),
                        failure: Some(failure),
                    });
                }
            }
        }

        ProviderDecision {
            selected: Arc::clone(&self.fallback),
            selected_type: self.fallback.provider_type(),
            reason: "no containment provider available; using fallback".into(),
            checked,
            used_fallback: true,
        }
    }

    pub async fn select_provider(&self, cancel: &CancelToken) -> Arc<dyn ContainmentProvider> {
        self.decide_provider(cancel).await.selected
    }

    pub async fn status(&self, cancel: &CancelToken) -> ContainmentStatus {
        let decision = self.decide_provider(cancel).await;
        let level = decision.selected.info().security_level;
        let assessment = assess_security_level(decision.selected_type, level);

        let mut available_providers: Vec<ProviderType> = decision
            .checked
            .iter()
            .filter(|c| c.available)
            .map(|c| c.provider_type)
            .collect();
        available_providers.push(self.fallback.provider_type());

        let mut warnings = assessment.warnings;
        warnings.extend(self.config.validate_warnings());

        ContainmentStatus {
            active_provider: decision.selected_type,
            available_providers,
            security_level: level,
            warnings,
        }
    }

    /// Every provider including the fallback; unavailable ones get
    /// `" (unavailable)"` appended to their name.
    pub async fn list_providers(&self, cancel: &CancelToken) -> Vec<ProviderInfo> {
        let mut infos = Vec::with_capacity(self.providers.len() + 1);
        for provider in self.providers.iter().chain(std::iter::once(&self.fallback)) {
            let mut info = provider.info();
            if !provider.is_available(cancel).await {
                info.name.push_str(" (unavailable)");
            }
            infos.push(info);
        }
        infos
    }
}
