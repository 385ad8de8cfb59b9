//! Provider selection across a fallback chain.
//!
//! Selection is read-only: once a provider is picked, retries against it are
//! the pipeline's business, not this walker's.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::factory::ClientFactory;
use super::health::ProviderHealth;
use super::ClientRole;
use crate::error::{HermesError, Result};

/// How a candidate provider is checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HealthCheckMode {
    /// Credential present (or not required) and breaker not open
    #[default]
    Credentials,
    /// Additionally issue a lightweight request to the provider
    Probe,
}

/// Walks an ordered provider chain and returns the first healthy entry
pub struct ProviderFallback {
    factory: Arc<ClientFactory>,
    health: Arc<ProviderHealth>,
    mode: HealthCheckMode,
}

impl ProviderFallback {
    pub fn new(factory: Arc<ClientFactory>, health: Arc<ProviderHealth>) -> Self {
        Self {
            factory,
            health,
            mode: HealthCheckMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: HealthCheckMode) -> Self {
        self.mode = mode;
        self
    }

    /// First healthy provider in `chain`, as a canonical name.
    ///
    /// Entries are provider names, optionally with a model (`"groq:llama-3.3-70b"`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no provider in the chain is usable.
    pub async fn available_provider(&self, chain: &[String]) -> Result<String> {
        for candidate in chain {
            let provider = candidate.split_once(':').map_or(candidate.as_str(), |(p, _)| p);
            let Some(name) = self.factory.catalog().resolve_name(provider) else {
                warn!(provider = %candidate, "Skipping unknown provider in fallback chain");
                continue;
            };

            if self.is_healthy(&name).await {
                info!(provider = %name, "Selected provider from fallback chain");
                return Ok(name);
            }
            debug!(provider = %name, "Provider unavailable, trying next");
        }

        Err(HermesError::Configuration(format!(
            "No available provider in fallback chain [{}]",
            chain.join(", ")
        )))
    }

    async fn is_healthy(&self, provider: &str) -> bool {
        if !self.health.is_available(provider) {
            return false;
        }

        match self.factory.has_credential(provider).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(provider, error = %e, "Credential lookup failed");
                return false;
            }
        }

        if self.mode == HealthCheckMode::Credentials {
            return true;
        }

        let role = match self.factory.catalog().get(provider) {
            Some(spec) if !spec.supports_embeddings => ClientRole::Chat,
            _ => ClientRole::Embedding,
        };
        let client = match self.factory.create_client(provider, role).await {
            Ok(client) => client,
            Err(e) => {
                warn!(provider, error = %e, "Could not build client for health probe");
                return false;
            }
        };

        let outcome = client.probe().await;
        client.close().await;

        match outcome {
            Ok(()) => {
                self.health.record_success(provider);
                true
            }
            Err(e) => {
                warn!(provider, error = %e, "Health probe failed");
                self.health.record_failure(provider);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::provider::{
        ChatRequest, ChatResponse, ClientBinding, EmbeddingRequest, EmbeddingResponse,
        ProviderCatalog, ProviderError, TransportBuilder, TransportClient,
    };
    use crate::stores::InMemoryCredentialStore;
    use async_trait::async_trait;

    struct ProbeClient {
        provider: String,
        healthy: bool,
    }

    #[async_trait]
    impl TransportClient for ProbeClient {
        fn provider(&self) -> &str {
            &self.provider
        }

        async fn embed(&self, _: &EmbeddingRequest) -> std::result::Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse::default())
        }

        async fn chat(&self, _: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Err(ProviderError::connection("unused"))
        }

        async fn probe(&self) -> std::result::Result<(), ProviderError> {
            if self.healthy {
                Ok(())
            } else {
                Err(ProviderError::connection("connection refused"))
            }
        }
    }

    /// Every provider probes healthy except the ones listed
    struct ProbeBuilder {
        down: Vec<&'static str>,
    }

    impl TransportBuilder for ProbeBuilder {
        fn build(&self, binding: ClientBinding) -> Result<Box<dyn TransportClient>> {
            let provider = binding.spec.name.clone();
            let healthy = !self.down.contains(&provider.as_str());
            Ok(Box::new(ProbeClient { provider, healthy }))
        }
    }

    async fn build_fallback(secrets: &[&str], down: Vec<&'static str>) -> (ProviderFallback, Arc<ProviderHealth>) {
        let store = Arc::new(InMemoryCredentialStore::new());
        for provider in secrets {
            store.insert(provider, "key-000000000000").await;
        }
        let factory = ClientFactory::new(
            Arc::new(ProviderCatalog::seeded()),
            store,
            HttpConfig::default(),
        )
        .with_builder(Arc::new(ProbeBuilder { down }));
        let health = Arc::new(ProviderHealth::default());
        (ProviderFallback::new(Arc::new(factory), health.clone()), health)
    }

    fn chain(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_skips_providers_without_credentials() {
        let (fallback, _) = build_fallback(&["groq"], vec![]).await;
        let selected = fallback
            .available_provider(&chain(&["openai", "groq", "ollama"]))
            .await
            .unwrap();
        assert_eq!(selected, "groq");
    }

    #[tokio::test]
    async fn test_keyless_provider_is_always_a_candidate() {
        let (fallback, _) = build_fallback(&[], vec![]).await;
        let selected = fallback
            .available_provider(&chain(&["openai", "ollama"]))
            .await
            .unwrap();
        assert_eq!(selected, "ollama");
    }

    #[tokio::test]
    async fn test_skips_open_breakers_and_unknown_names() {
        let (fallback, health) = build_fallback(&["openai", "mistral"], vec![]).await;
        health.trip("openai");
        let selected = fallback
            .available_provider(&chain(&["made-up", "openai", "mistral"]))
            .await
            .unwrap();
        assert_eq!(selected, "mistral");
    }

    #[tokio::test]
    async fn test_probe_mode_checks_reachability() {
        let (fallback, health) = build_fallback(&["openai"], vec!["openai"]).await;
        let fallback = fallback.with_mode(HealthCheckMode::Probe);
        let selected = fallback
            .available_provider(&chain(&["openai", "ollama"]))
            .await
            .unwrap();
        assert_eq!(selected, "ollama");
        assert!(health.is_available("openai"));
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_configuration_error() {
        let (fallback, _) = build_fallback(&[], vec![]).await;
        let err = fallback
            .available_provider(&chain(&["openai", "anthropic"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HermesError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_entries_may_carry_models() {
        let (fallback, _) = build_fallback(&["groq"], vec![]).await;
        let selected = fallback
            .available_provider(&chain(&["openai:gpt-4o", "groq:llama-3.3-70b-versatile"]))
            .await
            .unwrap();
        assert_eq!(selected, "groq");
    }

    #[tokio::test]
    async fn test_alias_in_chain_returns_canonical_name() {
        let (fallback, _) = build_fallback(&["google"], vec![]).await;
        let selected = fallback
            .available_provider(&chain(&["gemini"]))
            .await
            .unwrap();
        assert_eq!(selected, "google");
    }
}
