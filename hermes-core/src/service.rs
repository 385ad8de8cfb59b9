//! Public entry points: single embedding, batch embedding and chat completion.
//!
//! Callers never touch configuration or credential wiring directly; a
//! [`HermesService`] is assembled once from [`HermesConfig`] and collaborator
//! stores, then shared.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::completion::CompletionRunner;
use crate::config::{HermesConfig, PipelineConfig};
use crate::embedding::{
    BatchEmbedder, BatchItem, BatchResult, ProgressCallback, RetryConfig, RunOptions, text_preview,
};
use crate::error::{ErrorKind, HermesError, Result};
use crate::provider::{
    ChatResponse, ClientFactory, ClientRole, HealthCheckMode, HealthConfig, Message,
    ProviderCatalog, ProviderFallback, ProviderHealth, TransportBuilder,
};
use crate::rate_limit::RateLimiter;
use crate::resolver::{ConfigResolver, ServiceConfig};
use crate::stores::{
    ConfigStore, CredentialStore, EnvCredentialStore, InMemoryConfigStore, TracingUsageSink,
    UsageSink,
};

/// Embedding and chat completion service
pub struct HermesService {
    pipeline: PipelineConfig,
    catalog: Arc<ProviderCatalog>,
    resolver: ConfigResolver,
    factory: Arc<ClientFactory>,
    fallback: ProviderFallback,
    fallback_chains: HashMap<String, Vec<String>>,
    health: Arc<ProviderHealth>,
    embedder: BatchEmbedder,
    completion: CompletionRunner,
}

impl HermesService {
    pub fn builder(config: HermesConfig) -> HermesServiceBuilder {
        HermesServiceBuilder::new(config)
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    pub fn health(&self) -> &Arc<ProviderHealth> {
        &self.health
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Setup errors surface as-is; a provider failure becomes
    /// `HermesError::Embedding` with the same kind a batch would record.
    pub async fn create_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self
            .embed(vec![text.to_string()], RunOptions::default())
            .await?;

        if let Some(embedding) = result.embeddings.pop() {
            return Ok(embedding);
        }

        Err(match result.failed_items.pop() {
            Some(failure) => HermesError::Embedding {
                kind: failure.error_kind,
                message: failure.error_message,
                text_preview: failure.text_preview,
            },
            None => HermesError::Embedding {
                kind: ErrorKind::ValidationError,
                message: "No embedding returned".to_string(),
                text_preview: text_preview(text, self.pipeline.text_preview_chars),
            },
        })
    }

    /// Embed many texts, reporting progress after each batch.
    ///
    /// # Errors
    ///
    /// Only configuration and credential problems are returned as errors;
    /// per-item failures are recorded in the result.
    pub async fn create_embeddings_batch(
        &self,
        texts: Vec<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<BatchResult> {
        let options = RunOptions {
            progress,
            ..Default::default()
        };
        self.embed(texts, options).await
    }

    /// Like [`create_embeddings_batch`](Self::create_embeddings_batch) with
    /// full control over cancellation.
    pub async fn create_embeddings_batch_with(
        &self,
        texts: Vec<String>,
        options: RunOptions,
    ) -> Result<BatchResult> {
        self.embed(texts, options).await
    }

    async fn embed(&self, texts: Vec<String>, options: RunOptions) -> Result<BatchResult> {
        if texts.is_empty() {
            return Ok(BatchResult::new(0));
        }

        let config = self.resolver.resolve(&self.pipeline.embedding_service).await?;
        let config = self.select_target(config).await?;
        let client = self
            .factory
            .create_client(&config.provider, ClientRole::Embedding)
            .await?;

        let result = self
            .embedder
            .run(BatchItem::from_texts(texts), &config, client.as_ref(), options)
            .await;
        client.close().await;
        Ok(result)
    }

    /// Run a chat completion.
    ///
    /// `model` overrides the chat service's configured model. A bare model
    /// name stays on the service's provider; `"provider:model"` switches
    /// provider as well.
    ///
    /// # Errors
    ///
    /// Returns setup errors, or `HermesError::Provider` once retries are exhausted.
    pub async fn chat_completion(
        &self,
        messages: Vec<Message>,
        model: Option<&str>,
    ) -> Result<ChatResponse> {
        let mut config = self.resolver.resolve(&self.pipeline.chat_service).await?;

        match model {
            Some(model_string) if model_string.contains(':') => {
                let requested = ServiceConfig::from_model_string(config.service_name.clone(), model_string);
                debug!(model = %requested.model_string(), "Using caller-supplied provider and model");
                config.provider = self
                    .catalog
                    .resolve_name(&requested.provider)
                    .unwrap_or(requested.provider);
                config.model = requested.model;
            }
            Some(model_name) => {
                debug!(provider = %config.provider, model = model_name, "Using caller-supplied model");
                config.model = model_name.trim().to_string();
            }
            None => config = self.select_target(config).await?,
        }

        let client = self
            .factory
            .create_client(&config.provider, ClientRole::Chat)
            .await?;
        let outcome = self.completion.run(messages, &config, client.as_ref()).await;
        client.close().await;
        outcome
    }

    /// Swap to a fallback provider when the configured one is unavailable
    async fn select_target(&self, mut config: ServiceConfig) -> Result<ServiceConfig> {
        let Some(chain) = self.fallback_chains.get(&config.service_name) else {
            return Ok(config);
        };

        let mut entries = Vec::with_capacity(chain.len() + 1);
        entries.push(config.model_string());
        entries.extend(chain.iter().cloned());

        let selected = self.fallback.available_provider(&entries).await?;
        if selected == config.provider {
            return Ok(config);
        }

        let model = entries
            .iter()
            .filter_map(|entry| entry.split_once(':'))
            .find(|(provider, _)| self.catalog.resolve_name(provider).as_deref() == Some(selected.as_str()))
            .map(|(_, model)| model.to_string());

        info!(
            service = %config.service_name,
            from = %config.provider,
            to = %selected,
            "Falling back to another provider"
        );

        config.provider = selected;
        if let Some(model) = model {
            config.dimensions = self
                .catalog
                .known_embedding_model(&config.provider, &model)
                .map(|m| m.dimensions);
            config.model = model;
        }
        Ok(config)
    }
}

/// Assembles a [`HermesService`]
pub struct HermesServiceBuilder {
    config: HermesConfig,
    catalog: Option<Arc<ProviderCatalog>>,
    config_store: Option<Arc<dyn ConfigStore>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    usage: Option<Arc<dyn UsageSink>>,
    transport: Option<Arc<dyn TransportBuilder>>,
    health: HealthConfig,
    check_mode: HealthCheckMode,
}

impl HermesServiceBuilder {
    pub fn new(config: HermesConfig) -> Self {
        Self {
            config,
            catalog: None,
            config_store: None,
            credentials: None,
            usage: None,
            transport: None,
            health: HealthConfig::default(),
            check_mode: HealthCheckMode::default(),
        }
    }

    pub fn catalog(mut self, catalog: Arc<ProviderCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Defaults to an in-memory store seeded from `[services]`
    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    /// Defaults to the conventional environment variables
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Defaults to logging each record
    pub fn usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(sink);
        self
    }

    pub fn transport_builder(mut self, builder: Arc<dyn TransportBuilder>) -> Self {
        self.transport = Some(builder);
        self
    }

    pub fn health_config(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn health_check_mode(mut self, mode: HealthCheckMode) -> Self {
        self.check_mode = mode;
        self
    }

    /// # Errors
    ///
    /// Returns a configuration error if the settings are invalid or name an
    /// unknown provider.
    pub fn build(self) -> Result<HermesService> {
        let config = self.config;
        config.validate()?;

        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(ProviderCatalog::seeded()));
        for (name, overrides) in &config.providers {
            catalog.apply_override(name, overrides)?;
        }

        let config_store = self.config_store.unwrap_or_else(|| {
            Arc::new(InMemoryConfigStore::from_configs(
                config
                    .services
                    .iter()
                    .map(|(name, entry)| ServiceConfig::from_entry(name.clone(), entry)),
            ))
        });
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(EnvCredentialStore::from_catalog(&catalog)));
        let usage = self.usage.unwrap_or_else(|| Arc::new(TracingUsageSink));

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let retry = RetryConfig::from(&config.retry);
        let health = Arc::new(ProviderHealth::new(self.health));

        let mut factory = ClientFactory::new(catalog.clone(), credentials, config.http.clone());
        if let Some(transport) = self.transport {
            factory = factory.with_builder(transport);
        }
        let factory = Arc::new(factory);

        let resolver = ConfigResolver::new(config_store, catalog.clone(), config.resolver.cache_ttl);

        let embedder = BatchEmbedder::new(catalog.clone(), limiter.clone())
            .with_retry_config(retry.clone())
            .with_batch_size(config.pipeline.batch_size)
            .with_preview_chars(config.pipeline.text_preview_chars)
            .with_usage_sink(usage.clone())
            .with_health(health.clone());

        let completion = CompletionRunner::new(limiter)
            .with_retry_config(retry)
            .with_usage_sink(usage)
            .with_health(health.clone());

        let fallback = ProviderFallback::new(factory.clone(), health.clone()).with_mode(self.check_mode);

        info!(
            providers = catalog.list().len(),
            services = config.services.len(),
            batch_size = config.pipeline.batch_size,
            "Hermes service ready"
        );

        Ok(HermesService {
            pipeline: config.pipeline,
            catalog,
            resolver,
            factory,
            fallback,
            fallback_chains: config.fallback,
            health,
            embedder,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceEntry;

    fn config_with_services() -> HermesConfig {
        let mut config = HermesConfig::default();
        config.services.insert(
            "embeddings".to_string(),
            ServiceEntry {
                model: "ollama:nomic-embed-text".to_string(),
                temperature: 0.7,
                max_tokens: None,
                dimensions: None,
            },
        );
        config
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = HermesConfig::default();
        config.pipeline.batch_size = 0;
        assert!(HermesService::builder(config).build().is_err());
    }

    #[test]
    fn test_build_rejects_override_for_unknown_provider() {
        let mut config = HermesConfig::default();
        config
            .providers
            .insert("nonexistent".to_string(), Default::default());
        let err = HermesService::builder(config).build().err().unwrap();
        assert!(matches!(err, HermesError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_services_section_seeds_config_store() {
        let service = HermesService::builder(config_with_services()).build().unwrap();
        let resolved = service.resolver().resolve("embeddings").await.unwrap();
        assert_eq!(resolved.provider, "ollama");
        assert_eq!(resolved.dimensions, Some(768));
    }

    #[tokio::test]
    async fn test_empty_batch_needs_no_configuration() {
        let service = HermesService::builder(HermesConfig::default()).build().unwrap();
        let result = service.create_embeddings_batch(Vec::new(), None).await.unwrap();
        assert_eq!(result.total_requested, 0);
    }

    #[tokio::test]
    async fn test_missing_service_config_is_surfaced() {
        let service = HermesService::builder(HermesConfig::default()).build().unwrap();
        let err = service.create_embedding("hello").await.unwrap_err();
        assert!(err.is_fatal_setup());
    }
}
