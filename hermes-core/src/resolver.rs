//! Service configuration resolution with a TTL cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ServiceEntry;
use crate::error::{HermesError, Result};
use crate::provider::ProviderCatalog;
use crate::stores::ConfigStore;

/// Provider assumed when a model string names none
pub const DEFAULT_PROVIDER: &str = "openai";

/// Resolved settings for one logical service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

impl ServiceConfig {
    /// Parse `"provider:model"`; a bare model string belongs to OpenAI
    pub fn from_model_string(service: impl Into<String>, model_string: &str) -> Self {
        let (provider, model) = match model_string.split_once(':') {
            Some((provider, model)) => (provider.trim().to_lowercase(), model.trim().to_string()),
            None => (DEFAULT_PROVIDER.to_string(), model_string.trim().to_string()),
        };
        Self {
            service_name: service.into(),
            provider,
            model,
            temperature: 0.7,
            max_tokens: None,
            dimensions: None,
        }
    }

    pub fn from_entry(service: impl Into<String>, entry: &ServiceEntry) -> Self {
        Self {
            temperature: entry.temperature,
            max_tokens: entry.max_tokens,
            dimensions: entry.dimensions,
            ..Self::from_model_string(service, &entry.model)
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// `"provider:model"`
    pub fn model_string(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

struct CachedConfig {
    config: ServiceConfig,
    fetched_at: Instant,
}

/// Resolves service names to [`ServiceConfig`] through a TTL cache.
///
/// Concurrent misses for the same service share one store lookup.
pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    catalog: Arc<ProviderCatalog>,
    ttl: Duration,
    defaults: HashMap<String, ServiceConfig>,
    cache: Mutex<HashMap<String, CachedConfig>>,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>, catalog: Arc<ProviderCatalog>, ttl: Duration) -> Self {
        Self {
            store,
            catalog,
            ttl,
            defaults: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Fallback used when the store has no entry for the service
    pub fn with_default(mut self, config: ServiceConfig) -> Self {
        self.defaults.insert(config.service_name.clone(), config);
        self
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, CachedConfig>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, service: &str) -> Option<ServiceConfig> {
        self.cache()
            .get(service)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.config.clone())
    }

    fn flight_lock(&self, service: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(service.to_string())
            .or_default()
            .clone()
    }

    /// Configuration for a service.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when neither the store nor the defaults
    /// define the service.
    pub async fn resolve(&self, service: &str) -> Result<ServiceConfig> {
        if let Some(config) = self.cached(service) {
            debug!(service, "Service config served from cache");
            return Ok(config);
        }

        let flight = self.flight_lock(service);
        let outcome = {
            let _guard = flight.lock().await;
            self.load(service).await
        };
        self.release_flight(service, flight);
        outcome
    }

    /// Drop the single-flight entry once no other caller holds it
    fn release_flight(&self, service: &str, flight: Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let owned_by_map = inflight
            .get(service)
            .is_some_and(|entry| Arc::ptr_eq(entry, &flight));
        // the map and `flight` itself
        if owned_by_map && Arc::strong_count(&flight) == 2 {
            inflight.remove(service);
        }
    }

    async fn load(&self, service: &str) -> Result<ServiceConfig> {
        if let Some(config) = self.cached(service) {
            return Ok(config);
        }

        let fetched = match self.store.get(service).await? {
            Some(config) => config,
            None => self.defaults.get(service).cloned().ok_or_else(|| {
                HermesError::Configuration(format!(
                    "No configuration found for service '{}'",
                    service
                ))
            })?,
        };
        let config = self.complete(fetched);

        info!(
            service,
            provider = %config.provider,
            model = %config.model,
            dimensions = ?config.dimensions,
            "Resolved service config"
        );

        self.cache().insert(
            service.to_string(),
            CachedConfig {
                config: config.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(config)
    }

    /// Canonical provider name and known dimensions
    fn complete(&self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(canonical) = self.catalog.resolve_name(&config.provider) {
            config.provider = canonical;
        }
        if config.dimensions.is_none() {
            config.dimensions = self
                .catalog
                .known_embedding_model(&config.provider, &config.model)
                .map(|m| m.dimensions);
        }
        config
    }

    /// Drop one cached entry
    pub fn invalidate(&self, service: &str) {
        if self.cache().remove(service).is_some() {
            debug!(service, "Invalidated cached service config");
        }
    }

    /// Drop every cached entry
    pub fn clear_cache(&self) {
        self.cache().clear();
        info!("Cleared service config cache");
    }
}
