//! Collaborator seams: service configuration, credentials and usage accounting.
//!
//! The pipeline only sees the traits. In-memory and environment-backed
//! implementations are provided for the CLI and for tests; a deployment backed
//! by a database implements the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::provider::ProviderCatalog;
use crate::resolver::ServiceConfig;

/// Keys that are obviously not real credentials
const PLACEHOLDER_SECRETS: &[&str] = &["asdasdsad", "test", "placeholder", "your-api-key-here"];

/// A provider credential. `Debug` never prints the value.
#[derive(Clone)]
pub struct ProviderSecret(SecretString);

impl ProviderSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Redacted rendering for logs
    pub fn preview(&self) -> String {
        secret_preview(self.expose())
    }

    pub fn is_placeholder(&self) -> bool {
        let value = self.expose().trim().to_lowercase();
        value.is_empty() || PLACEHOLDER_SECRETS.contains(&value.as_str())
    }
}

impl std::fmt::Debug for ProviderSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProviderSecret({})", self.preview())
    }
}

impl From<&str> for ProviderSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderSecret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// First and last four characters of a secret, `****` when too short to hide
pub fn secret_preview(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Source of per-service configuration
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Configuration for a service, `None` when the service is not defined
    async fn get(&self, service: &str) -> Result<Option<ServiceConfig>>;
}

/// Source of provider credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Secret for a canonical provider name, `None` when absent
    async fn get(&self, provider: &str) -> Result<Option<ProviderSecret>>;
}

/// One accounting record per successful provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub service: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(service: impl Into<String>, model: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            service: service.into(),
            model: model.into(),
            tokens_in,
            tokens_out,
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for usage records
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<()>;
}

/// Config store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    services: RwLock<HashMap<String, ServiceConfig>>,
    lookups: AtomicUsize,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with service definitions
    pub fn from_configs(configs: impl IntoIterator<Item = ServiceConfig>) -> Self {
        let services = configs
            .into_iter()
            .map(|config| (config.service_name.clone(), config))
            .collect();
        Self {
            services: RwLock::new(services),
            lookups: AtomicUsize::new(0),
        }
    }

    pub async fn insert(&self, config: ServiceConfig) {
        debug!(service = %config.service_name, provider = %config.provider, "Stored service config");
        self.services
            .write()
            .await
            .insert(config.service_name.clone(), config);
    }

    pub async fn remove(&self, service: &str) -> Option<ServiceConfig> {
        self.services.write().await.remove(service)
    }

    /// Number of `get` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, service: &str) -> Result<Option<ServiceConfig>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.services.read().await.get(service).cloned())
    }
}

/// Credential store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    secrets: RwLock<HashMap<String, ProviderSecret>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, provider: &str, secret: impl Into<ProviderSecret>) {
        let secret = secret.into();
        debug!(provider, key = %secret.preview(), "Stored provider credential");
        self.secrets
            .write()
            .await
            .insert(provider.to_lowercase(), secret);
    }

    pub async fn remove(&self, provider: &str) -> bool {
        self.secrets
            .write()
            .await
            .remove(&provider.to_lowercase())
            .is_some()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, provider: &str) -> Result<Option<ProviderSecret>> {
        Ok(self.secrets.read().await.get(&provider.to_lowercase()).cloned())
    }
}

/// Credential store reading conventional environment variables
#[derive(Debug, Clone)]
pub struct EnvCredentialStore {
    vars: HashMap<String, String>,
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        let vars = [
            ("openai", "OPENAI_API_KEY"),
            ("google", "GOOGLE_API_KEY"),
            ("gemini", "GOOGLE_API_KEY"),
            ("anthropic", "ANTHROPIC_API_KEY"),
            ("mistral", "MISTRAL_API_KEY"),
            ("groq", "GROQ_API_KEY"),
            ("deepseek", "DEEPSEEK_API_KEY"),
            ("openrouter", "OPENROUTER_API_KEY"),
            ("together", "TOGETHER_API_KEY"),
        ]
        .into_iter()
        .map(|(provider, var)| (provider.to_string(), var.to_string()))
        .collect();
        Self { vars }
    }
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables declared by the catalog, on top of the defaults
    pub fn from_catalog(catalog: &ProviderCatalog) -> Self {
        let mut store = Self::default();
        for name in catalog.list() {
            if let Some(var) = catalog.get(&name).and_then(|spec| spec.credential_env.clone()) {
                store.vars.insert(name, var);
            }
        }
        store
    }

    /// Map a provider to a different variable
    pub fn with_var(mut self, provider: &str, var: &str) -> Self {
        self.vars.insert(provider.to_lowercase(), var.to_string());
        self
    }

    pub fn var_for(&self, provider: &str) -> Option<&str> {
        self.vars.get(&provider.to_lowercase()).map(String::as_str)
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, provider: &str) -> Result<Option<ProviderSecret>> {
        let Some(var) = self.var_for(provider) else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(ProviderSecret::new(value))),
            _ => Ok(None),
        }
    }
}

/// Tries each store in order and returns the first secret found
#[derive(Default)]
pub struct ChainedCredentialStore {
    stores: Vec<Arc<dyn CredentialStore>>,
}

impl ChainedCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.stores.push(store);
        self
    }
}

#[async_trait]
impl CredentialStore for ChainedCredentialStore {
    async fn get(&self, provider: &str) -> Result<Option<ProviderSecret>> {
        for store in &self.stores {
            if let Some(secret) = store.get(provider).await? {
                return Ok(Some(secret));
            }
        }
        Ok(None)
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct InMemoryUsageSink {
    records: RwLock<Vec<UsageRecord>>,
}

impl InMemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }

    /// Sum of `(tokens_in, tokens_out)` across all records
    pub async fn totals(&self) -> (u64, u64) {
        self.records
            .read()
            .await
            .iter()
            .fold((0, 0), |(i, o), r| (i + r.tokens_in, o + r.tokens_out))
    }
}

#[async_trait]
impl UsageSink for InMemoryUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Emits each record as a structured log event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        info!(
            service = %record.service,
            model = %record.model,
            tokens_in = record.tokens_in,
            tokens_out = record.tokens_out,
            "Recorded token usage"
        );
        Ok(())
    }
}

/// Warn about credentials that are plainly not real
pub(crate) fn warn_if_placeholder(provider: &str, secret: &ProviderSecret) {
    if secret.is_placeholder() {
        warn!(provider, "Credential looks like a placeholder value");
    }
}
