//! Provider catalog: which providers exist and what they support.
//!
//! The catalog is an explicitly constructed value passed to the components
//! that need it. One catalog per process is a caller convention, not a
//! language-level singleton. Registration and lookup are safe under
//! concurrent use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use super::ClientRole;
use crate::config::ProviderOverride;
use crate::error::{HermesError, Result};

/// How a provider expects its secret to be presented
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// Provider-specific header, e.g. `x-api-key: <secret>`
    Header { name: String },
    /// Secret embedded in the query string, e.g. `?key=<secret>`
    QueryParam { name: String },
    /// No authentication (self-hosted servers)
    None,
}

/// A known embedding model and its output shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelSpec {
    pub model: String,
    pub dimensions: usize,
    pub max_input_tokens: usize,
}

impl EmbeddingModelSpec {
    fn new(model: &str, dimensions: usize, max_input_tokens: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions,
            max_input_tokens,
        }
    }
}

/// Capability record for one provider.
///
/// All provider-specific request shaping is driven from these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Canonical lowercase name
    pub name: String,

    /// Base URL for chat completions
    pub base_url: String,

    /// Base URL for embeddings, when it differs from `base_url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_base_url: Option<String>,

    pub auth: AuthScheme,

    /// Extra headers sent on every request
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,

    /// Whether a credential must be present to build a client
    pub requires_secret: bool,

    /// Whether `POST /embeddings` is offered at all
    pub supports_embeddings: bool,

    /// Whether the embeddings endpoint accepts a `dimensions` parameter
    pub supports_dimensions: bool,

    /// Lowercase substrings that mark a 429/402/403 body as quota exhaustion
    #[serde(default)]
    pub quota_markers: Vec<String>,

    /// Conventional environment variable holding the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,

    #[serde(default)]
    pub embedding_models: Vec<EmbeddingModelSpec>,
}

impl ProviderSpec {
    /// A bearer-authenticated OpenAI-compatible provider with no embeddings
    pub fn openai_compatible(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            base_url: base_url.into(),
            embedding_base_url: None,
            auth: AuthScheme::Bearer,
            extra_headers: Vec::new(),
            requires_secret: true,
            supports_embeddings: false,
            supports_dimensions: false,
            quota_markers: Vec::new(),
            credential_env: None,
            embedding_models: Vec::new(),
        }
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        if auth == AuthScheme::None {
            self.requires_secret = false;
        }
        self.auth = auth;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_embeddings(mut self, supports_dimensions: bool) -> Self {
        self.supports_embeddings = true;
        self.supports_dimensions = supports_dimensions;
        self
    }

    pub fn with_embedding_model(
        mut self,
        model: &str,
        dimensions: usize,
        max_input_tokens: usize,
    ) -> Self {
        self.embedding_models
            .push(EmbeddingModelSpec::new(model, dimensions, max_input_tokens));
        self
    }

    pub fn with_quota_markers(mut self, markers: &[&str]) -> Self {
        self.quota_markers = markers.iter().map(|m| m.to_lowercase()).collect();
        self
    }

    pub fn with_credential_env(mut self, var: impl Into<String>) -> Self {
        self.credential_env = Some(var.into());
        self
    }

    /// Base URL for the given role, without a trailing slash
    pub fn base_url_for(&self, role: ClientRole) -> &str {
        let url = match role {
            ClientRole::Embedding => self.embedding_base_url.as_deref().unwrap_or(&self.base_url),
            ClientRole::Chat => &self.base_url,
        };
        url.trim_end_matches('/')
    }

    /// Whether a lowercase error body carries one of this provider's quota markers
    pub fn is_quota_message(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.quota_markers.iter().any(|m| lowered.contains(m.as_str()))
    }

    pub fn embedding_model(&self, model: &str) -> Option<&EmbeddingModelSpec> {
        self.embedding_models.iter().find(|m| m.model == model)
    }
}

#[derive(Default)]
struct CatalogInner {
    specs: HashMap<String, Arc<ProviderSpec>>,
    aliases: HashMap<String, String>,
}

/// Registry of provider capability records
#[derive(Default)]
pub struct ProviderCatalog {
    inner: RwLock<CatalogInner>,
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("providers", &self.list())
            .finish()
    }
}

impl ProviderCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-populated with the providers Hermes knows how to reach
    pub fn seeded() -> Self {
        let catalog = Self::new();
        for spec in seed_specs() {
            catalog.insert(spec);
        }
        catalog.insert_alias("gemini", "google");
        catalog
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, spec: ProviderSpec) {
        self.write().specs.insert(spec.name.clone(), Arc::new(spec));
    }

    fn insert_alias(&self, alias: &str, name: &str) {
        self.write()
            .aliases
            .insert(alias.to_lowercase(), name.to_lowercase());
    }

    /// Register a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider with the same name is already registered.
    pub fn register(&self, spec: ProviderSpec) -> Result<()> {
        let mut inner = self.write();
        if inner.specs.contains_key(&spec.name) || inner.aliases.contains_key(&spec.name) {
            return Err(HermesError::Configuration(format!(
                "Provider '{}' is already registered",
                spec.name
            )));
        }
        info!(provider = %spec.name, "Registered provider");
        inner.specs.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Remove a provider and every alias pointing at it
    pub fn unregister(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let mut inner = self.write();
        let removed = inner.specs.remove(&name).is_some();
        inner.aliases.retain(|_, target| *target != name);
        if removed {
            info!(provider = %name, "Unregistered provider");
        }
        removed
    }

    /// Add an alias for a registered provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the target provider is not registered.
    pub fn add_alias(&self, alias: &str, name: &str) -> Result<()> {
        let target = name.to_lowercase();
        if !self.read().specs.contains_key(&target) {
            return Err(HermesError::UnknownProvider(name.to_string()));
        }
        self.insert_alias(alias, &target);
        debug!(alias, provider = %target, "Added provider alias");
        Ok(())
    }

    /// Canonical name for a provider or alias
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        let lowered = name.trim().to_lowercase();
        let inner = self.read();
        if inner.specs.contains_key(&lowered) {
            return Some(lowered);
        }
        inner
            .aliases
            .get(&lowered)
            .filter(|target| inner.specs.contains_key(*target))
            .cloned()
    }

    /// Capability record for a provider or alias
    pub fn get(&self, name: &str) -> Option<Arc<ProviderSpec>> {
        let canonical = self.resolve_name(name)?;
        self.read().specs.get(&canonical).cloned()
    }

    /// Capability record, or `UnknownProvider`
    pub fn require(&self, name: &str) -> Result<Arc<ProviderSpec>> {
        self.get(name)
            .ok_or_else(|| HermesError::UnknownProvider(name.to_string()))
    }

    /// Registered canonical provider names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().specs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether requests to this provider must not carry `dimensions`.
    ///
    /// Unknown providers are assumed to accept the parameter.
    pub fn should_omit_dimensions(&self, name: &str) -> bool {
        self.get(name)
            .map(|spec| !spec.supports_dimensions)
            .unwrap_or(false)
    }

    /// Dimensions and input limit of a known embedding model
    pub fn known_embedding_model(&self, provider: &str, model: &str) -> Option<EmbeddingModelSpec> {
        self.get(provider)
            .and_then(|spec| spec.embedding_model(model).cloned())
    }

    /// Apply a base URL override from configuration
    pub fn apply_override(&self, name: &str, overrides: &ProviderOverride) -> Result<()> {
        let spec = self.require(name)?;
        let mut updated = (*spec).clone();
        if let Some(url) = &overrides.base_url {
            updated.base_url = url.clone();
        }
        if let Some(url) = &overrides.embedding_base_url {
            updated.embedding_base_url = Some(url.clone());
        }
        debug!(provider = %updated.name, base_url = %updated.base_url, "Applied provider override");
        self.insert(updated);
        Ok(())
    }
}

fn seed_specs() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec::openai_compatible("openai", "https://api.openai.com/v1")
            .with_embeddings(true)
            .with_embedding_model("text-embedding-3-small", 1536, 8191)
            .with_embedding_model("text-embedding-3-large", 3072, 8191)
            .with_embedding_model("text-embedding-ada-002", 1536, 8191)
            .with_quota_markers(&["insufficient_quota", "exceeded your current quota"])
            .with_credential_env("OPENAI_API_KEY"),
        ProviderSpec::openai_compatible(
            "google",
            "https://generativelanguage.googleapis.com/v1beta/openai",
        )
        .with_auth(AuthScheme::QueryParam {
            name: "key".to_string(),
        })
        .with_embeddings(false)
        .with_embedding_model("text-embedding-004", 768, 2048)
        .with_embedding_model("text-multilingual-embedding-002", 768, 2048)
        .with_quota_markers(&["exceeded your current quota", "billing"])
        .with_credential_env("GOOGLE_API_KEY"),
        ProviderSpec::openai_compatible("ollama", "http://localhost:11434/v1")
            .with_auth(AuthScheme::None)
            .with_embeddings(true)
            .with_embedding_model("nomic-embed-text", 768, 8192)
            .with_embedding_model("mxbai-embed-large", 1024, 512)
            .with_embedding_model("all-minilm", 384, 256),
        ProviderSpec::openai_compatible("anthropic", "https://api.anthropic.com/v1")
            .with_auth(AuthScheme::Header {
                name: "x-api-key".to_string(),
            })
            .with_header("anthropic-version", "2023-06-01")
            .with_quota_markers(&["credit balance is too low"])
            .with_credential_env("ANTHROPIC_API_KEY"),
        ProviderSpec::openai_compatible("groq", "https://api.groq.com/openai/v1")
            .with_credential_env("GROQ_API_KEY"),
        ProviderSpec::openai_compatible("mistral", "https://api.mistral.ai/v1")
            .with_embeddings(false)
            .with_embedding_model("mistral-embed", 1024, 8000)
            .with_credential_env("MISTRAL_API_KEY"),
        ProviderSpec::openai_compatible("deepseek", "https://api.deepseek.com/v1")
            .with_quota_markers(&["insufficient balance"])
            .with_credential_env("DEEPSEEK_API_KEY"),
        ProviderSpec::openai_compatible("openrouter", "https://openrouter.ai/api/v1")
            .with_quota_markers(&["insufficient credits"])
            .with_credential_env("OPENROUTER_API_KEY"),
        ProviderSpec::openai_compatible("together", "https://api.together.xyz/v1")
            .with_embeddings(false)
            .with_credential_env("TOGETHER_API_KEY"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_catalog_contains_core_providers() {
        let catalog = ProviderCatalog::seeded();
        let names = catalog.list();
        for name in ["openai", "google", "ollama", "anthropic", "groq", "mistral"] {
            assert!(names.contains(&name.to_string()), "missing {name}");
        }
    }

    #[test]
    fn test_gemini_alias_resolves_to_google() {
        let catalog = ProviderCatalog::seeded();
        assert_eq!(catalog.resolve_name("Gemini").as_deref(), Some("google"));
        let spec = catalog.get("gemini").unwrap();
        assert_eq!(spec.name, "google");
    }

    #[test]
    fn test_should_omit_dimensions() {
        let catalog = ProviderCatalog::seeded();
        assert!(catalog.should_omit_dimensions("google"));
        assert!(catalog.should_omit_dimensions("gemini"));
        assert!(!catalog.should_omit_dimensions("openai"));
        assert!(!catalog.should_omit_dimensions("not-a-provider"));
    }

    #[test]
    fn test_ollama_needs_no_secret() {
        let catalog = ProviderCatalog::seeded();
        let spec = catalog.get("ollama").unwrap();
        assert!(!spec.requires_secret);
        assert_eq!(spec.auth, AuthScheme::None);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let catalog = ProviderCatalog::seeded();
        let result = catalog.register(ProviderSpec::openai_compatible("openai", "http://x"));
        assert!(result.is_err());

        let result = catalog.register(ProviderSpec::openai_compatible("local-vllm", "http://vllm"));
        assert!(result.is_ok());
        assert!(catalog.get("local-vllm").is_some());
    }

    #[test]
    fn test_unregister_drops_aliases() {
        let catalog = ProviderCatalog::seeded();
        assert!(catalog.unregister("google"));
        assert!(catalog.get("gemini").is_none());
        assert!(!catalog.unregister("google"));
    }

    #[test]
    fn test_alias_requires_registered_target() {
        let catalog = ProviderCatalog::new();
        assert!(catalog.add_alias("x", "missing").is_err());
    }

    #[test]
    fn test_base_url_for_role() {
        let spec = ProviderSpec::openai_compatible("custom", "http://chat/v1/");
        assert_eq!(spec.base_url_for(ClientRole::Chat), "http://chat/v1");
        assert_eq!(spec.base_url_for(ClientRole::Embedding), "http://chat/v1");

        let mut spec = spec;
        spec.embedding_base_url = Some("http://embed/v1".to_string());
        assert_eq!(spec.base_url_for(ClientRole::Embedding), "http://embed/v1");
    }

    #[test]
    fn test_quota_markers_are_case_insensitive() {
        let catalog = ProviderCatalog::seeded();
        let openai = catalog.get("openai").unwrap();
        assert!(openai.is_quota_message(r#"{"error":{"code":"INSUFFICIENT_QUOTA"}}"#));
        assert!(!openai.is_quota_message("Rate limit reached for requests"));
    }

    #[test]
    fn test_known_embedding_model() {
        let catalog = ProviderCatalog::seeded();
        let model = catalog
            .known_embedding_model("openai", "text-embedding-3-large")
            .unwrap();
        assert_eq!(model.dimensions, 3072);
        assert!(catalog.known_embedding_model("openai", "unknown").is_none());
    }

    #[test]
    fn test_apply_override() {
        let catalog = ProviderCatalog::seeded();
        catalog
            .apply_override(
                "ollama",
                &ProviderOverride {
                    base_url: Some("http://gpu-box:11434/v1".to_string()),
                    embedding_base_url: None,
                },
            )
            .unwrap();
        let spec = catalog.get("ollama").unwrap();
        assert_eq!(spec.base_url_for(ClientRole::Embedding), "http://gpu-box:11434/v1");
    }

    #[test]
    fn test_concurrent_registration() {
        let catalog = Arc::new(ProviderCatalog::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let catalog = catalog.clone();
                std::thread::spawn(move || {
                    catalog
                        .register(ProviderSpec::openai_compatible(
                            format!("p{i}"),
                            "http://localhost",
                        ))
                        .unwrap();
                    catalog.get(&format!("p{i}")).is_some()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(catalog.list().len(), 8);
    }
}
