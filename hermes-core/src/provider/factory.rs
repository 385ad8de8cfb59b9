//! Factory for creating transport clients from the catalog and credential store

use std::sync::Arc;
use tracing::{debug, info};

use super::catalog::{ProviderCatalog, ProviderSpec};
use super::openai::OpenAiCompatClient;
use super::{ClientRole, TransportClient};
use crate::config::HttpConfig;
use crate::error::{HermesError, Result};
use crate::stores::{CredentialStore, ProviderSecret, warn_if_placeholder};

/// Secret handed to providers that authenticate nothing
pub const NO_SECRET_SENTINEL: &str = "ollama";

/// Everything a transport needs to reach one provider for one role
#[derive(Debug, Clone)]
pub struct ClientBinding {
    pub spec: Arc<ProviderSpec>,
    pub role: ClientRole,
    pub secret: Option<ProviderSecret>,
    pub http: HttpConfig,
}

/// Turns a binding into a live client.
///
/// The HTTP implementation is the default; tests substitute scripted clients.
pub trait TransportBuilder: Send + Sync {
    fn build(&self, binding: ClientBinding) -> Result<Box<dyn TransportClient>>;
}

/// Builds [`OpenAiCompatClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransportBuilder;

impl TransportBuilder for HttpTransportBuilder {
    fn build(&self, binding: ClientBinding) -> Result<Box<dyn TransportClient>> {
        Ok(Box::new(OpenAiCompatClient::new(binding)?))
    }
}

/// Factory for creating provider-bound transport clients
pub struct ClientFactory {
    catalog: Arc<ProviderCatalog>,
    credentials: Arc<dyn CredentialStore>,
    builder: Arc<dyn TransportBuilder>,
    http: HttpConfig,
}

impl ClientFactory {
    /// Create a factory that builds HTTP clients
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        credentials: Arc<dyn CredentialStore>,
        http: HttpConfig,
    ) -> Self {
        Self {
            catalog,
            credentials,
            builder: Arc::new(HttpTransportBuilder),
            http,
        }
    }

    /// Replace the transport builder
    pub fn with_builder(mut self, builder: Arc<dyn TransportBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    /// Create a client for a provider and role.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if the provider is not in the catalog and
    /// `CredentialMissing` if it needs a secret the credential store lacks.
    pub async fn create_client(
        &self,
        provider: &str,
        role: ClientRole,
    ) -> Result<Box<dyn TransportClient>> {
        self.create_client_at(provider, role, None).await
    }

    /// Create a client, optionally pointing it at a different base URL
    pub async fn create_client_at(
        &self,
        provider: &str,
        role: ClientRole,
        base_url: Option<&str>,
    ) -> Result<Box<dyn TransportClient>> {
        let mut spec = self.catalog.require(provider)?;

        if let Some(url) = base_url {
            let mut overridden = (*spec).clone();
            match role {
                ClientRole::Chat => overridden.base_url = url.to_string(),
                ClientRole::Embedding => overridden.embedding_base_url = Some(url.to_string()),
            }
            spec = Arc::new(overridden);
        }

        let secret = self.secret_for(&spec).await?;

        info!(
            provider = %spec.name,
            role = %role,
            base_url = %spec.base_url_for(role),
            key = %secret.as_ref().map(ProviderSecret::preview).unwrap_or_default(),
            "Creating provider client"
        );

        self.builder.build(ClientBinding {
            spec,
            role,
            secret,
            http: self.http.clone(),
        })
    }

    async fn secret_for(&self, spec: &ProviderSpec) -> Result<Option<ProviderSecret>> {
        if !spec.requires_secret {
            debug!(provider = %spec.name, "Provider needs no credential");
            return Ok(Some(ProviderSecret::new(NO_SECRET_SENTINEL)));
        }

        match self.credentials.get(&spec.name).await? {
            Some(secret) => {
                warn_if_placeholder(&spec.name, &secret);
                Ok(Some(secret))
            }
            None => Err(HermesError::CredentialMissing {
                provider: spec.name.clone(),
            }),
        }
    }

    /// Whether a usable credential exists for the provider, without building a client
    pub async fn has_credential(&self, provider: &str) -> Result<bool> {
        let spec = self.catalog.require(provider)?;
        if !spec.requires_secret {
            return Ok(true);
        }
        Ok(self.credentials.get(&spec.name).await?.is_some())
    }

    /// Whether embedding requests for the provider must not carry `dimensions`
    pub fn should_omit_dimensions(&self, provider: &str) -> bool {
        self.catalog.should_omit_dimensions(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ProviderError,
    };
    use crate::stores::InMemoryCredentialStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullClient {
        provider: String,
    }

    #[async_trait]
    impl TransportClient for NullClient {
        fn provider(&self) -> &str {
            &self.provider
        }

        async fn embed(&self, _: &EmbeddingRequest) -> std::result::Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse::default())
        }

        async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: String::new(),
                model: request.model.clone(),
                usage: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingBuilder {
        bindings: Mutex<Vec<ClientBinding>>,
    }

    impl TransportBuilder for RecordingBuilder {
        fn build(&self, binding: ClientBinding) -> Result<Box<dyn TransportClient>> {
            let provider = binding.spec.name.clone();
            self.bindings.lock().unwrap().push(binding);
            Ok(Box::new(NullClient { provider }))
        }
    }

    async fn factory_with(
        secrets: &[(&str, &str)],
    ) -> (ClientFactory, Arc<RecordingBuilder>) {
        let store = Arc::new(InMemoryCredentialStore::new());
        for (provider, secret) in secrets {
            store.insert(provider, *secret).await;
        }
        let builder = Arc::new(RecordingBuilder::default());
        let factory = ClientFactory::new(
            Arc::new(ProviderCatalog::seeded()),
            store,
            HttpConfig::default(),
        )
        .with_builder(builder.clone());
        (factory, builder)
    }

    #[tokio::test]
    async fn test_missing_credential_is_reported() {
        let (factory, builder) = factory_with(&[]).await;
        let err = factory
            .create_client("openai", ClientRole::Embedding)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HermesError::CredentialMissing { ref provider } if provider == "openai"));
        assert!(builder.bindings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyless_provider_gets_sentinel() {
        let (factory, builder) = factory_with(&[]).await;
        let client = factory
            .create_client("ollama", ClientRole::Embedding)
            .await
            .unwrap();
        assert_eq!(client.provider(), "ollama");

        let bindings = builder.bindings.lock().unwrap();
        assert_eq!(
            bindings[0].secret.as_ref().map(|s| s.expose().to_string()),
            Some(NO_SECRET_SENTINEL.to_string())
        );
    }

    #[tokio::test]
    async fn test_alias_resolves_to_canonical_spec() {
        let (factory, builder) = factory_with(&[("google", "AIza-000000000000")]).await;
        let client = factory
            .create_client("gemini", ClientRole::Embedding)
            .await
            .unwrap();
        assert_eq!(client.provider(), "google");
        assert_eq!(builder.bindings.lock().unwrap()[0].role, ClientRole::Embedding);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let (factory, _) = factory_with(&[]).await;
        let err = factory
            .create_client("nonexistent", ClientRole::Chat)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HermesError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_base_url_override_applies_to_role() {
        let (factory, builder) = factory_with(&[("openai", "sk-0000000000000000")]).await;
        factory
            .create_client_at("openai", ClientRole::Embedding, Some("http://proxy/v1"))
            .await
            .unwrap();

        let bindings = builder.bindings.lock().unwrap();
        assert_eq!(bindings[0].spec.base_url_for(ClientRole::Embedding), "http://proxy/v1");
        assert_eq!(bindings[0].spec.base_url_for(ClientRole::Chat), "https://api.openai.com/v1");
    }

    #[tokio::test]
    async fn test_has_credential_and_dimension_flag() {
        let (factory, _) = factory_with(&[("groq", "gsk-000000000000")]).await;
        assert!(factory.has_credential("groq").await.unwrap());
        assert!(factory.has_credential("ollama").await.unwrap());
        assert!(!factory.has_credential("openai").await.unwrap());
        assert!(factory.should_omit_dimensions("google"));
        assert!(!factory.should_omit_dimensions("openai"));
    }
}
