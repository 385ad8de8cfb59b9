//! Provider plumbing: catalog, client construction and the transport contract.
//!
//! Every provider is reached through an OpenAI-compatible surface
//! (`POST /embeddings`, `POST /chat/completions`). Differences between
//! providers live in [`catalog::ProviderSpec`] records, never in the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod error;
pub mod factory;
pub mod fallback;
pub mod health;
pub mod openai;

pub use catalog::{AuthScheme, EmbeddingModelSpec, ProviderCatalog, ProviderSpec};
pub use error::ProviderError;
pub use factory::{ClientBinding, ClientFactory, HttpTransportBuilder, TransportBuilder};
pub use fallback::{HealthCheckMode, ProviderFallback};
pub use health::{HealthConfig, ProviderHealth};
pub use openai::OpenAiCompatClient;

/// Which kind of operation a client is built for.
///
/// A provider may expose different base URLs per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Chat,
    Embedding,
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientRole::Chat => f.write_str("chat"),
            ClientRole::Embedding => f.write_str("embedding"),
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Embedding request for one batch
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
    /// Requested output dimensionality; `None` when the provider does not accept it
    pub dimensions: Option<usize>,
}

/// Embedding response, vectors in input order
#[derive(Debug, Clone, Default)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub usage: Option<TokenUsage>,
}

/// Chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// Chat completion response (`choices[0].message.content`)
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// A provider-bound handle able to issue embedding and chat requests.
///
/// One handle is owned by exactly one pipeline run and dropped when that run
/// ends. Implementations must classify failures into [`ProviderError`]
/// variants; callers never look at raw provider messages.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Canonical provider name this client is bound to
    fn provider(&self) -> &str;

    /// `POST /embeddings`
    async fn embed(&self, request: &EmbeddingRequest)
        -> Result<EmbeddingResponse, ProviderError>;

    /// `POST /chat/completions`
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Cheap reachability check used by the fallback walker
    async fn probe(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Release pooled resources. Called on every exit path of a run.
    async fn close(&self) {}
}
