//! # Hermes - embedding and chat completion pipeline
//!
//! Hermes sends embedding and chat requests to OpenAI-compatible providers with:
//! - A provider catalog with per-provider capabilities and auth schemes
//! - Service configuration resolved through a TTL cache
//! - A shared token-budget rate limiter
//! - Batched embedding with retry, quota short-circuit and cancellation
//! - Provider fallback chains guarded by per-provider health
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hermes_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = HermesService::builder(HermesConfig::load()?).build()?;
//!
//!     let vector = service.create_embedding("The quick brown fox").await?;
//!     println!("{} dimensions", vector.len());
//!
//!     let texts = vec!["first".to_string(), "second".to_string()];
//!     let result = service.create_embeddings_batch(texts, None).await?;
//!     println!("{}", result.progress());
//!
//!     let reply = service
//!         .chat_completion(vec![Message::user("Say hello")], None)
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Configuration and credential problems are returned as errors before any
//! network activity. Everything that goes wrong once requests are in flight is
//! recorded per input in [`BatchResult::failed_items`](embedding::BatchResult)
//! with an [`ErrorKind`](error::ErrorKind).

pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod service;
pub mod stores;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::completion::CompletionRunner;
    pub use crate::config::{
        HermesConfig, HttpConfig, PipelineConfig, ProviderOverride, RateLimitConfig,
        ResolverConfig, RetrySettings, ServiceEntry,
    };
    pub use crate::embedding::{
        BatchEmbedder, BatchItem, BatchProgress, BatchResult, FailedItem, ProgressCallback,
        RetryConfig, RunOptions,
    };
    pub use crate::error::{ErrorKind, HermesError, Result};
    pub use crate::provider::{
        AuthScheme, ChatRequest, ChatResponse, ClientFactory, ClientRole, EmbeddingRequest,
        EmbeddingResponse, HealthCheckMode, HealthConfig, Message, MessageRole, ProviderCatalog,
        ProviderError, ProviderFallback, ProviderHealth, ProviderSpec, TokenUsage,
        TransportClient,
    };
    pub use crate::rate_limit::{RateLimiter, estimate_tokens};
    pub use crate::resolver::{ConfigResolver, ServiceConfig};
    pub use crate::service::{HermesService, HermesServiceBuilder};
    pub use crate::stores::{
        ChainedCredentialStore, ConfigStore, CredentialStore, EnvCredentialStore,
        InMemoryConfigStore, InMemoryCredentialStore, InMemoryUsageSink, ProviderSecret,
        TracingUsageSink, UsageRecord, UsageSink,
    };
    pub use tokio_util::sync::CancellationToken;
}
