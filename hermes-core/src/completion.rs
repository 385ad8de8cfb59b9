//! Chat completion runner.
//!
//! Shares the rate limiter and backoff policy with the batch embedder. Quota
//! exhaustion is returned immediately; other retryable failures are retried.

use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::embedding::retry::{RetryConfig, with_retry};
use crate::error::{HermesError, Result};
use crate::provider::{
    ChatRequest, ChatResponse, Message, ProviderError, ProviderHealth, TransportClient,
};
use crate::rate_limit::{RateLimiter, estimate_tokens};
use crate::resolver::ServiceConfig;
use crate::stores::{UsageRecord, UsageSink};

/// Runs one chat completion against one client
pub struct CompletionRunner {
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    usage: Option<Arc<dyn UsageSink>>,
    health: Option<Arc<ProviderHealth>>,
}

impl CompletionRunner {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            retry: RetryConfig::default(),
            usage: None,
            health: None,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_usage_sink(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_health(mut self, health: Arc<ProviderHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Send `messages` using the model and sampling settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns `HermesError::Provider` carrying the final classified failure.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        config: &ServiceConfig,
        client: &dyn TransportClient,
    ) -> Result<ChatResponse> {
        let span = info_span!(
            "chat_completion",
            service = %config.service_name,
            provider = client.provider(),
            model = %config.model,
        );
        self.complete(messages, config, client).instrument(span).await
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        config: &ServiceConfig,
        client: &dyn TransportClient,
    ) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(ProviderError::validation("At least one message is required").into());
        }

        let prompt_estimate: u64 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let budget = prompt_estimate + config.max_tokens.unwrap_or(0) as u64;

        let request = ChatRequest {
            model: config.model.clone(),
            messages,
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
        };
        debug!(messages = request.messages.len(), estimated_tokens = budget, "Sending chat completion");

        let retry = &self.retry;
        let request = &request;
        let outcome = self
            .limiter
            .with_budget(budget, move || with_retry(retry, move || client.chat(request)))
            .await;

        let provider = client.provider();
        match outcome {
            Ok(response) => {
                if let Some(health) = &self.health {
                    health.record_success(provider);
                }
                info!(chars = response.content.len(), "Chat completion succeeded");
                self.record_usage(config, &response, prompt_estimate).await;
                Ok(response)
            }
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Chat completion failed");
                if let Some(health) = &self.health {
                    if e.is_quota_exhausted() {
                        health.trip(provider);
                    } else if e.is_retryable() {
                        health.record_failure(provider);
                    }
                }
                Err(HermesError::Provider(e))
            }
        }
    }

    async fn record_usage(&self, config: &ServiceConfig, response: &ChatResponse, prompt_estimate: u64) {
        let Some(sink) = &self.usage else {
            return;
        };
        let (tokens_in, tokens_out) = match response.usage {
            Some(usage) => (usage.prompt_tokens as u64, usage.completion_tokens as u64),
            None => (prompt_estimate, estimate_tokens(&response.content)),
        };
        let record = UsageRecord::new(config.service_name.clone(), response.model.clone(), tokens_in, tokens_out);
        if let Err(e) = sink.record(record).await {
            warn!(error = %e, "Failed to record usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::error::ErrorKind;
    use crate::provider::{EmbeddingRequest, EmbeddingResponse, TokenUsage};
    use crate::stores::InMemoryUsageSink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes, then echoes the last user message
    struct ScriptedChat {
        script: Mutex<VecDeque<ProviderError>>,
        calls: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        fn new(failures: Vec<ProviderError>) -> Self {
            Self {
                script: Mutex::new(failures.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TransportClient for ScriptedChat {
        fn provider(&self) -> &str {
            "openai"
        }

        async fn embed(&self, _: &EmbeddingRequest) -> std::result::Result<EmbeddingResponse, ProviderError> {
            Err(ProviderError::validation("unsupported"))
        }

        async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            self.calls.lock().unwrap().push(request.clone());
            if let Some(err) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ChatResponse {
                content: format!("echo: {}", last),
                model: request.model.clone(),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 3,
                }),
            })
        }
    }

    fn runner() -> CompletionRunner {
        CompletionRunner::new(Arc::new(RateLimiter::new(RateLimitConfig::default())))
    }

    fn config() -> ServiceConfig {
        ServiceConfig::from_model_string("rag_agent", "openai:gpt-4o-mini")
            .with_temperature(0.2)
            .with_max_tokens(256)
    }

    #[tokio::test]
    async fn test_request_carries_service_settings() {
        let client = ScriptedChat::new(vec![]);
        let sink = Arc::new(InMemoryUsageSink::new());
        let response = runner()
            .with_usage_sink(sink.clone())
            .run(vec![Message::system("be brief"), Message::user("hi")], &config(), &client)
            .await
            .unwrap();

        assert_eq!(response.content, "echo: hi");
        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[0].model, "gpt-4o-mini");
        assert_eq!(calls[0].temperature, Some(0.2));
        assert_eq!(calls[0].max_tokens, Some(256));
        assert_eq!(sink.totals().await, (10, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let client = ScriptedChat::new(vec![ProviderError::rate_limited("slow down")]);
        let response = runner()
            .run(vec![Message::user("hi")], &config(), &client)
            .await;
        assert!(response.is_ok());
        assert_eq!(client.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_is_not_retried() {
        let health = Arc::new(ProviderHealth::default());
        let client = ScriptedChat::new(vec![ProviderError::quota_exhausted("insufficient_quota")]);
        let err = runner()
            .with_health(health.clone())
            .run(vec![Message::user("hi")], &config(), &client)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::QuotaExhausted));
        assert_eq!(client.calls.lock().unwrap().len(), 1);
        assert!(!health.is_available("openai"));
    }

    struct FailingSink;

    #[async_trait]
    impl UsageSink for FailingSink {
        async fn record(&self, _: UsageRecord) -> Result<()> {
            Err(HermesError::Other("usage store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_usage_sink_failure_is_not_returned() {
        let client = ScriptedChat::new(vec![]);
        let response = runner()
            .with_usage_sink(Arc::new(FailingSink))
            .run(vec![Message::user("hi")], &config(), &client)
            .await
            .unwrap();
        assert_eq!(response.content, "echo: hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_completion_charges_budget_once() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            tokens_per_window: 10_000,
            window: std::time::Duration::from_secs(600),
            max_concurrent: 1,
        }));
        let client = ScriptedChat::new(vec![
            ProviderError::rate_limited("slow down"),
            ProviderError::timeout("timed out"),
        ]);

        CompletionRunner::new(limiter.clone())
            .run(vec![Message::user("three word prompt")], &config(), &client)
            .await
            .unwrap();

        assert_eq!(client.calls.lock().unwrap().len(), 3);
        let budget = estimate_tokens("three word prompt") + 256;
        assert_eq!(limiter.remaining().await, 10_000 - budget);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_rejected() {
        let client = ScriptedChat::new(vec![]);
        let err = runner().run(Vec::new(), &config(), &client).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ValidationError));
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
