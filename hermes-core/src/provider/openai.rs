//! OpenAI-compatible HTTP client.
//!
//! Every catalog provider is reached through this adapter. Authentication,
//! endpoint and error classification come from the provider's [`ProviderSpec`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::catalog::{AuthScheme, ProviderSpec};
use super::factory::ClientBinding;
use super::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, MessageRole,
    ProviderError, TokenUsage, TransportClient,
};
use crate::stores::ProviderSecret;

/// Longest error body kept in a [`ProviderError`] message
const MAX_ERROR_BODY: usize = 500;

/// HTTP client bound to one provider and one role
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    spec: Arc<ProviderSpec>,
    base_url: String,
    secret: Option<ProviderSecret>,
}

impl std::fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("provider", &self.spec.name)
            .field("base_url", &self.base_url)
            .field("secret", &self.secret)
            .finish()
    }
}

impl OpenAiCompatClient {
    /// Build a client from a resolved binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(binding: ClientBinding) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(binding.http.connect_timeout)
            .read_timeout(binding.http.read_timeout)
            .timeout(binding.http.request_timeout)
            .build()
            .map_err(|e| ProviderError::connection(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = binding.spec.base_url_for(binding.role).to_string();

        Ok(Self {
            client,
            spec: binding.spec,
            base_url,
            secret: binding.secret,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        let mut url = format!("{}/{}", self.base_url, path);
        if let (AuthScheme::QueryParam { name }, Some(secret)) = (&self.spec.auth, &self.secret) {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(name);
            url.push('=');
            url.push_str(&urlencoding::encode(secret.expose()));
        }
        url
    }

    fn authorize(&self, mut builder: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.spec.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let Some(secret) = &self.secret else {
            return builder;
        };
        match &self.spec.auth {
            AuthScheme::Bearer => builder.bearer_auth(secret.expose()),
            AuthScheme::Header { name } => builder.header(name.as_str(), secret.expose()),
            AuthScheme::QueryParam { .. } | AuthScheme::None => builder,
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.authorize(self.client.post(self.endpoint(path))).json(body);
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_error(status, &text, retry_after, &self.spec));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProviderError::decode(format!("Failed to parse {} response: {}", self.spec.name, e)))
    }
}

#[derive(Serialize)]
struct EmbeddingsWireRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsWireResponse {
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Serialize)]
struct ChatWireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatWireResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

fn convert_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            },
            content: &m.content,
        })
        .collect()
}

fn into_embedding_response(mut wire: EmbeddingsWireResponse) -> EmbeddingResponse {
    wire.data.sort_by_key(|d| d.index);
    EmbeddingResponse {
        embeddings: wire.data.into_iter().map(|d| d.embedding).collect(),
        usage: wire.usage.map(TokenUsage::from),
    }
}

fn into_chat_response(
    wire: ChatWireResponse,
    requested_model: &str,
) -> Result<ChatResponse, ProviderError> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::decode("Provider returned no choices"))?;

    Ok(ChatResponse {
        content: choice.message.and_then(|m| m.content).unwrap_or_default(),
        model: wire.model.unwrap_or_else(|| requested_model.to_string()),
        usage: wire.usage.map(TokenUsage::from),
    })
}

/// Numeric `Retry-After` header, in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Provider message from an OpenAI-style error body, or the truncated raw body
fn error_message(body: &str) -> String {
    if let Ok(wire) = serde_json::from_str::<WireError>(body) {
        return match wire.error.code {
            Some(serde_json::Value::String(code)) => format!("{} ({})", wire.error.message, code),
            _ => wire.error.message,
        };
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY {
        trimmed.chars().take(MAX_ERROR_BODY).collect()
    } else {
        trimmed.to_string()
    }
}

/// Map a non-success HTTP response onto a [`ProviderError`]
pub(crate) fn classify_error(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
    spec: &ProviderSpec,
) -> ProviderError {
    let message = error_message(body);

    if status.is_client_error() && (status == StatusCode::PAYMENT_REQUIRED || spec.is_quota_message(body)) {
        return ProviderError::quota_exhausted(message);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT => ProviderError::timeout(message),
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::validation(message),
        _ => ProviderError::http(status.as_u16(), message),
    }
}

#[async_trait]
impl TransportClient for OpenAiCompatClient {
    fn provider(&self) -> &str {
        &self.spec.name
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        if !self.spec.supports_embeddings {
            return Err(ProviderError::validation(format!(
                "Provider '{}' does not offer embeddings",
                self.spec.name
            )));
        }

        let body = EmbeddingsWireRequest {
            model: &request.model,
            input: &request.input,
            dimensions: request.dimensions,
        };

        debug!(
            provider = %self.spec.name,
            model = %request.model,
            inputs = request.input.len(),
            "Sending embeddings request"
        );

        let wire: EmbeddingsWireResponse = self.post_json("embeddings", &body).await?;
        Ok(into_embedding_response(wire))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = ChatWireRequest {
            model: &request.model,
            messages: convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            provider = %self.spec.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let wire: ChatWireResponse = self.post_json("chat/completions", &body).await?;
        into_chat_response(wire, &request.model)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let response = self
            .authorize(self.client.get(self.endpoint("models")))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_error(status, &text, None, &self.spec))
    }

    async fn close(&self) {
        debug!(provider = %self.spec.name, "Closing provider client");
    }
}
