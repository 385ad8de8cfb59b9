//! Configuration types for Hermes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{HermesError, Result};

/// Main configuration for the Hermes pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HermesConfig {
    /// Batch and service naming settings
    pub pipeline: PipelineConfig,

    /// Backoff policy for embedding batches and chat completions
    pub retry: RetrySettings,

    /// HTTP timeouts applied to every provider client
    pub http: HttpConfig,

    /// Shared token budget
    pub rate_limit: RateLimitConfig,

    /// Service configuration cache
    pub resolver: ResolverConfig,

    /// Per-provider endpoint overrides
    pub providers: HashMap<String, ProviderOverride>,

    /// Service definitions seeding the in-memory config store
    pub services: HashMap<String, ServiceEntry>,

    /// Ordered provider chains keyed by service name
    pub fallback: HashMap<String, Vec<String>>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Texts per provider call
    pub batch_size: usize,

    /// Service name used for embeddings
    pub embedding_service: String,

    /// Service name used for chat completions
    pub chat_service: String,

    /// Characters of input kept on a failed item
    pub text_preview_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            embedding_service: "embeddings".to_string(),
            chat_service: "rag_agent".to_string(),
            text_preview_chars: 200,
        }
    }
}

/// Retry configuration as it appears in `hermes.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per batch, first try included
    pub max_attempts: usize,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    pub backoff_multiplier: f64,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub add_jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            add_jitter: false,
        }
    }
}

/// HTTP client timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Carried for completeness; reqwest folds writes into `request_timeout`
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Ceiling for a whole request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Token budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Estimated tokens admitted per window
    pub tokens_per_window: u64,

    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Operations allowed in flight at once
    pub max_concurrent: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_window: 200_000,
            window: Duration::from_secs(60),
            max_concurrent: 2,
        }
    }
}

/// Config resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Endpoint override for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_base_url: Option<String>,
}

/// One service definition, e.g. `[services.embeddings]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// `"provider:model"`, or a bare model name for OpenAI
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

fn default_temperature() -> f32 {
    0.7
}

impl HermesConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (hermes.toml)
    /// 3. File at HERMES_CONFIG_PATH, if set
    /// 4. `HERMES_*` environment variables, nested with `__`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is malformed or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(HermesConfig::default()))
            .merge(Toml::file("hermes.toml"));

        if let Ok(path) = std::env::var("HERMES_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: HermesConfig = figment
            .merge(Env::prefixed("HERMES_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: HermesConfig = Figment::from(Serialized::defaults(HermesConfig::default()))
            .merge(Toml::file(path))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first setting that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(HermesError::Configuration(
                "pipeline.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HermesError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.tokens_per_window == 0 {
            return Err(HermesError::Configuration(
                "rate_limit.tokens_per_window must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.max_concurrent == 0 {
            return Err(HermesError::Configuration(
                "rate_limit.max_concurrent must be greater than zero".to_string(),
            ));
        }
        for (service, chain) in &self.fallback {
            if chain.is_empty() {
                return Err(HermesError::Configuration(format!(
                    "fallback chain for '{}' is empty",
                    service
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = HermesConfig::default();
        assert_eq!(config.pipeline.batch_size, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(2));
        assert_eq!(config.http.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.http.request_timeout, Duration::from_secs(30));
        assert_eq!(config.resolver.cache_ttl, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = HermesConfig::default();
        config.pipeline.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(HermesError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_fallback_chain() {
        let mut config = HermesConfig::default();
        config.fallback.insert("rag_agent".to_string(), Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
batch_size = 25

[retry]
initial_delay = "500ms"

[rate_limit]
window = "1m"

[providers.ollama]
base_url = "http://gpu-box:11434/v1"

[services.embeddings]
model = "openai:text-embedding-3-small"

[services.rag_agent]
model = "gpt-4o-mini"
temperature = 0.2

[fallback]
rag_agent = ["openai", "groq"]
"#
        )
        .unwrap();

        let config = HermesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.batch_size, 25);
        assert_eq!(config.pipeline.embedding_service, "embeddings");
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(
            config.providers["ollama"].base_url.as_deref(),
            Some("http://gpu-box:11434/v1")
        );
        assert!((config.services["embeddings"].temperature - 0.7).abs() < f32::EPSILON);
        assert!((config.services["rag_agent"].temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.fallback["rag_agent"], vec!["openai", "groq"]);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nmax_concurrent = 0").unwrap();
        assert!(HermesConfig::from_file(file.path()).is_err());
    }
}
