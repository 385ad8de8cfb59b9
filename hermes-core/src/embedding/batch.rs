//! The batch embedder: partition, pace, retry and fold results.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::result::{BatchItem, BatchResult, FailedItem, ProgressCallback, text_preview};
use super::retry::{RetryConfig, with_retry};
use crate::error::ErrorKind;
use crate::provider::{
    EmbeddingRequest, EmbeddingResponse, ProviderCatalog, ProviderHealth, TransportClient,
};
use crate::rate_limit::{RateLimiter, estimate_batch_tokens};
use crate::resolver::ServiceConfig;
use crate::stores::{UsageRecord, UsageSink};

/// Per-run options
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Called after every batch
    pub progress: Option<ProgressCallback>,
    /// Checked before each batch is sent
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Embeds ordered inputs batch by batch against one client
pub struct BatchEmbedder {
    catalog: Arc<ProviderCatalog>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    batch_size: usize,
    preview_chars: usize,
    usage: Option<Arc<dyn UsageSink>>,
    health: Option<Arc<ProviderHealth>>,
}

impl BatchEmbedder {
    pub fn new(catalog: Arc<ProviderCatalog>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            catalog,
            limiter,
            retry: RetryConfig::default(),
            batch_size: 100,
            preview_chars: 200,
            usage: None,
            health: None,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
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

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed `items` and account for every one of them in the result.
    ///
    /// Batches run sequentially. Quota exhaustion fails every unprocessed
    /// item and ends the run; any other failure is confined to its batch.
    pub async fn run(
        &self,
        items: Vec<BatchItem>,
        config: &ServiceConfig,
        client: &dyn TransportClient,
        options: RunOptions,
    ) -> BatchResult {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "embedding_run",
            %run_id,
            service = %config.service_name,
            provider = client.provider(),
            model = %config.model,
        );
        self.run_batches(items, config, client, options)
            .instrument(span)
            .await
    }

    async fn run_batches(
        &self,
        items: Vec<BatchItem>,
        config: &ServiceConfig,
        client: &dyn TransportClient,
        options: RunOptions,
    ) -> BatchResult {
        let mut result = BatchResult::new(items.len());
        if items.is_empty() {
            return result;
        }

        let dimensions = if self.catalog.should_omit_dimensions(client.provider()) {
            None
        } else {
            config.dimensions
        };

        let batches = partition(items, self.batch_size);
        info!(
            texts = result.total_requested,
            batches = batches.len(),
            batch_size = self.batch_size,
            "Starting embedding run"
        );

        let mut pending = batches.into_iter().enumerate();
        while let Some((batch_index, batch)) = pending.next() {
            if options.cancel.is_cancelled() {
                warn!(batch_index, "Embedding run cancelled");
                self.fail_items(&mut result, batch, batch_index, ErrorKind::Cancelled, "Run cancelled");
                for (batch_index, batch) in pending.by_ref() {
                    self.fail_items(&mut result, batch, batch_index, ErrorKind::Cancelled, "Run cancelled");
                }
                self.report(&result, &options);
                break;
            }

            let quota = self
                .embed_batch(&mut result, batch, batch_index, config, dimensions, client)
                .await;

            if let Some(message) = quota {
                for (batch_index, batch) in pending.by_ref() {
                    self.fail_items(&mut result, batch, batch_index, ErrorKind::QuotaExhausted, &message);
                }
                self.report(&result, &options);
                break;
            }

            self.report(&result, &options);
        }

        debug_assert!(result.is_complete());
        info!(
            succeeded = result.success_count,
            failed = result.failure_count,
            "Embedding run finished"
        );
        result
    }

    /// Returns the provider message when the run must stop for quota exhaustion
    async fn embed_batch(
        &self,
        result: &mut BatchResult,
        batch: Vec<BatchItem>,
        batch_index: usize,
        config: &ServiceConfig,
        dimensions: Option<usize>,
        client: &dyn TransportClient,
    ) -> Option<String> {
        let (valid, blank): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(|item| !item.text.trim().is_empty());

        if !blank.is_empty() {
            debug!(batch_index, count = blank.len(), "Rejecting blank inputs");
            self.fail_items(result, blank, batch_index, ErrorKind::ValidationError, "Input text is empty");
        }
        if valid.is_empty() {
            return None;
        }

        let request = EmbeddingRequest {
            model: config.model.clone(),
            input: valid.iter().map(|item| item.text.clone()).collect(),
            dimensions,
        };
        let estimated = estimate_batch_tokens(&request.input);
        debug!(batch_index, inputs = valid.len(), estimated_tokens = estimated, "Embedding batch");

        let retry = &self.retry;
        let request = &request;
        let outcome = self
            .limiter
            .with_budget(estimated, move || with_retry(retry, move || client.embed(request)))
            .await;

        let provider = client.provider();
        match outcome {
            Ok(response) => {
                if let Some(health) = &self.health {
                    health.record_success(provider);
                }
                self.fold_response(result, valid, response, batch_index, config, estimated)
                    .await;
                None
            }
            Err(e) if e.is_quota_exhausted() => {
                error!(batch_index, error = %e, "Quota exhausted, stopping run");
                if let Some(health) = &self.health {
                    health.trip(provider);
                }
                let message = e.to_string();
                self.fail_items(result, valid, batch_index, ErrorKind::QuotaExhausted, &message);
                Some(message)
            }
            Err(e) => {
                warn!(batch_index, kind = %e.kind(), error = %e, "Batch failed");
                if e.is_retryable() {
                    if let Some(health) = &self.health {
                        health.record_failure(provider);
                    }
                }
                self.fail_items(result, valid, batch_index, e.kind(), &e.to_string());
                None
            }
        }
    }

    async fn fold_response(
        &self,
        result: &mut BatchResult,
        valid: Vec<BatchItem>,
        response: EmbeddingResponse,
        batch_index: usize,
        config: &ServiceConfig,
        estimated: u64,
    ) {
        let expected = valid.len();
        let returned = response.embeddings.len();
        if returned != expected {
            warn!(batch_index, expected, returned, "Provider returned a different number of embeddings");
        }

        let mut succeeded = 0usize;
        let mut vectors = response.embeddings.into_iter();
        for item in valid {
            match vectors.next() {
                Some(vector) if !vector.is_empty() => {
                    result.add_success(item.index, vector);
                    succeeded += 1;
                }
                Some(_) => {
                    let failure = self.failure(&item, batch_index, ErrorKind::ValidationError, "Provider returned an empty embedding");
                    result.add_failure(failure);
                }
                None => {
                    let message = format!("Provider returned {} embeddings for {} inputs", returned, expected);
                    let failure = self.failure(&item, batch_index, ErrorKind::ValidationError, &message);
                    result.add_failure(failure);
                }
            }
        }

        if succeeded == 0 {
            return;
        }
        let Some(sink) = &self.usage else {
            return;
        };

        let tokens_in = response
            .usage
            .map(|u| u.prompt_tokens as u64)
            .filter(|t| *t > 0)
            .unwrap_or(estimated);
        let record = UsageRecord::new(config.service_name.clone(), config.model.clone(), tokens_in, 0);
        if let Err(e) = sink.record(record).await {
            warn!(batch_index, error = %e, "Failed to record usage");
        }
    }

    fn failure(&self, item: &BatchItem, batch_index: usize, kind: ErrorKind, message: &str) -> FailedItem {
        FailedItem {
            index: item.index,
            text_preview: text_preview(&item.text, self.preview_chars),
            error_kind: kind,
            error_message: message.to_string(),
            batch_index,
        }
    }

    fn fail_items(
        &self,
        result: &mut BatchResult,
        items: Vec<BatchItem>,
        batch_index: usize,
        kind: ErrorKind,
        message: &str,
    ) {
        for item in &items {
            result.add_failure(self.failure(item, batch_index, kind, message));
        }
    }

    fn report(&self, result: &BatchResult, options: &RunOptions) {
        let progress = result.progress();
        info!(
            processed = progress.processed,
            total = progress.total,
            failed = progress.failed,
            "{}",
            progress
        );
        if let Some(callback) = &options.progress {
            callback(&progress);
        }
    }
}

fn partition(items: Vec<BatchItem>, size: usize) -> Vec<Vec<BatchItem>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}
