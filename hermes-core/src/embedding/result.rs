//! Batch inputs, outcomes and progress.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ErrorKind;

/// One input text and its position in the caller's list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    pub text: String,
}

impl BatchItem {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Number texts in input order
    pub fn from_texts<I, S>(texts: I) -> Vec<BatchItem>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| BatchItem::new(index, text))
            .collect()
    }
}

/// An input that did not produce an embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Position in the caller's input list
    pub index: usize,
    pub text_preview: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
    /// Zero-based batch the item belonged to
    pub batch_index: usize,
}

/// Outcome of one embedding run.
///
/// Failed inputs are never represented by placeholder vectors: they are
/// absent from `embeddings` and present in `failed_items`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Vectors of successful inputs, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// Input index of each entry in `embeddings`
    pub embedded_indices: Vec<usize>,
    pub failed_items: Vec<FailedItem>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_requested: usize,
}

impl BatchResult {
    pub fn new(total_requested: usize) -> Self {
        Self {
            total_requested,
            ..Default::default()
        }
    }

    pub fn add_success(&mut self, index: usize, embedding: Vec<f32>) {
        self.embeddings.push(embedding);
        self.embedded_indices.push(index);
        self.success_count += 1;
    }

    pub fn add_failure(&mut self, failure: FailedItem) {
        self.failed_items.push(failure);
        self.failure_count += 1;
    }

    /// Inputs with an outcome so far
    pub fn processed(&self) -> usize {
        self.success_count + self.failure_count
    }

    /// Every requested input has exactly one outcome
    pub fn is_complete(&self) -> bool {
        self.processed() == self.total_requested
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    /// Failures with the given classification
    pub fn failures_of(&self, kind: ErrorKind) -> impl Iterator<Item = &FailedItem> {
        self.failed_items.iter().filter(move |f| f.error_kind == kind)
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            processed: self.processed(),
            total: self.total_requested,
            failed: self.failure_count,
        }
    }
}

/// Snapshot emitted after every batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub failed: usize,
}

impl BatchProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Processed {}/{} texts", self.processed, self.total)?;
        if self.failed > 0 {
            write!(f, " ({} failed)", self.failed)?;
        }
        Ok(())
    }
}

/// Progress observer
pub type ProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// Leading `max_chars` characters of `text`
pub fn text_preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
