//! Batch embedding pipeline.
//!
//! Inputs are partitioned into fixed-size batches and sent one batch at a
//! time through the shared [`RateLimiter`](crate::rate_limit::RateLimiter).
//! Every input ends up either in [`BatchResult::embeddings`] or in
//! [`BatchResult::failed_items`], never both and never neither.

pub mod batch;
pub mod result;
pub mod retry;

pub use batch::{BatchEmbedder, RunOptions};
pub use result::{BatchItem, BatchProgress, BatchResult, FailedItem, ProgressCallback, text_preview};
pub use retry::{RetryConfig, RetryState, with_retry};
