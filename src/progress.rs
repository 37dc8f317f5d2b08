//! Progress-callback trait for content-generation batch events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the generator dispatches each batch.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a broadcast channel, a WebSocket or a
//! terminal progress bar without the library knowing how the host
//! communicates. The trait is `Send + Sync` because batches may run
//! concurrently when `concurrency > 1`.

use std::sync::Arc;

/// Called by the content generator as it processes each batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `concurrency > 1` the per-batch methods may be
/// called concurrently.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once before the first batch is dispatched.
    ///
    /// # Arguments
    /// * `total_batches`: batches that will be attempted on the live tier
    /// * `total_slides` : slides carrying at least one AI slot
    fn on_generation_start(&self, total_batches: usize, total_slides: usize) {
        let _ = (total_batches, total_slides);
    }

    /// Called before each attempt of a batch (retries included).
    ///
    /// # Arguments
    /// * `batch`  : 0-indexed batch number
    /// * `attempt`: 1-indexed attempt number
    fn on_batch_start(&self, batch: usize, attempt: u32) {
        let _ = (batch, attempt);
    }

    /// Called when a batch's response was parsed successfully.
    ///
    /// # Arguments
    /// * `batch` : 0-indexed batch number
    /// * `slides`: slides resolved by this batch
    fn on_batch_complete(&self, batch: usize, slides: usize) {
        let _ = (batch, slides);
    }

    /// Called when a batch gives up; its slots fall to the next tier.
    fn on_batch_error(&self, batch: usize, error: &str) {
        let _ = (batch, error);
    }

    /// Called once after every batch has settled.
    fn on_generation_complete(&self, total_batches: usize, succeeded: usize) {
        let _ = (total_batches, succeeded);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;
