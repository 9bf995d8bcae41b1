//! Progress-callback trait for batch OCR events.
//!
//! Inject an [`Arc<dyn OcrProgressCallback>`] via
//! [`crate::config::FormulaOcrConfigBuilder::progress_callback`] to observe the
//! dispatcher as batches complete. The trait is `Send + Sync`; batches finish
//! out of order, so `on_batch_complete` and `on_batch_error` arrive in
//! completion order, not batch order.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_formula::{FormulaOcrConfig, OcrProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl OcrProgressCallback for Counter {
//!     fn on_batch_complete(&self, _batch: usize, _total: usize, recognised: usize) {
//!         self.0.fetch_add(recognised, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = FormulaOcrConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the OCR dispatcher. All methods default to no-ops.
pub trait OcrProgressCallback: Send + Sync {
    /// Called once before the first batch is sent.
    fn on_ocr_start(&self, total_regions: usize, total_batches: usize) {
        let _ = (total_regions, total_batches);
    }

    /// Called when a batch returned and was parsed.
    ///
    /// * `batch`      — 1-indexed batch number
    /// * `recognised` — formulas the model returned LaTeX for
    fn on_batch_complete(&self, batch: usize, total_batches: usize, recognised: usize) {
        let _ = (batch, total_batches, recognised);
    }

    /// Called when a batch failed; its regions keep empty LaTeX.
    fn on_batch_error(&self, batch: usize, total_batches: usize, error: &str) {
        let _ = (batch, total_batches, error);
    }

    /// Called once after every batch has completed or failed.
    fn on_ocr_complete(&self, total_batches: usize, failed_batches: usize) {
        let _ = (total_batches, failed_batches);
    }
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl OcrProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FormulaOcrConfig`].
pub type ProgressCallback = Arc<dyn OcrProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        errors: AtomicUsize,
        recognised: AtomicUsize,
    }

    impl OcrProgressCallback for Tracking {
        fn on_batch_complete(&self, _batch: usize, _total: usize, recognised: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.recognised.fetch_add(recognised, Ordering::SeqCst);
        }

        fn on_batch_error(&self, _batch: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_ocr_start(40, 2);
        cb.on_batch_complete(1, 2, 30);
        cb.on_batch_error(2, 2, "timeout");
        cb.on_ocr_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();
        cb.on_batch_complete(2, 3, 28);
        cb.on_batch_complete(1, 3, 30);
        cb.on_batch_error(3, 3, "HTTP 500");

        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.recognised.load(Ordering::SeqCst), 58);
    }
}
