//! Progress-callback trait for per-diagram conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events while diagrams are rendered. The CLI uses it to drive a progress
//! bar; library callers can forward the events anywhere.
//!
//! # Example
//!
//! ```rust
//! use docconv::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_diagram_complete(&self, index: usize, total: usize, bytes: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Diagram {}/{} rendered ({} bytes)", index, total, bytes);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     rendered: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it renders each diagram.
///
/// Implementations must be `Send + Sync`: diagram requests run concurrently,
/// so `on_diagram_start`, `on_diagram_complete` and `on_diagram_error` may
/// fire out of document order. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after preprocessing, before any diagram is requested.
    ///
    /// `total_diagrams` is zero for documents without diagrams and for
    /// DOCX input.
    fn on_conversion_start(&self, total_diagrams: usize) {
        let _ = total_diagrams;
    }

    /// Called just before the rendering request for a diagram is sent.
    fn on_diagram_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a diagram image has been received and validated.
    fn on_diagram_complete(&self, index: usize, total: usize, bytes: usize) {
        let _ = (index, total, bytes);
    }

    /// Called when a diagram failed after all retries.
    fn on_diagram_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called right before the conversion engine is invoked.
    fn on_engine_start(&self, engine: &str) {
        let _ = engine;
    }

    /// Called once after the output document has been written.
    fn on_conversion_complete(&self, total_diagrams: usize, rendered: usize) {
        let _ = (total_diagrams, rendered);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        announced: AtomicUsize,
        rendered: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_conversion_start(&self, total_diagrams: usize) {
            self.announced.store(total_diagrams, Ordering::SeqCst);
        }

        fn on_diagram_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_diagram_complete(&self, _index: usize, _total: usize, _bytes: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_diagram_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total_diagrams: usize, rendered: usize) {
            self.rendered.store(rendered, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(2);
        cb.on_diagram_start(1, 2);
        cb.on_diagram_complete(1, 2, 42);
        cb.on_diagram_error(2, 2, "HTTP 503");
        cb.on_engine_start("pandoc");
        cb.on_conversion_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_conversion_start(3);
        tracker.on_diagram_start(1, 3);
        tracker.on_diagram_complete(1, 3, 100);
        tracker.on_diagram_start(2, 3);
        tracker.on_diagram_complete(2, 3, 200);
        tracker.on_diagram_start(3, 3);
        tracker.on_diagram_error(3, 3, "timeout");
        tracker.on_conversion_complete(3, 2);

        assert_eq!(tracker.announced.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.rendered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(1);
        cb.on_diagram_complete(1, 1, 512);
    }
}
