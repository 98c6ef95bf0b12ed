//! Progress-callback trait for per-page run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::ConfigBuilder::progress_callback`] to receive one event
//! per page attempted. The library never draws anything itself; the CLI
//! forwards these events to an `indicatif` bar.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocrsuite::{Config, ContentType, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl RunProgressCallback for Counter {
//!     fn on_page_complete(&self, _page_id: &str, _kind: ContentType) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = Config::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ContentType;
use std::sync::Arc;

/// Called by the batch driver as it processes each page.
///
/// All methods default to no-ops. Implementations must be `Send + Sync`
/// because pages may be in flight concurrently when `ocr.concurrency > 1`.
pub trait RunProgressCallback: Send + Sync {
    /// Called once before the first page, with the number of pages to process.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is classified.
    fn on_page_start(&self, page_id: &str) {
        let _ = page_id;
    }

    /// Called when a page produced a content item.
    fn on_page_complete(&self, page_id: &str, content_type: ContentType) {
        let _ = (page_id, content_type);
    }

    /// Called when a page failed and was recorded in the error ledger.
    fn on_page_error(&self, page_id: &str, error: &str) {
        let _ = (page_id, error);
    }

    /// Called once after every page has been attempted.
    fn on_run_complete(&self, pages_processed: usize, failed: usize) {
        let _ = (pages_processed, failed);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::Config::progress`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
