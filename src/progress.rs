//! Progress-callback trait for batch conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConverterConfigBuilder::progress_callback`] to receive
//! events while [`crate::Converter::convert_many`] works through its inputs.
//!
//! # Example
//!
//! ```rust
//! use markitdown_bridge::{ConversionProgressCallback, ConverterConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, source: &str, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{source}: {markdown_len} bytes");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConverterConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by [`crate::Converter::convert_many`] as it processes each input.
///
/// Implementations must be `Send + Sync`: inputs are converted concurrently,
/// so `on_file_start`, `on_file_complete` and `on_file_error` may be called
/// from different threads at the same time. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first input is converted.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before an input is handed to the converter.
    fn on_file_start(&self, source: &str) {
        let _ = source;
    }

    /// Called when an input converted successfully.
    ///
    /// `markdown_len` is the byte length of the produced Markdown.
    fn on_file_complete(&self, source: &str, markdown_len: usize) {
        let _ = (source, markdown_len);
    }

    /// Called when an input failed.
    fn on_file_error(&self, source: &str, error: &str) {
        let _ = (source, error);
    }

    /// Called once after every input has been attempted.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConverterConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
