//! Configuration types for the conversion bridge.
//!
//! All behaviour is controlled through [`ConverterConfig`], built via its
//! [`ConverterConfigBuilder`]. The foreign names (module, entry point,
//! method, result fields) live here rather than as scattered constants so a
//! different converter with the same shape can be plugged in without code
//! changes.

use crate::error::ConvertError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Module imported by every runtime handle.
pub const DEFAULT_MODULE: &str = "markitdown";
/// Class (or factory) called with no arguments to build a converter.
pub const DEFAULT_ENTRY_POINT: &str = "MarkItDown";
/// Method on the converter taking a single path argument.
pub const DEFAULT_METHOD: &str = "convert";
/// Attribute of the conversion result holding the Markdown text.
pub const DEFAULT_TEXT_FIELD: &str = "text_content";
/// Optional attribute of the conversion result holding a document title.
pub const DEFAULT_TITLE_FIELD: &str = "title";

/// Configuration for a [`crate::Converter`] and its handle pool.
///
/// # Example
/// ```rust
/// use markitdown_bridge::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .max_handles(2)
///     .acquire_timeout_secs(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_handles, 2);
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Module to import. Default: `markitdown`.
    pub module: String,

    /// Entry point on the module, called with no arguments. Default: `MarkItDown`.
    pub entry_point: String,

    /// Conversion method on the converter instance. Default: `convert`.
    pub method: String,

    /// Result attribute holding the extracted text. Default: `text_content`.
    pub text_field: String,

    /// Result attribute holding the title, read best-effort. Default: `title`.
    pub title_field: Option<String>,

    /// Upper bound on live runtime handles. Default: 4.
    ///
    /// With CPython every handle shares the one interpreter, so extra
    /// handles only help when the converter releases the GIL (file I/O,
    /// native parsers). Set to 1 for strictly serialised access.
    pub max_handles: usize,

    /// How long `acquire` waits for a handle once `max_handles` are all
    /// checked out. Default: 30.
    pub acquire_timeout_secs: u64,

    /// How long a drain waits for in-flight conversions before cleaning the
    /// idle handles. Default: 5.
    pub shutdown_grace_secs: u64,

    /// Handles to initialise eagerly when the converter is built. Default: 0.
    ///
    /// A value of at least 1 surfaces a broken Python environment at start-up
    /// instead of on the first conversion.
    pub prewarm_handles: usize,

    /// Directories prepended to `sys.path` before the module is imported.
    pub python_paths: Vec<PathBuf>,

    /// Concurrent conversions in [`crate::Converter::convert_many`].
    /// `None` means `max_handles`.
    pub concurrency: Option<usize>,

    /// Optional per-file progress events for batch conversion.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            method: DEFAULT_METHOD.to_string(),
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            title_field: Some(DEFAULT_TITLE_FIELD.to_string()),
            max_handles: 4,
            acquire_timeout_secs: 30,
            shutdown_grace_secs: 5,
            prewarm_handles: 0,
            python_paths: Vec::new(),
            concurrency: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("module", &self.module)
            .field("entry_point", &self.entry_point)
            .field("method", &self.method)
            .field("text_field", &self.text_field)
            .field("title_field", &self.title_field)
            .field("max_handles", &self.max_handles)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("shutdown_grace_secs", &self.shutdown_grace_secs)
            .field("prewarm_handles", &self.prewarm_handles)
            .field("python_paths", &self.python_paths)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Effective batch concurrency.
    pub fn batch_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(self.max_handles).max(1)
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.config.module = name.into();
        self
    }

    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.config.entry_point = name.into();
        self
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.config.method = name.into();
        self
    }

    pub fn text_field(mut self, name: impl Into<String>) -> Self {
        self.config.text_field = name.into();
        self
    }

    pub fn title_field(mut self, name: Option<String>) -> Self {
        self.config.title_field = name;
        self
    }

    pub fn max_handles(mut self, n: usize) -> Self {
        self.config.max_handles = n;
        self
    }

    pub fn acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.config.acquire_timeout_secs = secs;
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_secs = secs;
        self
    }

    pub fn prewarm_handles(mut self, n: usize) -> Self {
        self.config.prewarm_handles = n;
        self
    }

    pub fn python_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.python_paths.push(dir.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = Some(n.max(1));
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        for (label, value) in [
            ("module", &c.module),
            ("entry_point", &c.entry_point),
            ("method", &c.method),
            ("text_field", &c.text_field),
        ] {
            if value.trim().is_empty() {
                return Err(ConvertError::InvalidConfig(format!(
                    "{label} must not be empty"
                )));
            }
        }
        if c.max_handles == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_handles must be ≥ 1".into(),
            ));
        }
        if c.prewarm_handles > c.max_handles {
            return Err(ConvertError::InvalidConfig(format!(
                "prewarm_handles ({}) cannot exceed max_handles ({})",
                c.prewarm_handles, c.max_handles
            )));
        }
        Ok(self.config)
    }
}
