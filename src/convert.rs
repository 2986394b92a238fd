//! The public conversion facade.
//!
//! [`Converter`] owns the handle pool and is the only type callers need:
//!
//! ```text
//! convert(path) ──▶ validate ──▶ pool.acquire ──▶ bridge::call_convert ──▶ release ──▶ output
//! ```
//!
//! The pool is an explicit `Arc` inside the converter rather than a process
//! global, so tests and embedding applications can run several independent
//! converters side by side. Cloning a `Converter` shares its pool.

use crate::bridge;
use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::output::{BatchStats, ConversionOutput};
use crate::pool::{DrainReport, HandlePool};
use crate::runtime::ForeignRuntime;
use crate::shutdown::ShutdownCoordinator;
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Converts files to Markdown through a pool of runtime handles.
pub struct Converter<R: ForeignRuntime> {
    pool: Arc<HandlePool<R>>,
}

impl<R: ForeignRuntime> Clone for Converter<R> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<R: ForeignRuntime> Converter<R> {
    /// Build a converter over `runtime`, initialising
    /// `config.prewarm_handles` handles up front.
    pub fn new(runtime: Arc<R>, config: ConverterConfig) -> Result<Self, ConvertError> {
        let prewarm = config.prewarm_handles;
        let pool = Arc::new(HandlePool::new(runtime, config));
        if prewarm > 0 {
            pool.prewarm(prewarm)?;
        }
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: Arc<HandlePool<R>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<HandlePool<R>> {
        &self.pool
    }

    pub fn config(&self) -> &ConverterConfig {
        self.pool.config()
    }

    /// Convert one file on the calling thread.
    ///
    /// An empty path is rejected before any handle is acquired. Otherwise a
    /// handle is checked out for the duration of the bridge call and returned
    /// whether the call succeeds or fails. No retries are attempted.
    pub fn convert_sync(&self, path: impl AsRef<str>) -> Result<ConversionOutput, ConvertError> {
        let path = path.as_ref();
        validate_path(path)?;

        let start = Instant::now();
        let handle = self.pool.acquire()?;
        let handle_id = handle.id();
        let result = bridge::call_convert(&handle, path, self.pool.config());
        handle.release();

        let extracted = result.inspect_err(|e| warn!("Conversion of '{}' failed: {}", path, e))?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Converted '{}': {} bytes in {}ms (handle {})",
            path,
            extracted.markdown.len(),
            duration_ms,
            handle_id
        );

        Ok(ConversionOutput {
            source: path.to_string(),
            markdown: extracted.markdown,
            title: extracted.title,
            handle_id,
            duration_ms,
        })
    }

    /// Convert one file without blocking the async executor.
    ///
    /// The foreign call runs under `spawn_blocking`: it is CPU- and I/O-bound
    /// and holds the interpreter lock for its whole duration.
    pub async fn convert(&self, path: impl AsRef<str>) -> Result<ConversionOutput, ConvertError> {
        let path = path.as_ref().to_string();
        validate_path(&path)?;

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.convert_sync(&path))
            .await
            .map_err(|e| ConvertError::Internal(format!("Conversion task panicked: {}", e)))?
    }

    /// Convert a file and write the Markdown to `output_path`.
    ///
    /// Uses atomic write (uniquely named temp file in the target directory,
    /// then rename) to prevent partial files.
    pub async fn convert_to_file(
        &self,
        input: impl AsRef<str>,
        output_path: impl AsRef<Path>,
    ) -> Result<ConversionOutput, ConvertError> {
        let output = self.convert(input).await?;
        let path = output_path.as_ref().to_path_buf();
        let markdown = output.markdown.clone();

        tokio::task::spawn_blocking(move || {
            write_atomically(&path, markdown.as_bytes())
                .map(|()| debug!("Wrote {}", path.display()))
                .map_err(|source| ConvertError::OutputWriteFailed { path, source })
        })
        .await
        .map_err(|e| ConvertError::Internal(format!("Write task panicked: {}", e)))??;

        Ok(output)
    }

    /// Convert an in-memory document.
    ///
    /// The converter only accepts paths, so `bytes` are written to a managed
    /// temp file whose name ends in `.{extension}` (converters pick their
    /// parser from it). The file is removed when this call returns.
    pub async fn convert_from_bytes(
        &self,
        bytes: &[u8],
        extension: Option<&str>,
    ) -> Result<ConversionOutput, ConvertError> {
        let suffix = extension
            .map(|ext| format!(".{}", ext.trim_start_matches('.')))
            .unwrap_or_default();
        let mut tmp = tempfile::Builder::new()
            .prefix("markitdown-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| ConvertError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| ConvertError::Internal(format!("tempfile write: {e}")))?;

        let path = tmp.path().to_string_lossy().to_string();
        let mut output = self.convert(&path).await?;
        output.source = format!("<memory{suffix}>");
        Ok(output)
    }

    /// Convert several files concurrently.
    ///
    /// At most `config.batch_concurrency()` conversions run at once. Results
    /// come back in input order; one failing input does not stop the others.
    pub async fn convert_many<S: AsRef<str>>(
        &self,
        inputs: &[S],
    ) -> (Vec<Result<ConversionOutput, ConvertError>>, BatchStats) {
        let start = Instant::now();
        let total = inputs.len();
        let callback = self.config().progress_callback.clone();

        if let Some(ref cb) = callback {
            cb.on_batch_start(total);
        }

        let mut indexed: Vec<(usize, Result<ConversionOutput, ConvertError>)> =
            stream::iter(inputs.iter().enumerate().map(|(idx, input)| {
                let source = input.as_ref().to_string();
                let callback = callback.clone();
                async move {
                    if let Some(ref cb) = callback {
                        cb.on_file_start(&source);
                    }
                    let result = self.convert(&source).await;
                    if let Some(ref cb) = callback {
                        match &result {
                            Ok(out) => cb.on_file_complete(&source, out.markdown.len()),
                            Err(e) => cb.on_file_error(&source, &e.to_string()),
                        }
                    }
                    (idx, result)
                }
            }))
            .buffer_unordered(self.config().batch_concurrency())
            .collect()
            .await;

        indexed.sort_by_key(|(idx, _)| *idx);
        let results: Vec<_> = indexed.into_iter().map(|(_, r)| r).collect();

        let converted = results.iter().filter(|r| r.is_ok()).count();
        let stats = BatchStats {
            total_files: total,
            converted,
            failed: total - converted,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Some(ref cb) = callback {
            cb.on_batch_complete(total, converted);
        }
        info!(
            "Batch complete: {}/{} converted in {}ms",
            stats.converted, stats.total_files, stats.total_duration_ms
        );

        (results, stats)
    }

    /// Drain the pool now, waiting up to the configured grace period.
    pub fn shutdown(&self) -> DrainReport {
        self.pool.drain(self.config().shutdown_grace())
    }

    /// A coordinator that drains this converter's pool on SIGINT/SIGTERM.
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator<R> {
        ShutdownCoordinator::new(Arc::clone(&self.pool))
    }
}

#[cfg(feature = "python")]
impl Converter<crate::runtime::python::PythonRuntime> {
    /// Build a converter over the embedded CPython interpreter.
    pub fn python(config: ConverterConfig) -> Result<Self, ConvertError> {
        use crate::error::InitStage;
        use crate::runtime::python::PythonRuntime;

        let runtime = PythonRuntime::new(&config.python_paths)
            .map_err(|e| ConvertError::init(InitStage::RuntimeStart, e))?;
        Self::new(Arc::new(runtime), config)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn validate_path(path: &str) -> Result<(), ConvertError> {
    if path.is_empty() {
        return Err(ConvertError::InvalidArgument {
            reason: "file path cannot be empty".into(),
        });
    }
    Ok(())
}
