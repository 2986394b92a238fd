//! # markitdown-bridge
//!
//! Convert documents to Markdown by calling the Python `markitdown` library
//! through an embedded interpreter.
//!
//! ## Why this crate?
//!
//! `markitdown` handles dozens of formats (PDF, DOCX, PPTX, XLSX, HTML, …)
//! but lives in Python. Shelling out to `python -m markitdown` per file pays
//! interpreter start-up and import cost on every call. Instead this crate
//! keeps the interpreter resident, imports the module once per handle, and
//! hands initialised handles to callers from a bounded pool.
//!
//! ## Pipeline Overview
//!
//! ```text
//! path
//!  │
//!  ├─ 1. Validate   reject empty paths before touching the runtime
//!  ├─ 2. Acquire    check out an initialised handle (lazy, bounded pool)
//!  ├─ 3. Bridge     MarkItDown().convert(path).text_content, 7 checked steps
//!  ├─ 4. Release    return the handle, success or failure
//!  └─ 5. Output     Markdown + title + timing
//! ```
//!
//! SIGINT/SIGTERM trigger a drain of the pool ([`ShutdownCoordinator`])
//! before the process exits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "python")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use markitdown_bridge::{Converter, ConverterConfig};
//!
//! let converter = Converter::python(ConverterConfig::default())?;
//! let output = converter.convert_sync("report.docx")?;
//! println!("{}", output.markdown);
//! converter.shutdown();
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "python"))]
//! # fn main() {}
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `python` | on      | Embedded CPython runtime via pyo3 ([`PythonRuntime`]) |
//! | `cli`    | on      | Enables the `markitdown` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Without `python` the crate still builds; [`FakeRuntime`] or your own
//! [`ForeignRuntime`] implementation can drive the pool and bridge:
//! ```toml
//! markitdown-bridge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bridge;
pub mod config;
pub mod convert;
pub mod error;
pub mod handle;
pub mod output;
pub mod pool;
pub mod progress;
pub mod runtime;
pub mod shutdown;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder};
pub use convert::Converter;
pub use error::{BridgeStep, ConvertError, ForeignError, InitStage};
pub use handle::{HandleId, RuntimeHandle};
pub use output::{BatchStats, ConversionOutput};
pub use pool::{DrainReport, HandlePool, PooledHandle};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use runtime::fake::FakeRuntime;
#[cfg(feature = "python")]
pub use runtime::python::PythonRuntime;
pub use runtime::ForeignRuntime;
pub use shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownSignal};
