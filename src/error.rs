//! Error types for the markitdown-bridge library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`ConvertError`]: **Fatal** for the call that produced it: the
//!   conversion of this one input could not complete (empty path, a bridge
//!   step failed, the pool is shutting down). Returned as `Err(ConvertError)`
//!   from every public `convert*` function.
//!
//! * [`ForeignError`]: the raw failure reported by the embedded runtime
//!   (for Python: the formatted exception, e.g.
//!   `"FileConversionException: …"`). It never escapes the crate on its own;
//!   the bridge wraps it in [`ConvertError::Bridge`] or
//!   [`ConvertError::Initialization`] together with the step that failed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the markitdown-bridge library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The caller passed an unusable argument. Detected before any handle is
    /// acquired.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    // ── Runtime errors ────────────────────────────────────────────────────
    /// A runtime handle could not be constructed.
    #[error(
        "Failed to initialise the conversion runtime ({stage}): {detail}\n\
Check that the `markitdown` package is installed for the embedded Python:\n\
  pip install 'markitdown[all]'"
    )]
    Initialization { stage: InitStage, detail: String },

    /// One step of the foreign conversion call failed.
    #[error("{} ({}): {detail}", .step.kind(), .step)]
    Bridge { step: BridgeStep, detail: String },

    // ── Pool errors ───────────────────────────────────────────────────────
    /// Every handle stayed checked out for the whole acquire timeout.
    #[error("No conversion handle became available within {waited_ms}ms (max_handles = {max_handles})")]
    PoolExhausted { waited_ms: u64, max_handles: usize },

    /// The pool has been drained; no new conversions are accepted.
    #[error("Converter is shutting down; no new conversions are accepted")]
    ShuttingDown,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Stable, machine-readable tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::InvalidArgument { .. } => "InvalidArgument",
            ConvertError::Initialization { .. } => "InitializationFailure",
            ConvertError::Bridge { step, .. } => step.kind(),
            ConvertError::PoolExhausted { .. } => "PoolExhausted",
            ConvertError::ShuttingDown => "ShuttingDown",
            ConvertError::OutputWriteFailed { .. } => "OutputWriteFailed",
            ConvertError::InvalidConfig(_) => "InvalidConfig",
            ConvertError::Internal(_) => "Internal",
        }
    }

    /// The bridge step that failed, if this is a bridge failure.
    pub fn bridge_step(&self) -> Option<BridgeStep> {
        match self {
            ConvertError::Bridge { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub(crate) fn bridge(step: BridgeStep, err: ForeignError) -> Self {
        ConvertError::Bridge {
            step,
            detail: err.message,
        }
    }

    pub(crate) fn init(stage: InitStage, err: ForeignError) -> Self {
        ConvertError::Initialization {
            stage,
            detail: err.message,
        }
    }
}

/// The seven steps of a bridge call, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BridgeStep {
    /// Call the entry point with no arguments to build a converter object.
    Instantiate,
    /// Resolve the converter's conversion method and check it is callable.
    MethodLookup,
    /// Turn the path into a foreign string.
    ArgumentMarshal,
    /// Wrap the foreign string in a positional-argument container.
    ArgumentContainer,
    /// Call the conversion method. Library-side conversion errors land here.
    Invocation,
    /// Read the text field off the returned object.
    FieldExtraction,
    /// Copy the foreign string into a Rust `String`.
    ResultDecode,
}

impl BridgeStep {
    /// All steps in execution order.
    pub const ALL: [BridgeStep; 7] = [
        BridgeStep::Instantiate,
        BridgeStep::MethodLookup,
        BridgeStep::ArgumentMarshal,
        BridgeStep::ArgumentContainer,
        BridgeStep::Invocation,
        BridgeStep::FieldExtraction,
        BridgeStep::ResultDecode,
    ];

    /// Failure-kind name reported when this step fails.
    pub fn kind(self) -> &'static str {
        match self {
            BridgeStep::Instantiate => "InstantiationFailed",
            BridgeStep::MethodLookup => "MethodLookupFailed",
            BridgeStep::ArgumentMarshal => "ArgumentMarshalFailed",
            BridgeStep::ArgumentContainer => "ArgumentContainerFailed",
            BridgeStep::Invocation => "InvocationFailed",
            BridgeStep::FieldExtraction => "FieldExtractionFailed",
            BridgeStep::ResultDecode => "ResultDecodeFailed",
        }
    }
}

impl fmt::Display for BridgeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeStep::Instantiate => "instantiating the converter",
            BridgeStep::MethodLookup => "resolving the conversion method",
            BridgeStep::ArgumentMarshal => "marshalling the path argument",
            BridgeStep::ArgumentContainer => "building the argument tuple",
            BridgeStep::Invocation => "running the conversion",
            BridgeStep::FieldExtraction => "reading the text field",
            BridgeStep::ResultDecode => "decoding the text field",
        };
        f.write_str(s)
    }
}

/// Where handle initialization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InitStage {
    /// Booting the embedded runtime itself.
    RuntimeStart,
    /// Importing the conversion module.
    ModuleImport,
    /// Looking up the entry point on the module.
    EntryPointLookup,
    /// The entry point exists but cannot be called.
    EntryPointNotCallable,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InitStage::RuntimeStart => "runtime start",
            InitStage::ModuleImport => "module import",
            InitStage::EntryPointLookup => "entry point lookup",
            InitStage::EntryPointNotCallable => "entry point not callable",
        };
        f.write_str(s)
    }
}

/// A failure reported by the embedded runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ForeignError {
    pub message: String,
}

impl ForeignError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
