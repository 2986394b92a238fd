//! Result types returned by the conversion entry points.

use serde::{Deserialize, Serialize};

/// The Markdown produced for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// The path handed to the converter.
    pub source: String,
    /// Extracted Markdown text.
    pub markdown: String,
    /// Document title, when the converter reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Runtime handle that served the call.
    pub handle_id: u64,
    /// Wall-clock time spent in the bridge call, including acquisition.
    pub duration_ms: u64,
}

/// Summary of a [`crate::Converter::convert_many`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub converted: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}
