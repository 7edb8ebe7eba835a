//! Core data types that flow through ingestion and question answering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Extracted plain text plus the file it came from.
///
/// Transient: exists only while an ingestion run is in flight.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Caller-supplied grounding hints folded into the prompt instruction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hints {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_type: Option<String>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        blank(&self.company_name) && blank(&self.company_type)
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// A single question from a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(flatten)]
    pub hints: Hints,
    /// Overrides `generation.structured` for this request.
    #[serde(default)]
    pub structured: Option<bool>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// A fixed-shape answer whose fields were validated against the configured schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredAnswer {
    fields: BTreeMap<String, String>,
}

impl StructuredAnswer {
    pub(crate) fn from_fields(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// The answer returned for a [`ChatRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatResponse {
    Text(String),
    Structured(StructuredAnswer),
}

impl ChatResponse {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChatResponse::Text(t) => Some(t),
            ChatResponse::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredAnswer> {
        match self {
            ChatResponse::Structured(s) => Some(s),
            ChatResponse::Text(_) => None,
        }
    }
}

/// Outcome of an ingestion run.
///
/// Failures to find documents are reported here rather than raised.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestResult {
    pub success: bool,
    pub reason: String,
    /// Documents whose text was handed to the index.
    pub documents: usize,
    /// Documents skipped because extraction failed or yielded no text.
    pub skipped: usize,
    /// Records written to the index.
    pub records: usize,
}

impl IngestResult {
    pub(crate) fn failed(reason: impl Into<String>, skipped: usize) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            documents: 0,
            skipped,
            records: 0,
        }
    }
}
