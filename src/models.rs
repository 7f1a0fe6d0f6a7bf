//! Core data models shared by ingestion and query.
//!
//! These types represent the records extracted from uploaded spreadsheets,
//! the scored results of retrieval, and the answers produced by the pipeline.

use serde::{Deserialize, Serialize};

/// Where a record came from inside its uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOrigin {
    /// Sanitized file name the record was extracted from.
    pub source: String,
    /// Worksheet name, for workbook formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    /// 1-based row number within the sheet or file, header included.
    pub row: usize,
}

/// One retrievable unit of text extracted from an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub text: String,
    pub origin: RecordOrigin,
}

impl DocumentRecord {
    pub fn new(text: impl Into<String>, origin: RecordOrigin) -> Self {
        Self {
            text: text.into(),
            origin,
        }
    }
}

/// A record paired with its similarity to a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: DocumentRecord,
    pub score: f32,
}

/// Prompt policy applied to a query before retrieval and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Answer the question from the retrieved context.
    Answer,
    /// Locate a single reference URL in the retrieved context.
    ReferenceLink,
}

/// Generated answer plus the retrieval context that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub mode: QueryMode,
    pub context: Vec<ScoredRecord>,
}
