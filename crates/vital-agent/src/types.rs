use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Detected document language.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Chinese,
    English,
}

/// Supported ingestion formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Text,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::Docx),
            "xlsx" | "xls" => Some(Self::Xlsx),
            "txt" | "md" | "markdown" => Some(Self::Text),
            _ => None,
        }
    }

    /// MIME-ish label sent to the parsing service.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Text => "text",
        }
    }
}

/// A parsed document, identified by its canonical absolute path. Immutable
/// once parsed; discarded after segmentation.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Canonical absolute path — identical files reached via different
    /// relative paths resolve to the same identity.
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub language: Language,
    pub text: String,
}

/// A chunk of parsed document text. Embedding is attached exactly once,
/// after which the segment is handed to the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    /// Source document path (canonical form).
    pub source: String,
    /// Position within the document.
    pub index: usize,
    pub text: String,
    /// Set by the reference-content filter. Reference segments are logged
    /// but never embedded or stored.
    pub is_reference: bool,
    pub embedding: Option<Vec<f32>>,
}

impl Segment {
    pub fn new(source: impl Into<String>, index: usize, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            index,
            text: text.into(),
            is_reference: false,
            embedding: None,
        }
    }
}

/// The persisted unit in the vector store: one per non-reference segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

impl VectorRecord {
    /// Build a record from an embedded segment. Returns None for segments
    /// that were never embedded.
    pub fn from_segment(segment: &Segment) -> Option<Self> {
        let vector = segment.embedding.clone()?;
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), segment.source.clone());
        metadata.insert("segment_index".to_string(), segment.index.to_string());
        Some(Self {
            id: segment.id.to_string(),
            vector,
            text: segment.text.clone(),
            metadata,
        })
    }
}

/// One ranked passage returned by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

/// A single turn of conversation history, as supplied by the web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Counts returned by document ingestion so callers can scope retries to
/// the failed subset instead of re-ingesting the whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub source: String,
    pub language: Option<Language>,
    pub segments_total: usize,
    pub references_filtered: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
    pub indexed: usize,
    pub ingested_at: chrono::DateTime<chrono::Utc>,
}
