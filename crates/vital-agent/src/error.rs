//! Typed errors for the agent core.
//!
//! Each external surface gets its own error enum so callers can tell a bad
//! request apart from an unavailable service. Transient failures are retried
//! by the component that owns the call; structural failures propagate.

use std::path::PathBuf;
use thiserror::Error;

/// Document ingestion failure. Never retried by the preprocessor itself —
/// the caller decides whether to retry the whole document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported document format: .{0}")]
    UnsupportedFormat(String),

    #[error("failed to read document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing service rejected the document: {0}")]
    Rejected(String),

    #[error("parsing service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("parsing service returned an unreadable response: {0}")]
    InvalidResponse(String),
}

/// Embedding API failure. Batch-level failures are reported per segment so
/// retries can be scoped to the failed subset.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding API returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding API error: {0}")]
    Api(String),

    #[error("embedding request failed: {0}")]
    Network(String),
}

/// Vector store I/O failure. Failed upserts leave the affected segments
/// un-indexed; the caller must retry or drop them explicitly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store request failed: {0}")]
    Network(String),

    #[error("vector store error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("vector store returned an unreadable response: {0}")]
    InvalidResponse(String),
}

/// Retrieval failure: either invalid caller input or a downstream error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("top_k must be positive, got {0}")]
    InvalidTopK(usize),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A single tool invocation failure. Contained: never aborts sibling tools
/// in a parallel workflow.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown action '{action}' for tool {tool}")]
    UnknownAction { tool: String, action: String },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("tool backend unavailable: {0}")]
    Unavailable(String),

    #[error("tool backend error: {0}")]
    Backend(String),
}

/// Chat completion failure.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by chat API")]
    RateLimited,

    #[error("authentication rejected by chat API")]
    Auth,

    #[error("chat API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("chat request failed: {0}")]
    Network(String),

    #[error("chat API returned an unreadable response: {0}")]
    InvalidResponse(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },
}

impl LlmError {
    /// Whether a retry with backoff is worthwhile. Auth failures and
    /// malformed requests never recover on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Auth | Self::InvalidResponse(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Configuration rejected at startup validation.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
