//! VitalChat agent core: a retrieval-augmented, tool-orchestrating
//! conversational engine for health advice.
//!
//! The web layer talks to [`AgentEngine`]: `ingest_document` feeds the
//! knowledge base, `handle_user_message` (and its streaming variant) runs
//! one full pass of intent classification, tool execution, retrieval,
//! prompt assembly, and chat completion.

pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod intent;
pub mod llm;
pub mod processing;
pub mod prompt;
pub mod retrieval;
pub mod storage;
pub mod tools;
pub mod types;

// Re-export the primary surface for convenience
pub use config::AgentConfig;
pub use engine::{AgentEngine, AgentReply, AgentStreamReply};
pub use intent::{ExecutionMode, IntentClassifier, IntentKind, IntentMatch};
pub use llm::{ChatMessage, ChatProvider, TokenStream};
pub use tools::engine::{ToolPayload, ToolResult, ToolStatus, WorkflowResult};
pub use tools::stats::{PerformanceTracker, ToolPerformanceStats};
pub use types::{ChatTurn, IngestReport, Language, RetrievedPassage, Segment};

pub use anyhow::{Error, Result};
pub use uuid::Uuid;
