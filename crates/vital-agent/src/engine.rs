//! The agent engine: the single entry point the web layer consumes.
//!
//! Ingestion: parse → segment → filter references → embed in batches →
//! upsert. Chat: classify intent → execute tools → optionally retrieve →
//! assemble prompt → complete (or stream). The user always gets *some*
//! reply: tool failures and retrieval misses degrade the answer, they never
//! surface as internal errors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::embeddings::{EmbeddingBackend, EmbeddingBatcher, RemoteEmbedder};
use crate::intent::{IntentClassifier, IntentKind};
use crate::llm::{ChatProvider, OpenAiCompatProvider, TokenStream};
use crate::processing::{DocumentPreprocessor, ParsingService, RemoteParsingService, SegmentChunker};
use crate::prompt::PromptAssembler;
use crate::retrieval::Retriever;
use crate::storage::{RemoteVectorStore, VectorIndex};
use crate::tools::engine::{ToolExecutionEngine, WorkflowResult};
use crate::tools::stats::PerformanceTracker;
use crate::tools::ToolRegistry;
use crate::types::{ChatTurn, IngestReport, RetrievedPassage, VectorRecord};

const DEGRADED_REPLY: &str = "抱歉，我暂时无法生成完整回答，请稍后再试。\
If the problem persists, the assistant service may be temporarily unavailable.";

/// Final outcome of one chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    /// True when the LLM was unreachable and a canned reply was substituted.
    pub degraded: bool,
    pub intent: IntentKind,
    pub confidence: f32,
    pub tools_used: Vec<String>,
    pub retrieved_sources: Vec<RetrievedPassage>,
}

/// Streaming variant: metadata up front, tokens as they arrive.
pub struct AgentStreamReply {
    pub stream: TokenStream,
    pub degraded: bool,
    pub intent: IntentKind,
    pub confidence: f32,
    pub tools_used: Vec<String>,
    pub retrieved_sources: Vec<RetrievedPassage>,
}

pub struct AgentEngine {
    config: AgentConfig,
    preprocessor: DocumentPreprocessor,
    chunker: SegmentChunker,
    batcher: Arc<EmbeddingBatcher>,
    store: Arc<dyn VectorIndex>,
    retriever: Retriever,
    classifier: IntentClassifier,
    tool_engine: ToolExecutionEngine,
    tracker: Arc<PerformanceTracker>,
    assembler: PromptAssembler,
    llm: Arc<dyn ChatProvider>,
}

impl AgentEngine {
    /// Build an engine wired to the remote services named in `config`.
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let parsing: Arc<dyn ParsingService> = Arc::new(
            RemoteParsingService::new(&config.parsing).context("parsing service client")?,
        );
        let embedding: Arc<dyn EmbeddingBackend> =
            Arc::new(RemoteEmbedder::new(&config.embedding).context("embedding client")?);
        let store: Arc<dyn VectorIndex> =
            Arc::new(RemoteVectorStore::new(&config.retrieval).context("vector store client")?);
        let llm: Arc<dyn ChatProvider> =
            Arc::new(OpenAiCompatProvider::new(&config.llm).context("chat client")?);
        let registry = Arc::new(ToolRegistry::with_builtin_tools(
            &config.tools.search_endpoint,
            &config.tools.search_api_key,
        ));

        Self::with_backends(
            config,
            parsing,
            embedding,
            store,
            llm,
            registry,
            Arc::new(PerformanceTracker::new()),
        )
    }

    /// Build an engine from explicit backends. This is the seam the web
    /// layer uses to inject its own record store, and tests use to inject
    /// mocks.
    pub fn with_backends(
        config: AgentConfig,
        parsing: Arc<dyn ParsingService>,
        embedding: Arc<dyn EmbeddingBackend>,
        store: Arc<dyn VectorIndex>,
        llm: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        tracker: Arc<PerformanceTracker>,
    ) -> Result<Self> {
        config.validate()?;

        let preprocessor =
            DocumentPreprocessor::new(parsing, config.language.ambiguous_default);
        let chunker =
            SegmentChunker::new(config.chunking.target_chars, config.chunking.min_chars);
        let batcher = Arc::new(EmbeddingBatcher::new(
            embedding,
            config.embedding.max_batch_size,
            config.embedding.dimension,
        )?);
        let retriever = Retriever::new(batcher.clone(), store.clone());
        let classifier = IntentClassifier::with_builtin_intents()?;
        let tool_engine =
            ToolExecutionEngine::new(registry, tracker.clone(), &config.tools);
        let assembler = PromptAssembler::new(config.llm.history_window);

        Ok(Self {
            config,
            preprocessor,
            chunker,
            batcher,
            store,
            retriever,
            classifier,
            tool_engine,
            tracker,
            assembler,
            llm,
        })
    }

    /// Ingest one document into the knowledge base. Reference segments are
    /// filtered (and logged for audit); embedding failures are partial —
    /// the report says exactly what made it in.
    pub async fn ingest_document(&self, file_path: &Path) -> Result<IngestReport> {
        let document = self.preprocessor.parse(file_path).await?;
        let source = document.path.to_string_lossy().to_string();

        let segments = self.chunker.split(&source, &document.text);
        let segments_total = segments.len();

        let (references, content): (Vec<_>, Vec<_>) =
            segments.into_iter().partition(|s| s.is_reference);
        for reference in &references {
            tracing::info!(
                source = %reference.source,
                index = reference.index,
                text = %reference.text,
                "segment filtered as reference content"
            );
        }

        let embedding = self.batcher.embed_segments(content).await;
        let embedded = embedding.embedded.len();
        let embedding_failures = embedding.failed.len();
        for failure in &embedding.failed {
            tracing::warn!(
                source = %failure.segment.source,
                index = failure.segment.index,
                error = %failure.error,
                "segment not embedded"
            );
        }

        let records: Vec<VectorRecord> = embedding
            .embedded
            .iter()
            .filter_map(VectorRecord::from_segment)
            .collect();
        let indexed = self
            .store
            .upsert(records)
            .await
            .context("vector store upsert failed; affected segments are not indexed")?;

        let report = IngestReport {
            source,
            language: Some(document.language),
            segments_total,
            references_filtered: references.len(),
            embedded,
            embedding_failures,
            indexed,
            ingested_at: chrono::Utc::now(),
        };
        tracing::info!(
            source = %report.source,
            segments = report.segments_total,
            references = report.references_filtered,
            indexed = report.indexed,
            failures = report.embedding_failures,
            "document ingested"
        );
        Ok(report)
    }

    /// Top-K retrieval against the knowledge base.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        Ok(self.retriever.retrieve(query, k).await?)
    }

    /// Snapshot of the per-tool performance counters.
    pub fn tool_stats(
        &self,
    ) -> std::collections::HashMap<String, crate::tools::stats::ToolPerformanceStats> {
        self.tracker.snapshot()
    }

    /// Handle one user message end to end, returning the full reply text.
    pub async fn handle_user_message(
        &self,
        user_id: &str,
        message: &str,
        history: &[ChatTurn],
        context: Option<Value>,
    ) -> Result<AgentReply> {
        let (intent, workflow, passages, prompt) =
            self.prepare(user_id, message, history, context).await?;

        let (text, degraded) = match self.llm.complete(&prompt).await {
            Ok(text) => (text, false),
            Err(e) => {
                tracing::error!(error = %e, "chat completion failed, returning degraded reply");
                (DEGRADED_REPLY.to_string(), true)
            }
        };

        Ok(AgentReply {
            text,
            degraded,
            intent: intent.0,
            confidence: intent.1,
            tools_used: workflow.as_ref().map(WorkflowResult::tools_used).unwrap_or_default(),
            retrieved_sources: passages,
        })
    }

    /// Streaming variant of [`AgentEngine::handle_user_message`].
    pub async fn handle_user_message_stream(
        &self,
        user_id: &str,
        message: &str,
        history: &[ChatTurn],
        context: Option<Value>,
    ) -> Result<AgentStreamReply> {
        let (intent, workflow, passages, prompt) =
            self.prepare(user_id, message, history, context).await?;

        let (stream, degraded) = match self.llm.stream(&prompt).await {
            Ok(stream) => (stream, false),
            Err(e) => {
                tracing::error!(error = %e, "chat stream failed, returning degraded reply");
                (TokenStream::fixed(DEGRADED_REPLY), true)
            }
        };

        Ok(AgentStreamReply {
            stream,
            degraded,
            intent: intent.0,
            confidence: intent.1,
            tools_used: workflow.as_ref().map(WorkflowResult::tools_used).unwrap_or_default(),
            retrieved_sources: passages,
        })
    }

    /// Shared front half of both chat paths: classification, tool
    /// execution, retrieval, prompt assembly.
    async fn prepare(
        &self,
        user_id: &str,
        message: &str,
        history: &[ChatTurn],
        context: Option<Value>,
    ) -> Result<(
        (IntentKind, f32),
        Option<WorkflowResult>,
        Vec<RetrievedPassage>,
        Vec<crate::llm::ChatMessage>,
    )> {
        let intent = self.classifier.classify(message);

        let workflow = if intent.tools.is_empty() {
            None
        } else {
            let mut params = serde_json::Map::new();
            params.insert("user_id".to_string(), Value::String(user_id.to_string()));
            params.insert("message".to_string(), Value::String(message.to_string()));
            if let Some(Value::Object(extra)) = context {
                for (key, value) in extra {
                    params.entry(key).or_insert(value);
                }
            }
            let params = Value::Object(params);
            let configs =
                self.tool_engine
                    .configs_from_plan(&intent.tools, &params, &self.config.tools)?;
            Some(self.tool_engine.execute(configs, intent.mode, intent.clone()).await?)
        };

        let passages = if intent.use_retrieval {
            match self.retriever.retrieve(message, self.config.retrieval.default_k).await {
                Ok(passages) => passages,
                Err(e) => {
                    // a retrieval miss degrades grounding, never the reply
                    tracing::warn!(error = %e, "retrieval failed, continuing without passages");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let prompt =
            self.assembler.assemble(message, &intent, workflow.as_ref(), &passages, history);
        Ok(((intent.kind, intent.confidence), workflow, passages, prompt))
    }
}
