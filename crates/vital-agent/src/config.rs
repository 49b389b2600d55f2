use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::Language;

/// Hard ceiling imposed by the embedding API: at most 10 inputs per call.
pub const EMBEDDING_API_MAX_BATCH: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub parsing: ParsingConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub tools: ToolConfig,
    pub llm: LlmConfig,
    pub language: LanguageConfig,
}

/// Remote document-parsing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Must match the vector store collection schema. A mismatch between
    /// this and what the API returns fails fast, never truncates.
    pub dimension: usize,
    /// Per-call input cap. The API rejects more than
    /// [`EMBEDDING_API_MAX_BATCH`] strings per request.
    pub max_batch_size: usize,
    /// Bound on concurrent outstanding embedding calls.
    pub max_inflight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target segment length in characters.
    pub target_chars: usize,
    /// Segments shorter than this are merged into a neighbor or dropped.
    pub min_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub store_endpoint: String,
    pub store_api_key: String,
    pub collection: String,
    pub default_k: usize,
}

/// Per-category tool timeouts plus workflow-level bounds. The concrete
/// numbers are tunable operational choices, not protocol contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub computation_timeout_secs: u64,
    pub database_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub chart_timeout_secs: u64,
    /// Outer ceiling for one workflow pass; past it the engine returns
    /// whatever partial results have accumulated.
    pub workflow_ceiling_secs: u64,
    /// Bound on concurrently running tool calls.
    pub max_concurrent_calls: usize,
    /// Web-search backend; empty means the search tool degrades to its
    /// placeholder result.
    pub search_endpoint: String,
    pub search_api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Attempt count for transient failures (first try included).
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
    /// How many trailing conversation turns the prompt assembler keeps.
    pub history_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Language assigned when neither CJK nor Latin content dominates.
    /// Historically "chinese"; configurable rather than load-bearing.
    pub ambiguous_default: Language,
}

impl AgentConfig {
    /// Validate config values, rejecting clearly broken configurations
    /// before any component is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError("embedding.dimension must be > 0".into()));
        }
        if self.embedding.max_batch_size == 0
            || self.embedding.max_batch_size > EMBEDDING_API_MAX_BATCH
        {
            return Err(ConfigError(format!(
                "embedding.max_batch_size must be in 1..={}",
                EMBEDDING_API_MAX_BATCH
            )));
        }
        if self.embedding.max_inflight == 0 {
            return Err(ConfigError("embedding.max_inflight must be > 0".into()));
        }
        if self.chunking.target_chars < 50 {
            return Err(ConfigError("chunking.target_chars must be >= 50".into()));
        }
        if self.chunking.min_chars >= self.chunking.target_chars {
            return Err(ConfigError("chunking.min_chars must be < target_chars".into()));
        }
        if self.retrieval.default_k == 0 {
            return Err(ConfigError("retrieval.default_k must be > 0".into()));
        }
        for (name, secs) in [
            ("tools.computation_timeout_secs", self.tools.computation_timeout_secs),
            ("tools.database_timeout_secs", self.tools.database_timeout_secs),
            ("tools.search_timeout_secs", self.tools.search_timeout_secs),
            ("tools.chart_timeout_secs", self.tools.chart_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError(format!("{} must be > 0", name)));
            }
        }
        let max_tool = self
            .tools
            .computation_timeout_secs
            .max(self.tools.database_timeout_secs)
            .max(self.tools.search_timeout_secs)
            .max(self.tools.chart_timeout_secs);
        if self.tools.workflow_ceiling_secs <= max_tool {
            return Err(ConfigError(
                "tools.workflow_ceiling_secs must exceed every per-tool timeout".into(),
            ));
        }
        if self.tools.max_concurrent_calls == 0 {
            return Err(ConfigError("tools.max_concurrent_calls must be > 0".into()));
        }
        if self.llm.max_attempts == 0 {
            return Err(ConfigError("llm.max_attempts must be > 0".into()));
        }
        if self.llm.history_window == 0 {
            return Err(ConfigError("llm.history_window must be > 0".into()));
        }
        Ok(())
    }

    /// Load config from a JSON file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConfigError(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            parsing: ParsingConfig {
                endpoint: "https://docparse.internal/v1/parse".to_string(),
                api_key: String::new(),
                request_timeout_secs: 60,
            },
            embedding: EmbeddingConfig {
                endpoint: "https://embeddings.internal/v1/embed".to_string(),
                api_key: String::new(),
                model: "text-embedding-v3".to_string(),
                dimension: 1024,
                max_batch_size: EMBEDDING_API_MAX_BATCH,
                max_inflight: 4,
            },
            chunking: ChunkingConfig { target_chars: 400, min_chars: 20 },
            retrieval: RetrievalConfig {
                store_endpoint: "https://vectors.internal".to_string(),
                store_api_key: String::new(),
                collection: "health_knowledge".to_string(),
                default_k: 5,
            },
            tools: ToolConfig {
                computation_timeout_secs: 5,
                database_timeout_secs: 10,
                search_timeout_secs: 15,
                chart_timeout_secs: 20,
                workflow_ceiling_secs: 120,
                max_concurrent_calls: 8,
                search_endpoint: String::new(),
                search_api_key: String::new(),
            },
            llm: LlmConfig {
                endpoint: "https://llm.internal/v1/chat/completions".to_string(),
                api_key: String::new(),
                model: "qwen-plus".to_string(),
                max_tokens: 2048,
                temperature: 0.7,
                max_attempts: 3,
                backoff_base_ms: 500,
                history_window: 6,
            },
            language: LanguageConfig { ambiguous_default: Language::Chinese },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_oversized_batch() {
        let mut config = AgentConfig::default();
        config.embedding.max_batch_size = 11;
        assert!(config.validate().is_err());
        config.embedding.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_dimension_and_k() {
        let mut config = AgentConfig::default();
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.retrieval.default_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ceiling_must_exceed_tool_timeouts() {
        let mut config = AgentConfig::default();
        config.tools.workflow_ceiling_secs = 15;
        assert!(config.validate().is_err());
    }
}
