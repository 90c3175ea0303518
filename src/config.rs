use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the document database and media blobs are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Target overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    /// Maximum ingested file size in MB
    pub max_file_size_mb: u64,
    /// Search pipeline configuration
    pub search: SearchConfig,
    /// Vector backend configuration
    pub vector: VectorConfig,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Token bucket for LLM calls (query expansion / rewriting)
    pub llm_rate: RateLimitConfig,
    /// Token bucket for chat admissions
    pub chat_rate: RateLimitConfig,
    /// In-flight cap and backlog for LLM jobs
    pub llm_queue: QueueConfig,
    /// Query expansion behavior
    pub expansion: ExpansionConfig,
    /// Chat orchestrator defaults
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result count when the request doesn't specify one
    pub default_limit: usize,
    /// Hard clamp on the requested result count
    pub max_limit: usize,
    /// Results scoring below this are dropped
    pub min_score: f32,
    /// [vector, bm25] weights passed to the hybrid endpoint
    pub hybrid_weights: [f32; 2],
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 20,
            min_score: 0.30,
            hybrid_weights: [0.4, 0.6],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Base URL of the vector search engine
    pub base_url: String,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Timeout for index batches in seconds
    pub index_timeout_secs: u64,
    /// Timeout for the health probe in seconds
    pub health_timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7700".to_string(),
            timeout_secs: 30,
            index_timeout_secs: 60,
            health_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai", "deepseek", "litellm" or "generic"
    pub provider: String,
    /// Base URL for the chat-completions API; empty uses the provider default
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Retry count on network error or timeout
    pub max_retries: u32,
    /// Base retry delay in milliseconds (doubles per attempt)
    pub retry_delay_ms: u64,
    /// Set to false to run without an LLM (search still works, chat does not)
    pub enabled: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: String::new(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_retries: 2,
            retry_delay_ms: 1_000,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_backlog: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    pub enabled: bool,
    /// Cap on LLM-generated query variants
    pub max_queries: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub default_search_limit: usize,
    pub include_sources_default: bool,
    /// Must contain the `{context}` placeholder
    pub system_prompt_template: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_temperature: 0.7,
            default_max_tokens: 2048,
            default_search_limit: 5,
            include_sources_default: true,
            system_prompt_template: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant. Answer the user's question \
using the retrieved context below. If the context does not contain the answer, say so instead of \
guessing. Cite the source titles you relied on.\n\nContext:\n{context}";

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8600".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            max_file_size_mb: 20,
            search: SearchConfig::default(),
            vector: VectorConfig::default(),
            llm: LlmConfig::default(),
            llm_rate: RateLimitConfig {
                capacity: 10,
                refill_per_sec: 2.0,
            },
            chat_rate: RateLimitConfig {
                capacity: 20,
                refill_per_sec: 5.0,
            },
            llm_queue: QueueConfig {
                concurrency: 5,
                max_backlog: 50,
            },
            expansion: ExpansionConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RAG_GATEWAY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("RAG_GATEWAY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                config.chunk_size = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHUNK_OVERLAP") {
            if let Ok(v) = val.parse() {
                config.chunk_overlap = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_MAX_FILE_SIZE_MB") {
            if let Ok(v) = val.parse() {
                config.max_file_size_mb = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_DEFAULT_SEARCH_LIMIT") {
            if let Ok(v) = val.parse() {
                config.search.default_limit = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_MAX_SEARCH_LIMIT") {
            if let Ok(v) = val.parse() {
                config.search.max_limit = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_MIN_SEARCH_SCORE") {
            if let Ok(v) = val.parse() {
                config.search.min_score = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_HYBRID_WEIGHTS") {
            let parts: Vec<f32> = val
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
            if parts.len() == 2 {
                config.search.hybrid_weights = [parts[0], parts[1]];
            }
        }
        if let Ok(url) = std::env::var("VECTOR_BACKEND_URL") {
            config.vector.base_url = url;
        }
        if let Ok(val) = std::env::var("VECTOR_BACKEND_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.vector.timeout_secs = v;
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.llm.timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                config.llm.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.llm.retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("LLM_ENABLED") {
            config.llm.enabled = val != "0" && !val.eq_ignore_ascii_case("false");
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_LLM_RATE_CAPACITY") {
            if let Ok(v) = val.parse() {
                config.llm_rate.capacity = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_LLM_RATE_REFILL") {
            if let Ok(v) = val.parse() {
                config.llm_rate.refill_per_sec = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHAT_RATE_CAPACITY") {
            if let Ok(v) = val.parse() {
                config.chat_rate.capacity = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHAT_RATE_REFILL") {
            if let Ok(v) = val.parse() {
                config.chat_rate.refill_per_sec = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_LLM_QUEUE_CONCURRENCY") {
            if let Ok(v) = val.parse() {
                config.llm_queue.concurrency = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_LLM_QUEUE_MAX_SIZE") {
            if let Ok(v) = val.parse() {
                config.llm_queue.max_backlog = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_QUERY_EXPANSION") {
            config.expansion.enabled = val != "0" && !val.eq_ignore_ascii_case("false");
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_MAX_EXPANDED_QUERIES") {
            if let Ok(v) = val.parse() {
                config.expansion.max_queries = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHAT_TEMPERATURE") {
            if let Ok(v) = val.parse() {
                config.chat.default_temperature = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHAT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                config.chat.default_max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_CHAT_SEARCH_LIMIT") {
            if let Ok(v) = val.parse() {
                config.chat.default_search_limit = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_GATEWAY_SYSTEM_PROMPT") {
            if val.contains("{context}") {
                config.chat.system_prompt_template = val;
            }
        }

        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("documents.db")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    pub fn legacy_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("documents.json")
    }

    /// Copy safe to expose over the config API: secrets blanked out.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some("***".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_knobs() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.max_limit, 20);
        assert!((config.search.min_score - 0.30).abs() < f32::EPSILON);
        assert_eq!(config.llm_rate.capacity, 10);
        assert_eq!(config.chat_rate.capacity, 20);
        assert_eq!(config.llm_queue.concurrency, 5);
        assert_eq!(config.llm_queue.max_backlog, 50);
        assert_eq!(config.expansion.max_queries, 3);
        assert!(config.chat.system_prompt_template.contains("{context}"));
    }

    #[test]
    fn test_redacted_blanks_api_key() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        let redacted = config.redacted();
        assert_eq!(redacted.llm.api_key.as_deref(), Some("***"));
    }
}
