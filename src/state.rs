use std::sync::Arc;

use crate::chat::ChatOrchestrator;
use crate::config::Config;
use crate::ingest::Ingestor;
use crate::limit::{RequestQueue, TokenBucket};
use crate::llm::provider::{create_provider, LlmProvider};
use crate::llm::query::QueryProcessor;
use crate::search::engine::SearchEngine;
use crate::store::DocumentStore;
use crate::vector::VectorClient;

/// Shared application state. Components are constructed once, in dependency
/// order, and threaded through handlers; tests build an isolated state per
/// run instead of relying on globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<DocumentStore>,
    pub llm_limiter: Arc<TokenBucket>,
    pub chat_limiter: Arc<TokenBucket>,
    pub llm_queue: Arc<RequestQueue>,
    pub vector: Arc<VectorClient>,
    pub provider: Option<Arc<dyn LlmProvider>>,
    pub query: Arc<QueryProcessor>,
    pub engine: Arc<SearchEngine>,
    pub ingestor: Arc<Ingestor>,
    pub chat: Arc<ChatOrchestrator>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(DocumentStore::open(
            &config.db_path(),
            Some(&config.legacy_snapshot_path()),
        )?);

        let llm_limiter = Arc::new(TokenBucket::new(
            config.llm_rate.capacity,
            config.llm_rate.refill_per_sec,
        ));
        let chat_limiter = Arc::new(TokenBucket::new(
            config.chat_rate.capacity,
            config.chat_rate.refill_per_sec,
        ));
        let llm_queue = Arc::new(RequestQueue::new(
            config.llm_queue.concurrency,
            config.llm_queue.max_backlog,
        ));

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        let vector = Arc::new(VectorClient::new(
            http_client.clone(),
            &config.vector,
            config.search.hybrid_weights,
        ));

        let provider = create_provider(&config.llm, http_client.clone());

        let query = Arc::new(QueryProcessor::new(
            provider.clone(),
            llm_limiter.clone(),
            llm_queue.clone(),
            config.expansion.clone(),
        ));

        let engine = Arc::new(SearchEngine::new(
            vector.clone(),
            store.clone(),
            query.clone(),
            config.search.clone(),
        ));

        let ingestor = Arc::new(Ingestor::new(store.clone(), vector.clone(), &config)?);

        let chat = Arc::new(ChatOrchestrator::new(
            engine.clone(),
            query.clone(),
            provider.clone(),
            chat_limiter.clone(),
            config.chat.clone(),
        ));

        Ok(Self {
            config,
            store,
            llm_limiter,
            chat_limiter,
            llm_queue,
            vector,
            provider,
            query,
            engine,
            ingestor,
            chat,
            http_client,
        })
    }

    /// Graceful teardown, reverse of construction order: pending LLM jobs
    /// are rejected with `queue_cleared`; running ones complete. The store
    /// flushes on drop.
    pub fn shutdown(&self) {
        self.llm_queue.clear();
        tracing::info!("Shutdown: request queue drained");
    }
}
