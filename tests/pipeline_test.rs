//! End-to-end tests for the ingestion, search, and chat pipelines.
//!
//! The vector backend and the LLM are replaced by in-process axum stubs
//! bound to ephemeral ports; everything else (store, chunker, limiters,
//! queue, client, engine, orchestrator) is the real thing.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use rag_gateway::config::Config;
use rag_gateway::error::Error;
use rag_gateway::events::ChatEvent;
use rag_gateway::models::{ChatRequest, DocumentStatus, IngestTextRequest};
use rag_gateway::state::AppState;

// ─── Vector backend stub ─────────────────────────────────

#[derive(Default)]
struct VectorStub {
    docs: Mutex<Vec<Value>>,
    add_calls: AtomicUsize,
    /// 1-based `/add` call numbers that answer 500.
    failing_add_calls: HashSet<usize>,
    hybrid_enabled: bool,
}

impl VectorStub {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hybrid_enabled: true,
            ..Default::default()
        })
    }

    fn without_hybrid() -> Arc<Self> {
        Arc::new(Self {
            hybrid_enabled: false,
            ..Default::default()
        })
    }

    fn with_failing_add_calls(calls: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            hybrid_enabled: true,
            failing_add_calls: calls.iter().copied().collect(),
            ..Default::default()
        })
    }

    /// Naive relevance: 0.9 when the chunk text contains the query
    /// (case-insensitive), 0.1 otherwise.
    fn run_search(&self, query: &str, limit: usize) -> Vec<Value> {
        let query = query.to_lowercase();
        let mut results: Vec<Value> = self
            .docs
            .lock()
            .iter()
            .map(|doc| {
                let text = doc["text"].as_str().unwrap_or_default();
                let score = if text.to_lowercase().contains(&query) {
                    0.9
                } else {
                    0.1
                };
                let mut metadata = doc.as_object().cloned().unwrap_or_default();
                metadata.remove("id");
                metadata.remove("text");
                json!({
                    "id": doc["id"],
                    "score": score,
                    "text": text,
                    "metadata": Value::Object(metadata),
                })
            })
            .collect();
        results.sort_by(|a, b| {
            b["score"]
                .as_f64()
                .partial_cmp(&a["score"].as_f64())
                .unwrap()
        });
        results.truncate(limit);
        results
    }
}

fn vector_router(stub: Arc<VectorStub>) -> Router {
    async fn search(State(stub): State<Arc<VectorStub>>, Json(body): Json<Value>) -> Json<Value> {
        let query = body["query"].as_str().unwrap_or_default();
        let limit = body["limit"].as_u64().unwrap_or(10) as usize;
        Json(json!({ "results": stub.run_search(query, limit) }))
    }

    async fn hybrid(
        State(stub): State<Arc<VectorStub>>,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        if !stub.hybrid_enabled {
            return Err(StatusCode::NOT_FOUND);
        }
        let query = body["query"].as_str().unwrap_or_default();
        let limit = body["limit"].as_u64().unwrap_or(10) as usize;
        Ok(Json(json!({ "results": stub.run_search(query, limit) })))
    }

    async fn add(
        State(stub): State<Arc<VectorStub>>,
        Json(batch): Json<Vec<Value>>,
    ) -> StatusCode {
        let call_no = stub.add_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if stub.failing_add_calls.contains(&call_no) {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        stub.docs.lock().extend(batch);
        StatusCode::OK
    }

    async fn upsert() -> StatusCode {
        StatusCode::OK
    }

    async fn delete(State(stub): State<Arc<VectorStub>>, Json(body): Json<Value>) -> StatusCode {
        let ids: HashSet<&str> = body["ids"]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        stub.docs
            .lock()
            .retain(|doc| !ids.contains(doc["id"].as_str().unwrap_or_default()));
        StatusCode::OK
    }

    async fn health() -> StatusCode {
        StatusCode::OK
    }

    Router::new()
        .route("/search", post(search))
        .route("/hybrid", post(hybrid))
        .route("/add", post(add))
        .route("/upsert", get(upsert))
        .route("/delete", post(delete))
        .route("/health", get(health))
        .with_state(stub)
}

// ─── LLM stub ────────────────────────────────────────────

const STREAM_DELTAS: [&str; 3] = ["he", "llo ", "world"];

fn llm_router() -> Router {
    async fn completions(Json(body): Json<Value>) -> axum::response::Response {
        if body["stream"].as_bool().unwrap_or(false) {
            let mut sse = String::new();
            for (i, delta) in STREAM_DELTAS.iter().enumerate() {
                let finish = if i == STREAM_DELTAS.len() - 1 {
                    json!("stop")
                } else {
                    Value::Null
                };
                sse.push_str(&format!(
                    "data: {}\n\n",
                    json!({"choices":[{"delta":{"content":delta},"finish_reason":finish}]})
                ));
            }
            sse.push_str(&format!(
                "data: {}\n\n",
                json!({"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}})
            ));
            sse.push_str("data: [DONE]\n\n");
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                sse,
            )
                .into_response()
        } else {
            Json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "hello world"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15},
                "model": "stub-model"
            }))
            .into_response()
        }
    }

    async fn models() -> StatusCode {
        StatusCode::OK
    }

    Router::new()
        .route("/chat/completions", post(completions))
        .route("/models", get(models))
}

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ─── Harness ─────────────────────────────────────────────

struct Harness {
    state: AppState,
    _tmp: tempfile::TempDir,
}

/// Build a full application state over stub backends. `llm_rate_capacity`
/// zero keeps query preprocessing on the original query.
async fn harness(stub: Arc<VectorStub>, with_llm: bool) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let vector_url = spawn_server(vector_router(stub)).await;

    let mut config = Config::default();
    config.data_dir = tmp.path().to_path_buf();
    config.vector.base_url = vector_url;
    config.llm_rate.capacity = 0;
    config.llm_rate.refill_per_sec = 0.0;

    if with_llm {
        config.llm.base_url = spawn_server(llm_router()).await;
        config.llm.api_key = Some("test-key".to_string());
        config.llm.max_retries = 0;
    } else {
        config.llm.enabled = false;
    }

    let state = AppState::new(config).unwrap();
    Harness { state, _tmp: tmp }
}

fn text_request(title: &str, content: &str) -> IngestTextRequest {
    IngestTextRequest {
        title: title.to_string(),
        content: content.to_string(),
        category: None,
        description: None,
        metadata: HashMap::new(),
    }
}

fn chat_request(message: &str) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        ..Default::default()
    }
}

// ─── S1: ingest + search round trip ──────────────────────

#[tokio::test]
async fn test_ingest_and_search_round_trip() {
    let h = harness(VectorStub::new(), false).await;

    let response = h
        .state
        .ingestor
        .ingest_text(text_request("T", "Alpha beta.\n\nGamma delta."))
        .await
        .unwrap();
    assert_eq!(response.status, DocumentStatus::Indexed);
    assert_eq!(response.chunks_count, 1);

    let search = h
        .state
        .engine
        .search("u", "alpha", None, None, None)
        .await
        .unwrap();
    assert_eq!(search.chunks.len(), 1);
    let chunk = &search.chunks[0];
    assert_eq!(chunk.document_title, "T");
    assert!(chunk.score >= 0.30);
    assert!(chunk.content.to_lowercase().contains("alpha"));
    assert_eq!(search.metadata.search_mode, "hybrid");
    assert_eq!(search.metadata.results_count, 1);
}

// ─── S2: dedup ───────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_content_returns_existing_document() {
    let h = harness(VectorStub::new(), false).await;

    let first = h
        .state
        .ingestor
        .ingest_text(text_request("Greeting", "hello world"))
        .await
        .unwrap();
    let second = h
        .state
        .ingestor
        .ingest_text(text_request("Different title", "hello world"))
        .await
        .unwrap();

    assert_eq!(second.document_id, first.document_id);
    assert!(second.message.contains("duplicate"));
    assert_eq!(h.state.store.count().unwrap(), 1);
}

// ─── S3: chunking boundaries ─────────────────────────────

#[tokio::test]
async fn test_chunking_boundaries_through_ingest() {
    let h = harness(VectorStub::new(), false).await;

    let paragraph = "abcdefghij klmnopqrs"; // 20 chars
    let content = vec![paragraph; 40].join("\n\n");
    let response = h
        .state
        .ingestor
        .ingest_text(text_request("Many paragraphs", &content))
        .await
        .unwrap();

    assert_eq!(response.status, DocumentStatus::Indexed);
    assert!(
        (2..=4).contains(&response.chunks_count),
        "expected 2-4 chunks, got {}",
        response.chunks_count
    );

    let doc = h.state.store.get(&response.document_id).unwrap().unwrap();
    assert_eq!(doc.chunks_count, response.chunks_count);
    let chunk_ids = h.state.store.chunk_ids(&response.document_id).unwrap();
    assert_eq!(chunk_ids.len(), response.chunks_count);
    assert_eq!(chunk_ids[0], format!("{}_chunk_0", response.document_id));
}

// ─── S4: rate-limited chat admission ─────────────────────

#[tokio::test]
async fn test_chat_rate_limit_admits_capacity_then_rejects() {
    let stub = VectorStub::new();
    let tmp = tempfile::tempdir().unwrap();
    let vector_url = spawn_server(vector_router(stub)).await;
    let llm_url = spawn_server(llm_router()).await;

    let mut config = Config::default();
    config.data_dir = tmp.path().to_path_buf();
    config.vector.base_url = vector_url;
    config.llm.base_url = llm_url;
    config.llm.api_key = Some("test-key".to_string());
    config.llm_rate.capacity = 0;
    config.llm_rate.refill_per_sec = 0.0;
    config.chat_rate.capacity = 2;
    config.chat_rate.refill_per_sec = 0.0;

    let state = AppState::new(config).unwrap();

    let mut streams = Vec::new();
    let mut rejected = 0;
    for _ in 0..3 {
        match state.chat.chat_stream(chat_request("hi")) {
            Ok(stream) => streams.push(stream),
            Err(Error::RateLimited(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(streams.len(), 2);
    assert_eq!(rejected, 1);

    // Each admitted stream starts with RUN_STARTED
    for stream in streams {
        let events: Vec<ChatEvent> = stream.collect().await;
        assert!(matches!(events.first(), Some(ChatEvent::RunStarted { .. })));
    }
}

// ─── S5 / I9: streaming order ────────────────────────────

#[tokio::test]
async fn test_chat_stream_event_order_and_deltas() {
    let h = harness(VectorStub::new(), true).await;

    let stream = h.state.chat.chat_stream(chat_request("hi")).unwrap();
    let events: Vec<ChatEvent> = stream.collect().await;

    // RUN_STARTED first, RUN_FINISHED last
    assert!(matches!(events.first(), Some(ChatEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(ChatEvent::RunFinished { .. })));

    // Deltas arrive in order and concatenate to the full answer
    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::TextMessageChunk { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["he", "llo ", "world"]);
    assert_eq!(deltas.concat(), "hello world");

    // Legal sequence: START before any chunk, END after all chunks,
    // token_usage after END
    let names: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    let start = names
        .iter()
        .position(|n| *n == "TEXT_MESSAGE_START")
        .unwrap();
    let end = names.iter().position(|n| *n == "TEXT_MESSAGE_END").unwrap();
    for (i, name) in names.iter().enumerate() {
        if *name == "TEXT_MESSAGE_CHUNK" {
            assert!(i > start && i < end);
        }
    }
    let usage_pos = events.iter().position(
        |e| matches!(e, ChatEvent::Custom { name, .. } if name == "token_usage"),
    );
    if let Some(pos) = usage_pos {
        assert!(pos > end);
    }

    // Exactly one terminal event
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);
}

#[tokio::test]
async fn test_chat_sync_variant() {
    let h = harness(VectorStub::new(), true).await;

    let response = h.state.chat.chat(chat_request("hi")).await.unwrap();
    assert_eq!(response.response, "hello world");
    assert_eq!(response.usage.unwrap().total_tokens, 15);
    assert!(!response.thread_id.is_empty());
    assert!(!response.run_id.is_empty());
}

#[tokio::test]
async fn test_chat_emits_knowledge_sources_before_message() {
    let h = harness(VectorStub::new(), true).await;

    h.state
        .ingestor
        .ingest_text(text_request("Widget Manual", "Widgets need regular greasing."))
        .await
        .unwrap();

    let stream = h
        .state
        .chat
        .chat_stream(chat_request("widgets"))
        .unwrap();
    let events: Vec<ChatEvent> = stream.collect().await;

    let names: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    let sources_pos = events
        .iter()
        .position(|e| matches!(e, ChatEvent::Custom { name, .. } if name == "knowledge_sources"))
        .expect("knowledge_sources event missing");
    let start_pos = names
        .iter()
        .position(|n| *n == "TEXT_MESSAGE_START")
        .unwrap();
    assert!(sources_pos < start_pos);
    assert!(matches!(events[0], ChatEvent::RunStarted { .. }));
}

// ─── S6: hybrid fallback ─────────────────────────────────

#[tokio::test]
async fn test_hybrid_fallback_to_vector_search() {
    let h = harness(VectorStub::without_hybrid(), false).await;

    h.state
        .ingestor
        .ingest_text(text_request("T", "Alpha beta gamma."))
        .await
        .unwrap();

    let search = h
        .state
        .engine
        .search("u", "alpha", None, None, None)
        .await
        .unwrap();
    assert_eq!(search.metadata.search_mode, "vector");
    assert_eq!(search.chunks.len(), 1);
}

// ─── S7: partial index failure ───────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_index_failure_marks_failed_and_allows_retry() {
    // Batch 2 fails on all three attempts (calls 2, 3, 4); batches 1 and 3
    // succeed. The retry of the whole document starts at call 6.
    let stub = VectorStub::with_failing_add_calls(&[2, 3, 4]);
    let h = harness(stub, false).await;

    // ~120 paragraphs of ~490 chars → one chunk each → 3 add batches
    let paragraph = "Lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(9);
    let content = vec![paragraph.trim(); 120].join("\n\n");

    let first = h
        .state
        .ingestor
        .ingest_text(text_request("Big doc", &content))
        .await
        .unwrap();
    assert_eq!(first.status, DocumentStatus::Failed);
    assert_eq!(first.chunks_count, 0);
    assert!(first.message.contains("failed"));

    let stored = h.state.store.get(&first.document_id).unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert!(stored.content_hash.is_none());

    // Same content again: NOT deduped, fresh attempt succeeds
    let second = h
        .state
        .ingestor
        .ingest_text(text_request("Big doc", &content))
        .await
        .unwrap();
    assert_ne!(second.document_id, first.document_id);
    assert_eq!(second.status, DocumentStatus::Indexed);
    assert!(second.chunks_count >= 100);

    let stored = h.state.store.get(&second.document_id).unwrap().unwrap();
    assert!(stored.content_hash.is_some());
}

// ─── I7: token budget ────────────────────────────────────

#[tokio::test]
async fn test_token_budget_caps_results() {
    let h = harness(VectorStub::new(), false).await;

    for i in 0..4 {
        let filler = format!("word{i} ").repeat(80);
        h.state
            .ingestor
            .ingest_text(text_request(
                &format!("Doc {i}"),
                &format!("gadget {filler}"),
            ))
            .await
            .unwrap();
    }

    let unbudgeted = h
        .state
        .engine
        .search("u", "gadget", Some(10), None, None)
        .await
        .unwrap();
    assert_eq!(unbudgeted.chunks.len(), 4);

    let budget = 150;
    let budgeted = h
        .state
        .engine
        .search("u", "gadget", Some(10), Some(budget), None)
        .await
        .unwrap();
    assert!(budgeted.total_tokens <= budget);
    assert!(budgeted.chunks.len() < 4);
    assert!(!budgeted.chunks.is_empty());
}

// ─── I8: score threshold ─────────────────────────────────

#[tokio::test]
async fn test_low_scoring_results_filtered() {
    let h = harness(VectorStub::new(), false).await;

    h.state
        .ingestor
        .ingest_text(text_request("Relevant", "The needle is in here."))
        .await
        .unwrap();
    h.state
        .ingestor
        .ingest_text(text_request("Irrelevant", "Nothing to see at all."))
        .await
        .unwrap();

    let search = h
        .state
        .engine
        .search("u", "needle", Some(10), None, None)
        .await
        .unwrap();
    assert_eq!(search.chunks.len(), 1);
    assert!(search.chunks.iter().all(|c| c.score >= 0.30));
    assert_eq!(search.chunks[0].document_title, "Relevant");
}

// ─── Delete flow ─────────────────────────────────────────

#[tokio::test]
async fn test_delete_document_removes_chunks_and_row() {
    let stub = VectorStub::new();
    let h = harness(stub.clone(), false).await;

    let response = h
        .state
        .ingestor
        .ingest_text(text_request("T", "Alpha beta gamma delta."))
        .await
        .unwrap();
    assert_eq!(stub.docs.lock().len(), response.chunks_count);

    h.state
        .ingestor
        .delete_document(&response.document_id)
        .await
        .unwrap();
    assert!(h.state.store.get(&response.document_id).unwrap().is_none());
    assert!(stub.docs.lock().is_empty());
}

#[tokio::test]
async fn test_delete_missing_document_is_not_found() {
    let h = harness(VectorStub::new(), false).await;
    let outcome = h.state.ingestor.delete_document("doc_missing_0").await;
    assert!(matches!(outcome, Err(Error::NotFound(_))));
}

// ─── Validation ──────────────────────────────────────────

#[tokio::test]
async fn test_search_requires_user_and_query() {
    let h = harness(VectorStub::new(), false).await;

    let outcome = h.state.engine.search("", "query", None, None, None).await;
    assert!(matches!(outcome, Err(Error::InvalidRequest(_))));

    let outcome = h.state.engine.search("u", "  ", None, None, None).await;
    assert!(matches!(outcome, Err(Error::InvalidRequest(_))));
}

#[tokio::test]
async fn test_chat_requires_message() {
    let h = harness(VectorStub::new(), true).await;
    let outcome = h.state.chat.chat_stream(chat_request("  "));
    assert!(matches!(outcome, Err(Error::InvalidRequest(_))));
}
