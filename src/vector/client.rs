//! Retrying HTTP client for the vector search engine.
//!
//! The backend owns embeddings and BM25; this client only speaks its JSON
//! protocol: `/search`, `/hybrid`, `/add` (+ `/addobject` for multimodal),
//! `/upsert`, `/delete`, `/health`. The `/add` → `/upsert` pair is
//! serialized through a single lane so concurrent ingests cannot interleave
//! their batches.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::VectorConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, SearchResult};

/// Upper bound on documents per `/add` batch.
const INDEX_BATCH_SIZE: usize = 50;
/// Attempts per batch; delays between them are 1s, 2s, 3s.
const INDEX_BATCH_ATTEMPTS: u32 = 3;

/// Which retrieval path actually served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Vector,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Vector => "vector",
        }
    }
}

pub struct VectorClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    index_timeout: Duration,
    health_timeout: Duration,
    hybrid_weights: [f32; 2],
    /// Serializes the `/add` → `/upsert` pair across concurrent ingests.
    index_lane: tokio::sync::Mutex<()>,
}

/// Document shape for `/add` and `/addobject`: id + text with the chunk
/// metadata flattened alongside.
#[derive(Debug, Serialize)]
pub struct IndexDoc {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

impl IndexDoc {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let metadata = match serde_json::to_value(&chunk.metadata) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self {
            id: chunk.chunk_id.clone(),
            text: chunk.text.clone(),
            metadata,
        }
    }
}

#[derive(Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Serialize)]
struct HybridBody<'a> {
    query: &'a str,
    limit: usize,
    weights: [f32; 2],
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    ids: &'a [String],
}

#[derive(Deserialize)]
struct SearchResponseBody {
    #[serde(default)]
    results: Vec<SearchResult>,
}

impl VectorClient {
    pub fn new(http: reqwest::Client, config: &VectorConfig, hybrid_weights: [f32; 2]) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            index_timeout: Duration::from_secs(config.index_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
            hybrid_weights,
            index_lane: tokio::sync::Mutex::new(()),
        }
    }

    /// Purely semantic search.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let resp = self
            .http
            .post(format!("{}/search", self.base_url))
            .timeout(self.timeout)
            .json(&SearchBody { query, limit })
            .send()
            .await
            .map_err(classify_transport)?;
        let resp = ensure_ok(resp, "search").await?;
        parse_results(resp).await
    }

    /// Semantic + keyword fusion. Degrades to [`Self::search`] when the
    /// backend does not implement `/hybrid` (404 or unreachable); the
    /// returned mode reflects what was actually used.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, SearchMode)> {
        let outcome = async {
            let resp = self
                .http
                .post(format!("{}/hybrid", self.base_url))
                .timeout(self.timeout)
                .json(&HybridBody {
                    query,
                    limit,
                    weights: self.hybrid_weights,
                })
                .send()
                .await
                .map_err(classify_transport)?;
            let resp = ensure_ok(resp, "hybrid").await?;
            parse_results(resp).await
        }
        .await;

        match outcome {
            Ok(results) => Ok((results, SearchMode::Hybrid)),
            Err(Error::BackendRejected { status: 404, .. }) | Err(Error::BackendUnavailable(_)) => {
                tracing::info!("Hybrid search unavailable, falling back to vector search");
                let results = self.search(query, limit).await?;
                Ok((results, SearchMode::Vector))
            }
            Err(e) => Err(e),
        }
    }

    /// Index text chunks: batches of ≤50 through `/add` then `/upsert`.
    pub async fn index(&self, docs: &[IndexDoc]) -> Result<()> {
        self.index_via(docs, "/add").await
    }

    /// Index multimodal chunks through `/addobject`; a backend without the
    /// endpoint (404) falls back to the text path.
    pub async fn index_multimodal(&self, docs: &[IndexDoc]) -> Result<()> {
        self.index_via(docs, "/addobject").await
    }

    async fn index_via(&self, docs: &[IndexDoc], endpoint: &str) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        // Hold the lane for the whole document so add/upsert pairs from
        // concurrent ingests never interleave.
        let _lane = self.index_lane.lock().await;

        let mut batch_errors: Vec<String> = Vec::new();
        for (batch_no, batch) in docs.chunks(INDEX_BATCH_SIZE).enumerate() {
            let mut last_error: Option<Error> = None;
            for attempt in 1..=INDEX_BATCH_ATTEMPTS {
                match self.submit_batch(batch, endpoint).await {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Index batch {batch_no} attempt {attempt}/{INDEX_BATCH_ATTEMPTS} failed: {e}"
                        );
                        last_error = Some(e);
                        if attempt < INDEX_BATCH_ATTEMPTS {
                            tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                        }
                    }
                }
            }
            if let Some(e) = last_error {
                batch_errors.push(format!("batch {batch_no}: {e}"));
            }
        }

        if batch_errors.is_empty() {
            Ok(())
        } else {
            Err(Error::IndexFailure(batch_errors.join("; ")))
        }
    }

    async fn submit_batch(&self, batch: &[IndexDoc], endpoint: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .timeout(self.index_timeout)
            .json(batch)
            .send()
            .await
            .map_err(classify_transport)?;

        // A backend without the multimodal endpoint serves the text one.
        if endpoint == "/addobject" && resp.status().as_u16() == 404 {
            tracing::info!("Backend has no /addobject, using /add");
            let resp = self
                .http
                .post(format!("{}/add", self.base_url))
                .timeout(self.index_timeout)
                .json(batch)
                .send()
                .await
                .map_err(classify_transport)?;
            ensure_ok(resp, "add").await?;
        } else {
            ensure_ok(resp, endpoint.trim_start_matches('/')).await?;
        }

        self.commit_upsert().await
    }

    /// `GET /upsert` commits the added batch. The backend answers 500 when
    /// its buffer is already empty; that is a successful commit.
    async fn commit_upsert(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/upsert", self.base_url))
            .timeout(self.index_timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() || status.as_u16() == 500 {
            if status.as_u16() == 500 {
                tracing::debug!("Upsert returned 500 (empty buffer), treating as committed");
            }
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(Error::BackendRejected {
                status: status.as_u16(),
                message: body,
            })
        } else {
            Err(Error::BackendUnavailable(format!(
                "upsert returned {status}: {body}"
            )))
        }
    }

    /// Remove chunk ids from the index.
    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let resp = self
            .http
            .post(format!("{}/delete", self.base_url))
            .timeout(self.timeout)
            .json(&DeleteBody { ids })
            .send()
            .await
            .map_err(classify_transport)?;
        ensure_ok(resp, "delete").await?;
        Ok(())
    }

    /// Non-throwing availability probe.
    pub async fn health(&self) -> bool {
        match self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

fn classify_transport(e: reqwest::Error) -> Error {
    Error::BackendUnavailable(e.to_string())
}

async fn ensure_ok(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(Error::BackendRejected {
            status: status.as_u16(),
            message: format!("{what}: {body}"),
        })
    } else {
        Err(Error::BackendUnavailable(format!(
            "{what} returned {status}: {body}"
        )))
    }
}

async fn parse_results(resp: reqwest::Response) -> Result<Vec<SearchResult>> {
    let body = resp.text().await.map_err(classify_transport)?;
    let parsed: SearchResponseBody = serde_json::from_str(&body)
        .map_err(|e| Error::ProtocolError(format!("malformed search response: {e}")))?;
    Ok(parsed.results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{chunk_id, ChunkMetadata};

    #[test]
    fn test_index_doc_flattens_chunk_metadata() {
        let chunk = Chunk {
            chunk_id: chunk_id("doc_x", 0),
            text: "body".into(),
            metadata: ChunkMetadata {
                document_id: "doc_x".into(),
                document_title: "Title".into(),
                chunk_index: 0,
                tokens: Some(3),
                ..Default::default()
            },
        };
        let doc = IndexDoc::from_chunk(&chunk);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["id"], "doc_x_chunk_0");
        assert_eq!(json["text"], "body");
        assert_eq!(json["document_id"], "doc_x");
        assert_eq!(json["document_title"], "Title");
        assert_eq!(json["tokens"], 3);
    }

    #[test]
    fn test_search_response_parses_results() {
        let body = r#"{"results":[{"id":"d_chunk_0","score":0.87,"text":"hello","metadata":{"document_id":"d"}}]}"#;
        let parsed: SearchResponseBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].id, "d_chunk_0");
        assert!((parsed.results[0].score - 0.87).abs() < 1e-6);
    }

    #[test]
    fn test_search_response_tolerates_missing_results() {
        let parsed: SearchResponseBody = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn test_search_mode_names() {
        assert_eq!(SearchMode::Hybrid.as_str(), "hybrid");
        assert_eq!(SearchMode::Vector.as_str(), "vector");
    }
}
