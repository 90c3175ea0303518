//! The retrieval pipeline: query preprocessing → (multi-query) hybrid
//! search → RRF fusion → score filtering → document resolution → token
//! budget capping.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::llm::query::QueryProcessor;
use crate::models::{
    parse_chunk_id, MediaType, ProviderChunk, ProviderSearchResponse, SearchResponseMetadata,
    SearchResult,
};
use crate::search::fusion::{multi_query_rrf_fusion, FusedHit};
use crate::store::DocumentStore;
use crate::text::tokens::estimate_tokens;
use crate::vector::{SearchMode, VectorClient};

/// Name reported to callers in search responses.
const PROVIDER_NAME: &str = "rag-gateway";

pub struct SearchEngine {
    vector: Arc<VectorClient>,
    store: Arc<DocumentStore>,
    query: Arc<QueryProcessor>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        vector: Arc<VectorClient>,
        store: Arc<DocumentStore>,
        query: Arc<QueryProcessor>,
        config: SearchConfig,
    ) -> Self {
        Self {
            vector,
            store,
            query,
            config,
        }
    }

    /// Run a knowledge search for `user_id`. When the chat orchestrator has
    /// already preprocessed the query it passes the result in; otherwise
    /// preprocessing happens here.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
        token_budget: Option<usize>,
        preprocessed: Option<&crate::llm::query::ProcessedQuery>,
    ) -> Result<ProviderSearchResponse> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("user_id is required".into()));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidRequest("query is required".into()));
        }

        let effective_limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);
        let fetch_limit = 2 * effective_limit;

        // ── Step 1: query variants ───────────────────────────
        let owned;
        let variants: &[String] = match preprocessed {
            Some(p) => &p.expanded_queries,
            None => {
                owned = self.query.process(query).await;
                &owned.expanded_queries
            }
        };

        // ── Step 2: per-variant hybrid search ────────────────
        let searches = variants
            .iter()
            .map(|variant| self.vector.hybrid_search(variant, fetch_limit));
        let outcomes = join_all(searches).await;

        let mut variant_lists: Vec<Vec<SearchResult>> = Vec::new();
        let mut any_hybrid = false;
        let mut last_error: Option<Error> = None;
        for (variant, outcome) in variants.iter().zip(outcomes) {
            match outcome {
                Ok((results, mode)) => {
                    if mode == SearchMode::Hybrid {
                        any_hybrid = true;
                    }
                    variant_lists.push(results);
                }
                Err(e) => {
                    warn!("Search variant '{variant}' failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        if variant_lists.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                Error::BackendUnavailable("no search variant produced results".into())
            }));
        }
        let search_mode = if any_hybrid {
            SearchMode::Hybrid
        } else {
            SearchMode::Vector
        };

        // ── Step 3: fusion + score threshold ─────────────────
        let fused = multi_query_rrf_fusion(&variant_lists, fetch_limit);
        let surviving: Vec<FusedHit> = fused
            .into_iter()
            .filter(|hit| hit.max_score >= self.config.min_score)
            .collect();

        // ── Step 4: document resolution + token budget ───────
        let mut chunks: Vec<ProviderChunk> = Vec::new();
        let mut total_tokens = 0usize;
        for hit in surviving {
            if chunks.len() >= effective_limit {
                break;
            }
            let tokens = estimate_tokens(&hit.result.text);
            if let Some(budget) = token_budget {
                if total_tokens + tokens > budget {
                    break;
                }
            }
            total_tokens += tokens;
            chunks.push(self.resolve_chunk(hit));
        }

        info!(
            "Search for '{query}' ({} variants) returned {} chunks [{}]",
            variants.len(),
            chunks.len(),
            search_mode.as_str()
        );

        Ok(ProviderSearchResponse {
            provider_name: PROVIDER_NAME.to_string(),
            metadata: SearchResponseMetadata {
                search_mode: search_mode.as_str().to_string(),
                results_count: chunks.len(),
                min_score: self.config.min_score,
            },
            total_tokens,
            chunks,
        })
    }

    /// Join a fused hit with its owning document. Every field falls back
    /// through store → result metadata → text heuristics.
    fn resolve_chunk(&self, hit: FusedHit) -> ProviderChunk {
        let FusedHit {
            result, max_score, ..
        } = hit;

        let document_id = parse_chunk_id(&result.id)
            .map(|(doc_id, _)| doc_id.to_string())
            .unwrap_or_default();

        let stored = if document_id.is_empty() {
            None
        } else {
            self.store.get(&document_id).ok().flatten()
        };

        let meta_str = |key: &str| -> Option<String> {
            result
                .metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };

        let document_title = stored
            .as_ref()
            .map(|d| d.title.clone())
            .or_else(|| meta_str("document_title"))
            .or_else(|| extract_title(&result.text))
            .unwrap_or_else(|| "Unknown".to_string());

        let media_type = stored
            .as_ref()
            .map(|d| d.media_type)
            .or_else(|| meta_str("media_type").and_then(|s| MediaType::parse(&s)))
            .unwrap_or(MediaType::Text);

        let media_url = stored
            .as_ref()
            .and_then(|d| d.media_url.clone())
            .or_else(|| meta_str("media_url"));

        let category = stored
            .as_ref()
            .and_then(|d| d.category.clone())
            .or_else(|| meta_str("category"));

        let mut metadata = result.metadata;
        if let Some(category) = category {
            metadata.insert("category".to_string(), Value::String(category));
        }

        ProviderChunk {
            chunk_id: result.id,
            content: result.text,
            score: max_score,
            document_id,
            document_title,
            media_type,
            media_url,
            metadata,
        }
    }
}

/// Title heuristics for chunks whose document is unknown: the first
/// Markdown heading, else the first non-empty line with markup stripped,
/// truncated to 50 characters.
fn extract_title(text: &str) -> Option<String> {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix('#') {
            let rest = rest.trim_start_matches('#');
            // A heading needs whitespace after the marker ("#tag" is not one)
            if rest.starts_with([' ', '\t']) {
                let heading = rest.trim();
                if !heading.is_empty() {
                    return Some(heading.to_string());
                }
            }
        }
    }

    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let stripped: String = first_line
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '#' | '>' | '[' | ']'))
        .collect();
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.chars().take(50).collect())
}
