//! LLM query preprocessing: expansion into multiple variants, or a single
//! tighter rewrite. Every failure here degrades silently to the original
//! query; a search is never blocked on preprocessing.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::ExpansionConfig;
use crate::limit::{RequestQueue, TokenBucket};
use crate::llm::provider::{InferenceRequest, LlmProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMethod {
    Llm,
    Original,
}

#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub processed_query: String,
    pub method: QueryMethod,
    /// All query variants to search, primary first. Always non-empty.
    pub expanded_queries: Vec<String>,
    pub query_intent: Option<String>,
}

impl ProcessedQuery {
    fn original(query: &str) -> Self {
        Self {
            processed_query: query.to_string(),
            method: QueryMethod::Original,
            expanded_queries: vec![query.to_string()],
            query_intent: None,
        }
    }
}

pub struct QueryProcessor {
    provider: Option<Arc<dyn LlmProvider>>,
    limiter: Arc<TokenBucket>,
    queue: Arc<RequestQueue>,
    expansion: ExpansionConfig,
}

impl QueryProcessor {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        limiter: Arc<TokenBucket>,
        queue: Arc<RequestQueue>,
        expansion: ExpansionConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            queue,
            expansion,
        }
    }

    /// Preprocess a raw user query. Never fails and never blocks on the
    /// LLM: rejections and errors fall through to the original query.
    pub async fn process(&self, query: &str) -> ProcessedQuery {
        let query = query.trim();
        if query.chars().count() < 5 {
            return ProcessedQuery::original(query);
        }

        let Some(provider) = self.provider.clone() else {
            return ProcessedQuery::original(query);
        };

        if self.expansion.enabled {
            if let Some(processed) = self.expand(&provider, query).await {
                return processed;
            }
        }

        if let Some(rewritten) = self.rewrite(&provider, query).await {
            return ProcessedQuery {
                expanded_queries: vec![rewritten.clone()],
                processed_query: rewritten,
                method: QueryMethod::Llm,
                query_intent: None,
            };
        }

        ProcessedQuery::original(query)
    }

    async fn expand(&self, provider: &Arc<dyn LlmProvider>, query: &str) -> Option<ProcessedQuery> {
        let response = self
            .call_llm(provider, expansion_prompt(query), 0.3, 300)
            .await?;

        let (intent, primary, expanded) = parse_expansion(&response)?;
        let primary = primary.unwrap_or_else(|| query.to_string());
        if primary.is_empty() && expanded.is_empty() {
            return None;
        }

        let variants = assemble_variants(&primary, &expanded, query, self.expansion.max_queries);

        Some(ProcessedQuery {
            processed_query: primary,
            method: QueryMethod::Llm,
            expanded_queries: variants,
            query_intent: intent,
        })
    }

    async fn rewrite(&self, provider: &Arc<dyn LlmProvider>, query: &str) -> Option<String> {
        let response = self
            .call_llm(provider, rewrite_prompt(query), 0.1, 100)
            .await?;
        let rewritten = response.trim().trim_matches('"').to_string();
        if rewritten.chars().count() >= 2 && rewritten != query {
            Some(rewritten)
        } else {
            None
        }
    }

    /// One LLM call gated by the rate limiter and the request queue.
    /// Any rejection or error collapses to `None`.
    async fn call_llm(
        &self,
        provider: &Arc<dyn LlmProvider>,
        prompt: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Option<String> {
        if !self.limiter.try_acquire() {
            debug!("Query preprocessing skipped: rate limited");
            return None;
        }

        let provider = provider.clone();
        let req = InferenceRequest {
            system_prompt: String::new(),
            user_prompt: prompt,
            temperature,
            max_tokens: Some(max_tokens),
        };

        let outcome = self
            .queue
            .submit(async move { provider.infer(&req).await })
            .await;

        match outcome {
            Ok(Ok(response)) => Some(response.text),
            Ok(Err(e)) => {
                debug!("Query preprocessing LLM call failed: {e}");
                None
            }
            Err(e) => {
                debug!("Query preprocessing queue rejected: {e}");
                None
            }
        }
    }
}

fn expansion_prompt(query: &str) -> String {
    format!(
        "You are a search query analyst. Given a user query, identify its intent, \
         produce one tightened primary query, and up to three alternative phrasings \
         that capture different aspects of the same need.\n\n\
         User query: \"{query}\"\n\n\
         Respond with ONLY a JSON object, no explanation:\n\
         {{\"intent\": \"...\", \"primary_query\": \"...\", \"expanded_queries\": [\"...\", \"...\"]}}"
    )
}

fn rewrite_prompt(query: &str) -> String {
    format!(
        "Rewrite this search query to be tighter and more specific while preserving \
         its meaning. Respond with ONLY the rewritten query, no explanation.\n\n\
         Query: \"{query}\""
    )
}

/// Primary first, then deduplicated expansions capped at `max_queries`,
/// then the original query if it isn't already present.
fn assemble_variants(
    primary: &str,
    expanded: &[String],
    original: &str,
    max_queries: usize,
) -> Vec<String> {
    let mut variants: Vec<String> = vec![primary.to_string()];
    for candidate in expanded {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        if variants.iter().any(|v| v == candidate) {
            continue;
        }
        if variants.len() > max_queries {
            break;
        }
        variants.push(candidate.to_string());
    }
    if !variants.iter().any(|v| v == original) {
        variants.push(original.to_string());
    }
    variants
}

/// Parse the expansion response defensively: bare JSON, JSON inside
/// ```json fences```, or the largest `{…}` substring.
fn parse_expansion(content: &str) -> Option<(Option<String>, Option<String>, Vec<String>)> {
    let value = parse_lenient_json(content)?;
    let obj = value.as_object()?;

    let intent = obj
        .get("intent")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    let primary = obj
        .get("primary_query")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let expanded: Vec<String> = obj
        .get("expanded_queries")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if primary.is_none() && expanded.is_empty() {
        return None;
    }
    Some((intent, primary, expanded))
}

fn parse_lenient_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // ```json fenced block
    if let Some(start) = trimmed.find("```") {
        let inner = &trimmed[start + 3..];
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        if let Some(end) = inner.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(inner[..end].trim()) {
                return Some(value);
            }
        }
    }

    // Largest {…} substring
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}
