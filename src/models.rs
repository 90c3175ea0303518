use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A unit of ingested content tracked in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Free-form caller-supplied metadata, passed through unchanged
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub status: DocumentStatus,
    pub chunks_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub media_type: MediaType,
    pub media_url: Option<String>,
    /// Hex sha256 of the canonical content bytes. Absent for failed
    /// documents so re-ingesting the same content is a fresh attempt.
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Indexed,
    Processing,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "indexed" => Some(DocumentStatus::Indexed),
            "processing" => Some(DocumentStatus::Processing),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MediaType::Text),
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "audio" => Some(MediaType::Audio),
            "document" => Some(MediaType::Document),
            _ => None,
        }
    }
}

/// A unit of indexed text. The vector backend owns the embedding; the
/// metadata store only records `chunks_count` and reconstructs chunk ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Known chunk metadata keys are first-class fields; unknown caller-supplied
/// keys pass through in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_char: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_char: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Derive the chunk id for `(document_id, index)`. The sole source of chunk
/// id syntax; the store and search engine both rely on it.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}_chunk_{index}")
}

/// Split a chunk id back into `(document_id, chunk_index)`.
pub fn parse_chunk_id(id: &str) -> Option<(&str, usize)> {
    let (doc_id, idx) = id.rsplit_once("_chunk_")?;
    idx.parse().ok().map(|i| (doc_id, i))
}

/// A raw hit from the vector backend, before document resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A resolved, caller-facing search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChunk {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
    pub document_id: String,
    pub document_title: String,
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

// ─── Search interface ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSearchRequest {
    pub user_id: String,
    pub query: String,
    pub limit: Option<usize>,
    pub token_budget: Option<usize>,
    #[serde(default)]
    pub filters: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSearchResponse {
    pub provider_name: String,
    pub chunks: Vec<ProviderChunk>,
    pub total_tokens: usize,
    pub metadata: SearchResponseMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponseMetadata {
    pub search_mode: String,
    pub results_count: usize,
    pub min_score: f32,
}

// ─── Ingestion interface ─────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct IngestTextRequest {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct IngestFileRequest {
    pub title: String,
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunks_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

// ─── Chat interface ──────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "threadId", alias = "thread_id")]
    pub thread_id: Option<String>,
    #[serde(rename = "runId", alias = "run_id")]
    pub run_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub options: ChatOptions,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChatOptions {
    pub search_limit: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub include_sources: Option<bool>,
}

/// Synchronous chat answer (the non-streaming variant).
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourcePreview>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::llm::provider::TokenUsage>,
}

/// Compact source reference emitted in `knowledge_sources` events and
/// synchronous chat responses.
#[derive(Debug, Clone, Serialize)]
pub struct SourcePreview {
    pub chunk_id: String,
    pub document_title: String,
    pub content_preview: String,
    pub score: f32,
}

impl SourcePreview {
    /// Preview is the first 100 characters of the chunk, with an ellipsis
    /// when truncated.
    pub fn from_chunk(chunk: &ProviderChunk) -> Self {
        let preview: String = chunk.content.chars().take(100).collect();
        let preview = if chunk.content.chars().count() > 100 {
            format!("{preview}…")
        } else {
            preview
        };
        Self {
            chunk_id: chunk.chunk_id.clone(),
            document_title: chunk.document_title.clone(),
            content_preview: preview,
            score: chunk.score,
        }
    }
}
