//! Document ingestion: dedup → chunk → batched index → metadata commit.
//!
//! Ingestion is atomic at the metadata level: a document ends up either
//! `indexed` with a complete `chunks_count` and its content hash, or
//! `failed` with `chunks_count = 0` and no hash — so re-ingesting the same
//! content after a failure is a fresh attempt, not a duplicate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    Document, DocumentStatus, IngestFileRequest, IngestResponse, IngestTextRequest, MediaType,
};
use crate::store::DocumentStore;
use crate::text::chunker::Chunker;
use crate::text::hash::content_hash;
use crate::vector::client::IndexDoc;
use crate::vector::VectorClient;

pub struct Ingestor {
    store: Arc<DocumentStore>,
    vector: Arc<VectorClient>,
    chunker: Chunker,
    media: MediaStore,
    max_file_bytes: u64,
}

impl Ingestor {
    pub fn new(
        store: Arc<DocumentStore>,
        vector: Arc<VectorClient>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            store,
            vector,
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            media: MediaStore::new(config.media_dir())?,
            max_file_bytes: config.max_file_size_mb * 1024 * 1024,
        })
    }

    /// Ingest raw text content.
    pub async fn ingest_text(&self, req: IngestTextRequest) -> Result<IngestResponse> {
        if req.title.trim().is_empty() {
            return Err(Error::InvalidRequest("title is required".into()));
        }
        if req.content.trim().is_empty() {
            return Err(Error::InvalidRequest("content is required".into()));
        }

        let hash = content_hash(req.content.as_bytes());
        if let Some(existing) = self.store.find_by_content_hash(&hash)? {
            return Ok(duplicate_response(&existing));
        }

        let document_id = generate_document_id();
        self.index_and_commit(
            document_id,
            &req.title,
            &req.content,
            req.category,
            req.description,
            req.metadata,
            MediaType::Text,
            None,
            hash,
        )
        .await
    }

    /// Ingest an uploaded file. Text-like files are chunked like raw text;
    /// image/video/audio files get one synthetic chunk describing them and
    /// their bytes stored as a blob. PDF/DOCX need an external extractor and
    /// are rejected when none is wired.
    pub async fn ingest_file(&self, req: IngestFileRequest) -> Result<IngestResponse> {
        if req.title.trim().is_empty() {
            return Err(Error::InvalidRequest("title is required".into()));
        }
        if req.bytes.len() as u64 > self.max_file_bytes {
            return Err(Error::FileTooLarge(
                req.bytes.len() as u64,
                self.max_file_bytes,
            ));
        }

        let media_type = classify_mime(&req.mime)
            .ok_or_else(|| Error::UnsupportedMediaType(req.mime.clone()))?;

        let hash = content_hash(&req.bytes);
        if let Some(existing) = self.store.find_by_content_hash(&hash)? {
            return Ok(duplicate_response(&existing));
        }

        let document_id = generate_document_id();

        match media_type {
            MediaType::Text => {
                let body = String::from_utf8_lossy(&req.bytes).to_string();
                // An empty extraction still yields a searchable document
                let content = if body.trim().is_empty() {
                    match &req.description {
                        Some(d) => format!("{}\n{}", req.title, d),
                        None => req.title.clone(),
                    }
                } else {
                    body
                };
                self.index_and_commit(
                    document_id,
                    &req.title,
                    &content,
                    req.category,
                    req.description,
                    req.metadata,
                    MediaType::Text,
                    None,
                    hash,
                )
                .await
            }
            media_type => {
                let blob_name = blob_file_name(&document_id, &req.mime, req.file_name.as_deref());
                let media_url = self.media.save(&blob_name, &req.bytes)?;

                // One synthetic chunk carries the description; the pixels
                // are the backend's business.
                let mut text = req.title.clone();
                if let Some(description) = &req.description {
                    text.push('\n');
                    text.push_str(description);
                }
                if let Some(name) = &req.file_name {
                    text.push('\n');
                    text.push_str(name);
                }

                self.index_and_commit_media(
                    document_id,
                    &req.title,
                    &text,
                    req.category,
                    req.description,
                    req.metadata,
                    media_type,
                    media_url,
                    hash,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn index_and_commit(
        &self,
        document_id: String,
        title: &str,
        content: &str,
        category: Option<String>,
        description: Option<String>,
        metadata: HashMap<String, Value>,
        media_type: MediaType,
        media_url: Option<String>,
        hash: String,
    ) -> Result<IngestResponse> {
        let mut chunks = self
            .chunker
            .chunk(content, &document_id, title, &metadata);
        for chunk in &mut chunks {
            chunk.metadata.media_type = Some(media_type);
            chunk.metadata.media_url = media_url.clone();
            chunk.metadata.category = category.clone();
        }
        let docs: Vec<IndexDoc> = chunks.iter().map(IndexDoc::from_chunk).collect();

        let outcome = self.vector.index(&docs).await;
        self.commit(
            document_id,
            title,
            category,
            description,
            metadata,
            media_type,
            media_url,
            hash,
            chunks.len(),
            outcome,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn index_and_commit_media(
        &self,
        document_id: String,
        title: &str,
        text: &str,
        category: Option<String>,
        description: Option<String>,
        metadata: HashMap<String, Value>,
        media_type: MediaType,
        media_url: String,
        hash: String,
    ) -> Result<IngestResponse> {
        let mut chunks = self.chunker.chunk(text, &document_id, title, &metadata);
        for chunk in &mut chunks {
            chunk.metadata.media_type = Some(media_type);
            chunk.metadata.media_url = Some(media_url.clone());
            chunk.metadata.category = category.clone();
        }
        let docs: Vec<IndexDoc> = chunks.iter().map(IndexDoc::from_chunk).collect();

        let outcome = self.vector.index_multimodal(&docs).await;
        self.commit(
            document_id,
            title,
            category,
            description,
            metadata,
            media_type,
            Some(media_url),
            hash,
            chunks.len(),
            outcome,
        )
    }

    /// Commit the metadata row. Success records the hash; failure records a
    /// `failed` row without one so the content can be retried.
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        document_id: String,
        title: &str,
        category: Option<String>,
        description: Option<String>,
        metadata: HashMap<String, Value>,
        media_type: MediaType,
        media_url: Option<String>,
        hash: String,
        chunks_count: usize,
        outcome: Result<()>,
    ) -> Result<IngestResponse> {
        let now = Utc::now();
        let mut doc = Document {
            document_id: document_id.clone(),
            title: title.to_string(),
            category,
            description,
            metadata,
            status: DocumentStatus::Indexed,
            chunks_count,
            created_at: now,
            updated_at: now,
            media_type,
            media_url,
            content_hash: Some(hash),
        };

        match outcome {
            Ok(()) => {
                self.store.upsert(&mut doc)?;
                info!("Indexed document {document_id} ({chunks_count} chunks)");
                Ok(IngestResponse {
                    document_id,
                    status: DocumentStatus::Indexed,
                    chunks_count,
                    message: format!("indexed {chunks_count} chunks"),
                })
            }
            Err(e) => {
                warn!("Indexing failed for {document_id}: {e}");
                doc.status = DocumentStatus::Failed;
                doc.chunks_count = 0;
                doc.content_hash = None;
                self.store.upsert(&mut doc)?;
                Ok(IngestResponse {
                    document_id,
                    status: DocumentStatus::Failed,
                    chunks_count: 0,
                    message: format!("indexing failed: {e}"),
                })
            }
        }
    }

    /// Delete a document: its chunks from the backend, its blob, its row.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let doc = self
            .store
            .get(document_id)?
            .ok_or_else(|| Error::NotFound(format!("document {document_id}")))?;

        let chunk_ids = self.store.chunk_ids(document_id)?;
        if let Err(e) = self.vector.delete(&chunk_ids).await {
            warn!("Failed to delete chunks of {document_id} from backend: {e}");
        }

        if let Some(media_url) = &doc.media_url {
            self.media.remove(media_url);
        }

        self.store.delete(document_id)?;
        info!("Deleted document {document_id}");
        Ok(())
    }

    pub fn media_store(&self) -> &MediaStore {
        &self.media
    }
}

fn duplicate_response(existing: &Document) -> IngestResponse {
    IngestResponse {
        document_id: existing.document_id.clone(),
        status: DocumentStatus::Indexed,
        chunks_count: existing.chunks_count,
        message: "duplicate content, returning existing document".to_string(),
    }
}

/// `doc_<timebase36>_<rand36>`: millisecond timestamp plus a random suffix,
/// both base36.
pub fn generate_document_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let nonce: u32 = rand::random();
    format!("doc_{}_{}", to_base36(millis), to_base36(nonce as u64))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Map a MIME type to the media kind the pipeline can handle. `None` means
/// the type needs an extractor this build does not carry.
fn classify_mime(mime: &str) -> Option<MediaType> {
    let mime = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if mime.starts_with("text/")
        || mime == "application/json"
        || mime == "application/markdown"
        || mime == "application/x-markdown"
    {
        Some(MediaType::Text)
    } else if mime.starts_with("image/") {
        Some(MediaType::Image)
    } else if mime.starts_with("video/") {
        Some(MediaType::Video)
    } else if mime.starts_with("audio/") {
        Some(MediaType::Audio)
    } else {
        None
    }
}

fn blob_file_name(document_id: &str, mime: &str, file_name: Option<&str>) -> String {
    let ext = file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .or_else(|| mime_extension(mime).map(str::to_string));
    match ext {
        Some(ext) => format!("{document_id}.{ext}"),
        None => document_id.to_string(),
    }
}

fn mime_extension(mime: &str) -> Option<&'static str> {
    match mime.split(';').next().unwrap_or_default().trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "audio/mpeg" => Some("mp3"),
        "audio/wav" => Some("wav"),
        _ => None,
    }
}

// ─── Blob storage ────────────────────────────────────────

/// Filesystem blob store for non-text media. URLs are `/media/<file>`,
/// served by the HTTP layer.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.dir.join(file_name);
        std::fs::write(&path, bytes)?;
        Ok(format!("/media/{file_name}"))
    }

    pub fn remove(&self, media_url: &str) {
        if let Some(file_name) = media_url.strip_prefix("/media/") {
            if let Some(path) = self.resolve(file_name) {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    /// Resolve a served file name to a path, refusing traversal.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.contains("..") || file_name.contains('/') || file_name.contains('\\') {
            return None;
        }
        let path = self.dir.join(file_name);
        path.exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_shape() {
        let id = generate_document_id();
        assert!(id.starts_with("doc_"));
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_document_ids_are_distinct() {
        let a = generate_document_id();
        let b = generate_document_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1295), "zz");
    }

    #[test]
    fn test_classify_mime() {
        assert_eq!(classify_mime("text/plain"), Some(MediaType::Text));
        assert_eq!(
            classify_mime("text/markdown; charset=utf-8"),
            Some(MediaType::Text)
        );
        assert_eq!(classify_mime("application/json"), Some(MediaType::Text));
        assert_eq!(classify_mime("image/png"), Some(MediaType::Image));
        assert_eq!(classify_mime("video/mp4"), Some(MediaType::Video));
        assert_eq!(classify_mime("audio/mpeg"), Some(MediaType::Audio));
        assert_eq!(classify_mime("application/pdf"), None);
        assert_eq!(
            classify_mime("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            None
        );
    }

    #[test]
    fn test_blob_file_name_prefers_original_extension() {
        assert_eq!(
            blob_file_name("doc_a_b", "image/png", Some("photo.JPG")),
            "doc_a_b.jpg"
        );
        assert_eq!(blob_file_name("doc_a_b", "image/png", None), "doc_a_b.png");
        assert_eq!(
            blob_file_name("doc_a_b", "application/octet-stream", None),
            "doc_a_b"
        );
    }

    #[test]
    fn test_media_store_save_resolve_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("media")).unwrap();

        let url = store.save("doc_x.png", b"not really a png").unwrap();
        assert_eq!(url, "/media/doc_x.png");
        assert!(store.resolve("doc_x.png").is_some());

        store.remove(&url);
        assert!(store.resolve("doc_x.png").is_none());
    }

    #[test]
    fn test_media_store_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("media")).unwrap();
        assert!(store.resolve("../secrets").is_none());
        assert!(store.resolve("a/b").is_none());
        assert!(store.resolve("a\\b").is_none());
    }
}
