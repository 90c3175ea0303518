use sha2::{Digest, Sha256};

/// Lowercase hex sha256 of raw bytes. Used for ingestion deduplication.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of a text's UTF-8 bytes.
pub fn content_hash_text(text: &str) -> String {
    content_hash(text.as_bytes())
}
