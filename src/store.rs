//! Persistent document metadata store.
//!
//! SQLite-backed index of ingested documents keyed by `document_id`, with a
//! unique index on `content_hash` for O(1) dedup lookups. Chunk rows are
//! not persisted; chunk ids are a pure function of `(document_id, index)`
//! and are reconstructed from `chunks_count` on demand.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{chunk_id, Document, DocumentStatus, MediaType};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS documents (
    document_id  TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    category     TEXT,
    description  TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    status       TEXT NOT NULL,
    chunks_count INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    media_type   TEXT NOT NULL DEFAULT 'text',
    media_url    TEXT,
    content_hash TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_category ON documents(category);
CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const LEGACY_IMPORT_KEY: &str = "legacy_snapshot_imported";

pub struct DocumentStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DocumentStore {
    /// Open or create the store at `db_path`. If `legacy_snapshot` names an
    /// existing JSON snapshot that has not been imported yet, it is loaded
    /// in a single transaction and then sidelined.
    pub fn open(db_path: &Path, legacy_snapshot: Option<&Path>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        };

        if let Some(snapshot) = legacy_snapshot {
            if let Err(e) = store.import_legacy_snapshot(snapshot) {
                warn!("Legacy snapshot import failed: {e}");
            }
        }

        Ok(store)
    }

    /// Insert or replace a document. `updated_at` is stamped here.
    pub fn upsert(&self, doc: &mut Document) -> Result<()> {
        doc.updated_at = Utc::now();
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO documents
             (document_id, title, category, description, metadata_json, status,
              chunks_count, created_at, updated_at, media_type, media_url, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                doc.document_id,
                doc.title,
                doc.category,
                doc.description,
                metadata_json,
                doc.status.as_str(),
                doc.chunks_count as i64,
                doc.created_at.to_rfc3339(),
                doc.updated_at.to_rfc3339(),
                doc.media_type.as_str(),
                doc.media_url,
                doc.content_hash,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, document_id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE document_id = ?1",
                params![document_id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn exists(&self, document_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Remove a document row. Returns whether anything was deleted.
    pub fn delete(&self, document_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM documents WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(affected > 0)
    }

    pub fn find_by_content_hash(&self, hash: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE content_hash = ?1",
                params![hash],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn hash_exists(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Documents ordered by `created_at` descending, plus the total count.
    pub fn list(&self, limit: usize, offset: usize) -> Result<(Vec<Document>, usize)> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(
            "SELECT * FROM documents ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let docs = stmt
            .query_map(params![limit as i64, offset as i64], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((docs, total as usize))
    }

    /// Reconstruct the chunk id list from `chunks_count`.
    pub fn chunk_ids(&self, document_id: &str) -> Result<Vec<String>> {
        let doc = self
            .get(document_id)?
            .ok_or_else(|| Error::NotFound(format!("document {document_id}")))?;
        Ok((0..doc.chunks_count)
            .map(|i| chunk_id(document_id, i))
            .collect())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// One-shot import of a legacy flat snapshot (a JSON array of document
    /// records). Runs in a single transaction; afterwards the snapshot file
    /// is renamed and the import recorded so it can never run twice.
    fn import_legacy_snapshot(&self, snapshot: &Path) -> Result<usize> {
        {
            let conn = self.conn.lock();
            let already: Option<String> = conn
                .query_row(
                    "SELECT value FROM meta WHERE key = ?1",
                    params![LEGACY_IMPORT_KEY],
                    |row| row.get(0),
                )
                .optional()?;
            if already.is_some() {
                return Ok(0);
            }
        }
        if !snapshot.exists() {
            return Ok(0);
        }

        let data = std::fs::read_to_string(snapshot)?;
        let docs: Vec<Document> = serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("malformed legacy snapshot: {e}")))?;

        let imported = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let mut imported = 0usize;
            for doc in &docs {
                let metadata_json = serde_json::to_string(&doc.metadata)?;
                tx.execute(
                    "INSERT OR IGNORE INTO documents
                     (document_id, title, category, description, metadata_json, status,
                      chunks_count, created_at, updated_at, media_type, media_url, content_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        doc.document_id,
                        doc.title,
                        doc.category,
                        doc.description,
                        metadata_json,
                        doc.status.as_str(),
                        doc.chunks_count as i64,
                        doc.created_at.to_rfc3339(),
                        doc.updated_at.to_rfc3339(),
                        doc.media_type.as_str(),
                        doc.media_url,
                        doc.content_hash,
                    ],
                )?;
                imported += 1;
            }
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![LEGACY_IMPORT_KEY, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            imported
        };

        let migrated = snapshot.with_extension("json.migrated");
        if let Err(e) = std::fs::rename(snapshot, &migrated) {
            warn!("Could not sideline legacy snapshot: {e}");
        }
        info!("Imported {imported} documents from legacy snapshot");
        Ok(imported)
    }
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let metadata_json: String = row.get("metadata_json")?;
    let metadata: HashMap<String, Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    let status: String = row.get("status")?;
    let media_type: String = row.get("media_type")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Document {
        document_id: row.get("document_id")?,
        title: row.get("title")?,
        category: row.get("category")?,
        description: row.get("description")?,
        metadata,
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Failed),
        chunks_count: row.get::<_, i64>("chunks_count")? as usize,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        media_type: MediaType::parse(&media_type).unwrap_or(MediaType::Text),
        media_url: row.get("media_url")?,
        content_hash: row.get("content_hash")?,
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
