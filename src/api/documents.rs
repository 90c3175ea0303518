use std::collections::HashMap;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::api::error_response;
use crate::error::Error;
use crate::models::{
    Document, DocumentListResponse, IngestFileRequest, IngestResponse, IngestTextRequest,
};
use crate::state::AppState;

/// POST /documents/text - ingest raw text
pub async fn ingest_text(
    State(state): State<AppState>,
    Json(req): Json<IngestTextRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let response = state
        .ingestor
        .ingest_text(req)
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}

/// POST /documents/file - ingest an uploaded file (multipart form)
pub async fn ingest_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let mut title = String::new();
    let mut category = None;
    let mut description = None;
    let mut metadata = HashMap::new();
    let mut bytes = Vec::new();
    let mut mime = String::new();
    let mut file_name = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => title = read_text_field(field).await?,
            "category" => category = Some(read_text_field(field).await?),
            "description" => description = Some(read_text_field(field).await?),
            "metadata" => {
                let raw = read_text_field(field).await?;
                metadata = serde_json::from_str(&raw).map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Invalid metadata JSON: {e}"))
                })?;
            }
            "file" => {
                mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                file_name = field.file_name().map(str::to_string);
                bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Upload read failed: {e}")))?
                    .to_vec();
            }
            _ => {}
        }
    }

    if bytes.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "A file field is required".into()));
    }

    let response = state
        .ingestor
        .ingest_file(IngestFileRequest {
            title,
            bytes,
            mime,
            file_name,
            category,
            description,
            metadata,
        })
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}

async fn read_text_field(
    field: axum::extract::multipart::Field<'_>,
) -> Result<String, (StatusCode, String)> {
    field
        .text()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Malformed field: {e}")))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_list_limit() -> usize {
    50
}

/// GET /documents - list documents, newest first
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>, (StatusCode, String)> {
    let (documents, total) = state
        .store
        .list(query.limit.min(200), query.offset)
        .map_err(|e| error_response(e))?;
    Ok(Json(DocumentListResponse { documents, total }))
}

/// GET /documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, (StatusCode, String)> {
    let doc = state
        .store
        .get(&id)
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::NotFound(format!("document {id}"))))?;
    Ok(Json(doc))
}

/// DELETE /documents/{id}
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .ingestor
        .delete_document(&id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /media/{file} - serve a stored blob
pub async fn serve_media(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let path = state
        .ingestor
        .media_store()
        .resolve(&file)
        .ok_or((StatusCode::NOT_FOUND, "No such media".to_string()))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let content_type = content_type_for(&file);

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

fn content_type_for(file: &str) -> &'static str {
    match file.rsplit('.').next().unwrap_or_default() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
