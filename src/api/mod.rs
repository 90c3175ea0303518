//! HTTP framing for the in-process service interfaces. Handlers stay thin:
//! validate, call the core, map the error taxonomy to status codes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::error::Error;
use crate::state::AppState;

pub mod chat;
pub mod documents;
pub mod search;

/// Single place where the failure taxonomy becomes HTTP status codes.
pub fn error_response(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::FileTooLarge(..) => StatusCode::PAYLOAD_TOO_LARGE,
        Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::QueueFull | Error::QueueCleared => StatusCode::SERVICE_UNAVAILABLE,
        Error::BackendUnavailable(_) | Error::LlmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::BackendRejected { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// GET /health - aggregate availability of the service and its backends
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let vector_ok = state.vector.health().await;
    let llm_ok = match &state.provider {
        Some(provider) => provider.health().await,
        None => false,
    };
    let documents = state.store.count().unwrap_or(0);

    Json(serde_json::json!({
        "status": if vector_ok { "ok" } else { "degraded" },
        "vector_backend": vector_ok,
        "llm": llm_ok,
        "documents": documents,
    }))
}

/// GET /config - effective configuration with secrets redacted
pub async fn get_config(State(state): State<AppState>) -> Json<crate::config::Config> {
    Json(state.config.redacted())
}
