use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::{Stream, StreamExt};

use crate::api::error_response;
use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// POST /chat — RAG chat with SSE streaming.
///
/// Validation and rate-limit rejections happen before the stream opens, so
/// a rejected request gets a plain HTTP error and never sees an event.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let events = state.chat.chat_stream(req).map_err(error_response)?;

    let sse_stream = events.map(|event| -> Result<Event, Infallible> {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    Ok(Sse::new(sse_stream))
}

/// POST /chat/sync — the blocking variant returning the whole answer.
pub async fn chat_sync(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let response = state.chat.chat(req).await.map_err(error_response)?;
    Ok(Json(response))
}
