//! Typed chat event taxonomy.
//!
//! A chat run emits a finite sequence of these records. The transport (SSE
//! at the HTTP layer) frames each one as `data: <json>`; the core only
//! produces and consumes the records. Every run is terminated by exactly
//! one of `RunFinished` or `RunError`.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "RUN_STARTED")]
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        role: String,
    },
    #[serde(rename = "TEXT_MESSAGE_CHUNK")]
    TextMessageChunk {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },
    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    #[serde(rename = "CUSTOM")]
    Custom { name: String, value: Value },
    #[serde(rename = "RUN_ERROR")]
    RunError { error: String },
    #[serde(rename = "RUN_FINISHED")]
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
}

impl ChatEvent {
    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::RunFinished { .. } | ChatEvent::RunError { .. }
        )
    }

    /// The wire name of the event type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            ChatEvent::RunStarted { .. } => "RUN_STARTED",
            ChatEvent::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            ChatEvent::TextMessageChunk { .. } => "TEXT_MESSAGE_CHUNK",
            ChatEvent::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            ChatEvent::Custom { .. } => "CUSTOM",
            ChatEvent::RunError { .. } => "RUN_ERROR",
            ChatEvent::RunFinished { .. } => "RUN_FINISHED",
        }
    }
}
