//! OpenAI-compatible LLM provider.
//!
//! Two entry points: `infer` (blocking completion) and `infer_stream`
//! (SSE token stream). Network errors and 5xx responses are retried with
//! exponential back-off; 4xx responses are not. Concrete provider variants
//! differ only in their default endpoint.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// One element of a streaming inference. The stream ends with exactly one
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Content {
        content: String,
    },
    Done {
        usage: Option<TokenUsage>,
        finish_reason: Option<String>,
    },
    Error {
        message: String,
    },
}

pub type InferenceStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse>;
    async fn infer_stream(&self, req: &InferenceRequest) -> Result<InferenceStream>;
    /// Non-throwing availability probe (`GET /models`).
    async fn health(&self) -> bool;
    fn model(&self) -> &str;
}

// ─── Provider factory ────────────────────────────────────

/// Known provider flavors. They all speak the OpenAI chat-completions
/// protocol and differ only in default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    LiteLlm,
    Generic,
}

impl ProviderKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "deepseek" => ProviderKind::DeepSeek,
            "litellm" => ProviderKind::LiteLlm,
            _ => ProviderKind::Generic,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::LiteLlm => "http://localhost:4000/v1",
            ProviderKind::Generic => "http://localhost:8000/v1",
        }
    }
}

/// Build the configured provider, or `None` when the LLM is disabled.
/// Search and ingestion work without one; chat and query rewriting degrade.
pub fn create_provider(
    config: &LlmConfig,
    http: reqwest::Client,
) -> Option<Arc<dyn LlmProvider>> {
    if !config.enabled {
        return None;
    }
    let kind = ProviderKind::from_tag(&config.provider);
    let base_url = if config.base_url.is_empty() {
        kind.default_base_url().to_string()
    } else {
        config.base_url.trim_end_matches('/').to_string()
    };
    Some(Arc::new(OpenAiCompatProvider {
        http,
        base_url,
        api_key: config.api_key.clone().unwrap_or_default(),
        model: config.model.clone(),
        timeout: Duration::from_secs(config.timeout_secs),
        max_retries: config.max_retries,
        retry_delay: Duration::from_millis(config.retry_delay_ms),
    }))
}

// ─── OpenAI-compatible implementation ────────────────────

pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct WireChatResponse {
    choices: Vec<WireChoice>,
    usage: Option<TokenUsage>,
    #[serde(default)]
    model: String,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireStreamDelta {
    content: Option<String>,
}

impl OpenAiCompatProvider {
    fn request_body<'a>(&'a self, req: &'a InferenceRequest, stream: bool) -> WireChatRequest<'a> {
        WireChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &req.system_prompt,
                },
                WireMessage {
                    role: "user",
                    content: &req.user_prompt,
                },
            ],
            stream,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    /// Send the completion request once; classify failures into retryable
    /// (network, 5xx) and terminal (4xx). 4xx is never retried.
    async fn send_completion(
        &self,
        req: &InferenceRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, (Error, bool)> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(req, stream))
            .send()
            .await
            .map_err(|e| (Error::LlmUnavailable(e.to_string()), true))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let retryable = !status.is_client_error();
        Err((
            Error::LlmUnavailable(format!("chat completions returned {status}: {body}")),
            retryable,
        ))
    }

    async fn completion_with_retry(
        &self,
        req: &InferenceRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            match self.send_completion(req, stream).await {
                Ok(resp) => return Ok(resp),
                Err((error, retryable)) => {
                    if !retryable || attempt >= self.max_retries {
                        return Err(error);
                    }
                    let delay = self.retry_delay * 2u32.pow(attempt);
                    warn!(
                        "LLM call failed (attempt {}/{}), retrying in {:?}: {error}",
                        attempt + 1,
                        self.max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse> {
        let resp = self.completion_with_retry(req, false).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;
        let parsed: WireChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::ProtocolError(format!("malformed completion response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProtocolError("completion response had no choices".into()))?;

        Ok(InferenceResponse {
            text: choice.message.content,
            usage: parsed.usage,
            model: if parsed.model.is_empty() {
                self.model.clone()
            } else {
                parsed.model
            },
            finish_reason: choice.finish_reason,
        })
    }

    async fn infer_stream(&self, req: &InferenceRequest) -> Result<InferenceStream> {
        let resp = self.completion_with_retry(req, true).await?;
        let lines = stream_lines(resp.bytes_stream());
        Ok(Box::pin(sse_chunks(lines)))
    }

    async fn health(&self) -> bool {
        match self
            .http
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(5))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ─── SSE parsing ─────────────────────────────────────────

/// What a single `data:` line contributed.
#[derive(Debug, Default, PartialEq)]
struct ParsedData {
    content: Option<String>,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

/// Parse one SSE line. Returns:
/// - `Some(Ok(data))` for a decoded chunk
/// - `Some(Err(e))` for a malformed `data:` payload
/// - `None` to skip (empty lines, non-data lines, `[DONE]`)
fn parse_sse_line(line: &str) -> Option<std::result::Result<ParsedData, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<WireStreamChunk>(data) {
        Ok(chunk) => {
            let mut parsed = ParsedData {
                usage: chunk.usage,
                ..Default::default()
            };
            if let Some(choice) = chunk.choices.into_iter().next() {
                parsed.content = choice.delta.content.filter(|c| !c.is_empty());
                parsed.finish_reason = choice.finish_reason;
            }
            Some(Ok(parsed))
        }
        Err(e) => Some(Err(format!("failed to parse stream chunk: {e}"))),
    }
}

/// Fold parsed SSE lines into the [`StreamChunk`] protocol: content deltas
/// as they arrive, then one terminal `Done` carrying usage and finish
/// reason, or one terminal `Error`.
fn sse_chunks(
    lines: impl Stream<Item = std::result::Result<String, String>> + Send + 'static,
) -> impl Stream<Item = StreamChunk> + Send {
    struct State<S> {
        lines: Pin<Box<S>>,
        usage: Option<TokenUsage>,
        finish_reason: Option<String>,
        terminated: bool,
    }

    stream::unfold(
        State {
            lines: Box::pin(lines),
            usage: None,
            finish_reason: None,
            terminated: false,
        },
        |mut st| async move {
            if st.terminated {
                return None;
            }
            loop {
                match st.lines.next().await {
                    Some(Ok(line)) => match parse_sse_line(&line) {
                        None => continue,
                        Some(Ok(parsed)) => {
                            if let Some(usage) = parsed.usage {
                                st.usage = Some(usage);
                            }
                            if let Some(finish) = parsed.finish_reason {
                                st.finish_reason = Some(finish);
                            }
                            if let Some(content) = parsed.content {
                                return Some((StreamChunk::Content { content }, st));
                            }
                        }
                        Some(Err(message)) => {
                            st.terminated = true;
                            return Some((StreamChunk::Error { message }, st));
                        }
                    },
                    Some(Err(message)) => {
                        st.terminated = true;
                        return Some((StreamChunk::Error { message }, st));
                    }
                    None => {
                        st.terminated = true;
                        return Some((
                            StreamChunk::Done {
                                usage: st.usage.take(),
                                finish_reason: st.finish_reason.take(),
                            },
                            st,
                        ));
                    }
                }
            }
        },
    )
}

/// Convert a byte stream into a stream of complete lines.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = std::result::Result<String, String>> + Send {
    stream::unfold(
        (Box::pin(byte_stream), String::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].to_string();
                    buffer = buffer[newline_pos + 1..].to_string();
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        return Some((Err(format!("stream read error: {e}")), (stream, buffer)));
                    }
                    None => {
                        if !buffer.trim().is_empty() {
                            let remaining = std::mem::take(&mut buffer);
                            return Some((Ok(remaining), (stream, buffer)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}
