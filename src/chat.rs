//! The chat orchestrator: the full RAG loop emitting a typed event stream.
//!
//! One run is delimited by `RUN_STARTED` and exactly one of `RUN_FINISHED`
//! or `RUN_ERROR`. Admission happens before any event is produced, so a
//! rate-limited request never opens a stream. A disconnected consumer stops
//! the producer task at its next emit.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::events::ChatEvent;
use crate::limit::TokenBucket;
use crate::llm::provider::{InferenceRequest, LlmProvider, StreamChunk, TokenUsage};
use crate::llm::query::QueryProcessor;
use crate::models::{ChatRequest, ChatResponse, ProviderChunk, SourcePreview};
use crate::search::engine::SearchEngine;

/// Buffer between the producer task and the consumer; fills when the
/// consumer is slow, pausing the producer.
const EVENT_CHANNEL_CAPACITY: usize = 32;

const NO_CONTEXT_SENTENCE: &str = "No relevant context was found for this query.";

pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

pub struct ChatOrchestrator {
    engine: Arc<SearchEngine>,
    query: Arc<QueryProcessor>,
    provider: Option<Arc<dyn LlmProvider>>,
    chat_limiter: Arc<TokenBucket>,
    config: ChatConfig,
}

/// Correlation ids and resolved options for one run.
struct RunContext {
    thread_id: String,
    run_id: String,
    message_id: String,
    user_id: String,
    search_limit: usize,
    temperature: f32,
    max_tokens: u32,
    include_sources: bool,
}

impl ChatOrchestrator {
    pub fn new(
        engine: Arc<SearchEngine>,
        query: Arc<QueryProcessor>,
        provider: Option<Arc<dyn LlmProvider>>,
        chat_limiter: Arc<TokenBucket>,
        config: ChatConfig,
    ) -> Self {
        Self {
            engine,
            query,
            provider,
            chat_limiter,
            config,
        }
    }

    fn resolve_context(&self, req: &ChatRequest) -> RunContext {
        RunContext {
            thread_id: req
                .thread_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            run_id: req
                .run_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            message_id: Uuid::new_v4().to_string(),
            user_id: req
                .user_id
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
            search_limit: req
                .options
                .search_limit
                .unwrap_or(self.config.default_search_limit),
            temperature: req
                .options
                .temperature
                .unwrap_or(self.config.default_temperature),
            max_tokens: req
                .options
                .max_tokens
                .unwrap_or(self.config.default_max_tokens),
            include_sources: req
                .options
                .include_sources
                .unwrap_or(self.config.include_sources_default),
        }
    }

    /// Streaming chat. Fails fast (no events) on validation and admission;
    /// everything after that is reported in-stream.
    pub fn chat_stream(self: &Arc<Self>, req: ChatRequest) -> Result<EventStream> {
        let message = req.message.trim().to_string();
        if message.is_empty() {
            return Err(Error::InvalidRequest("message is required".into()));
        }
        if !self.chat_limiter.try_acquire() {
            return Err(Error::RateLimited("chat admission rejected".into()));
        }

        let ctx = self.resolve_context(&req);
        let orchestrator = self.clone();
        let (tx, rx) = mpsc::channel::<ChatEvent>(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let thread_id = ctx.thread_id.clone();
            let run_id = ctx.run_id.clone();

            if emit(
                &tx,
                ChatEvent::RunStarted {
                    thread_id: thread_id.clone(),
                    run_id: run_id.clone(),
                },
            )
            .await
            .is_err()
            {
                return;
            }

            match orchestrator.run(&tx, &ctx, &message).await {
                Ok(()) => {
                    let _ = emit(
                        &tx,
                        ChatEvent::RunFinished {
                            thread_id,
                            run_id,
                        },
                    )
                    .await;
                }
                Err(Error::LlmStream(m)) if m == DISCONNECTED => {
                    debug!("Chat run {run_id} abandoned: client disconnected");
                }
                Err(e) => {
                    error!("Chat run {run_id} failed: {e}");
                    let _ = emit(
                        &tx,
                        ChatEvent::RunError {
                            error: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    /// The body of a streaming run: everything between `RUN_STARTED` and
    /// the terminal event.
    async fn run(
        &self,
        tx: &mpsc::Sender<ChatEvent>,
        ctx: &RunContext,
        message: &str,
    ) -> Result<()> {
        let (request, sources) = self.prepare(ctx, message).await?;

        if ctx.include_sources && !sources.is_empty() {
            emit(
                tx,
                ChatEvent::Custom {
                    name: "knowledge_sources".to_string(),
                    value: serde_json::to_value(&sources)?,
                },
            )
            .await?;
        }

        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::LlmUnavailable("no LLM provider configured".into()))?;
        let mut llm_stream = provider.infer_stream(&request).await?;

        emit(
            tx,
            ChatEvent::TextMessageStart {
                message_id: ctx.message_id.clone(),
                role: "assistant".to_string(),
            },
        )
        .await?;

        let mut usage: Option<TokenUsage> = None;
        while let Some(chunk) = llm_stream.next().await {
            match chunk {
                StreamChunk::Content { content } => {
                    emit(
                        tx,
                        ChatEvent::TextMessageChunk {
                            message_id: ctx.message_id.clone(),
                            delta: content,
                        },
                    )
                    .await?;
                }
                StreamChunk::Done {
                    usage: final_usage, ..
                } => {
                    usage = final_usage;
                }
                StreamChunk::Error { message } => {
                    return Err(Error::LlmStream(message));
                }
            }
        }

        emit(
            tx,
            ChatEvent::TextMessageEnd {
                message_id: ctx.message_id.clone(),
            },
        )
        .await?;

        if let Some(usage) = usage {
            emit(
                tx,
                ChatEvent::Custom {
                    name: "token_usage".to_string(),
                    value: serde_json::to_value(usage)?,
                },
            )
            .await?;
        }

        Ok(())
    }

    /// Synchronous chat: identical preparation, one blocking inference.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let message = req.message.trim().to_string();
        if message.is_empty() {
            return Err(Error::InvalidRequest("message is required".into()));
        }
        if !self.chat_limiter.try_acquire() {
            return Err(Error::RateLimited("chat admission rejected".into()));
        }

        let ctx = self.resolve_context(&req);
        let (request, sources) = self.prepare(&ctx, &message).await?;

        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::LlmUnavailable("no LLM provider configured".into()))?;
        let response = provider.infer(&request).await?;

        Ok(ChatResponse {
            thread_id: ctx.thread_id,
            run_id: ctx.run_id,
            message_id: ctx.message_id,
            response: response.text,
            sources: (ctx.include_sources && !sources.is_empty()).then_some(sources),
            usage: response.usage,
        })
    }

    /// Retrieval and prompt assembly shared by both chat variants.
    async fn prepare(
        &self,
        ctx: &RunContext,
        message: &str,
    ) -> Result<(InferenceRequest, Vec<SourcePreview>)> {
        let processed = self.query.process(message).await;
        let search = self
            .engine
            .search(
                &ctx.user_id,
                message,
                Some(ctx.search_limit),
                None,
                Some(&processed),
            )
            .await?;

        let sources: Vec<SourcePreview> =
            search.chunks.iter().map(SourcePreview::from_chunk).collect();

        let context_text = build_context_text(&search.chunks);
        let system_prompt = self
            .config
            .system_prompt_template
            .replace("{context}", &context_text);

        let request = InferenceRequest {
            system_prompt,
            user_prompt: message.to_string(),
            temperature: ctx.temperature,
            max_tokens: Some(ctx.max_tokens),
        };
        Ok((request, sources))
    }
}

const DISCONNECTED: &str = "client disconnected";

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| Error::LlmStream(DISCONNECTED.into()))
}

/// Render retrieved chunks into the `{context}` block:
/// `【title】\ncontent` entries joined by a separator line.
fn build_context_text(chunks: &[ProviderChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_SENTENCE.to_string();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let label = if chunk.document_title.is_empty() {
                format!("Source {}", i + 1)
            } else {
                chunk.document_title.clone()
            };
            format!("【{label}】\n{}", chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
