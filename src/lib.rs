//! # rag-gateway
//!
//! A retrieval-augmented generation service that sits between clients and
//! two backends: a vector search engine that indexes text chunks, and an
//! OpenAI-compatible LLM provider. It exposes document ingestion, hybrid
//! knowledge search, and streaming chat.
//!
//! ## Architecture
//!
//! A chat request flows through the full pipeline:
//!
//! ```text
//!                        ┌──────────────┐
//!                        │ User Message  │
//!                        └──────┬───────┘
//!                               │ rate-limit admission
//!                               ▼
//!                  ┌───────────────────────┐
//!                  │   Query Processor     │
//!                  │ expansion / rewrite   │──── LLM (via bucket + queue)
//!                  └───────────┬───────────┘
//!                              │ 1..N query variants
//!            ┌─────────────────┼─────────────────┐
//!            ▼                 ▼                 ▼
//!     ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!     │  hybrid q1   │   │  hybrid q2  │   │  hybrid qN  │
//!     └──────┬──────┘   └──────┬──────┘   └──────┬──────┘
//!            └─────────────────┼─────────────────┘
//!                              │ ranked lists
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  RRF Fusion (k = 60)  │
//!                  │  score threshold      │
//!                  │  token budget         │
//!                  └───────────┬───────────┘
//!                              │ context chunks
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │  Streaming Inference  │──▶ RUN_STARTED … RUN_FINISHED
//!                  └───────────────────────┘
//! ```
//!
//! Ingestion runs dedup (sha256) → chunking (sentence-aware overlap) →
//! batched indexing into the vector backend → metadata commit.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for every tuning knob
//! - [`error`] - The closed failure taxonomy shared by all components
//! - [`models`] - Documents, chunks, search results, request/response types
//! - [`events`] - The typed chat event stream
//! - [`text`] - Token estimation, content hashing, and the chunker
//! - [`limit`] - Token-bucket rate limiter and bounded FIFO request queue
//! - [`vector`] - Retrying HTTP client for the vector search engine
//! - [`store`] - SQLite document metadata store with content-hash dedup
//! - [`llm`] - OpenAI-compatible provider and the query processor
//! - [`search`] - Multi-query RRF fusion and the retrieval pipeline
//! - [`ingest`] - The ingestion coordinator and blob storage
//! - [`chat`] - The chat orchestrator emitting the event stream
//! - [`api`] - Axum HTTP handlers adapting the core interfaces
//! - [`state`] - Shared application state, built in dependency order

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod limit;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
pub mod store;
pub mod text;
pub mod vector;
