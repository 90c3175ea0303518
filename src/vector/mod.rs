//! Client for the remote vector search engine.

pub mod client;

pub use client::{SearchMode, VectorClient};
