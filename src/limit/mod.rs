//! Back-pressure primitives: a token-bucket rate limiter controls *rate*,
//! a bounded FIFO queue controls *in-flight concurrency*. LLM calls pass
//! through both; their rejections surface as distinct errors.

pub mod queue;
pub mod rate;

pub use queue::RequestQueue;
pub use rate::TokenBucket;
