//! Frameseek Redis Data Layer
//!
//! Async Redis persistence for keyframe metadata records.

pub mod client;
pub mod queries;
pub mod store;

pub use client::{init_pool, RedisError, RedisPool, RedisResult};
pub use queries::keyframes;
pub use store::RedisKeyframeStore;
