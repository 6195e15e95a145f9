//! Configuration for Frameseek.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables. Every section has defaults pointing at local services.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{FrameseekError, FrameseekResult};
use crate::retrieval::CallTimeouts;

/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default Qdrant gRPC URL.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrameseekConfig {
    pub ollama: OllamaConfig,
    pub qdrant: QdrantConfig,
    pub redis: RedisConfig,
    pub search: SearchConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub embed_model: String,
    pub reason_model: String,
    pub request_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            embed_model: "nomic-embed-text".to_string(),
            reason_model: "qwen2.5:3b".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub dimension: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_QDRANT_URL.to_string(),
            collection: "keyframes".to_string(),
            dimension: 768,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: "frameseek".to_string(),
        }
    }
}

/// Defaults for search requests when the caller does not set them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    pub max_rounds: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 50,
            score_threshold: 0.3,
            max_rounds: 3,
        }
    }
}

/// Per-capability-call timeouts in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embed_ms: u64,
    pub index_ms: u64,
    pub store_ms: u64,
    pub decide_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embed_ms: 30_000,
            index_ms: 10_000,
            store_ms: 5_000,
            decide_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            embed: Duration::from_millis(self.embed_ms),
            index: Duration::from_millis(self.index_ms),
            store: Duration::from_millis(self.store_ms),
            decide: Duration::from_millis(self.decide_ms),
        }
    }
}

impl FrameseekConfig {
    /// Load from `path` if given, apply environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> FrameseekResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                debug!(path = %path.display(), "Loaded config file");
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml(text: &str) -> FrameseekResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override connection settings from environment variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OLLAMA_URL") {
            self.ollama.url = v;
        }
        if let Some(v) = lookup("OLLAMA_EMBED_MODEL") {
            self.ollama.embed_model = v;
        }
        if let Some(v) = lookup("OLLAMA_GEN_MODEL") {
            self.ollama.reason_model = v;
        }
        if let Some(v) = lookup("QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Some(v) = lookup("QDRANT_COLLECTION") {
            self.qdrant.collection = v;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.redis.url = v;
        }
    }

    pub fn validate(&self) -> FrameseekResult<()> {
        if self.search.top_k == 0 {
            return Err(FrameseekError::config("search.top_k must be at least 1"));
        }
        if self.qdrant.dimension == 0 {
            return Err(FrameseekError::config("qdrant.dimension must be at least 1"));
        }
        if !self.search.score_threshold.is_finite() {
            return Err(FrameseekError::config("search.score_threshold must be finite"));
        }
        Ok(())
    }
}
