//! Centralized error types for Frameseek.
//!
//! Capability adapters report raw `anyhow` errors; the retrieval service
//! classifies them into [`RetrievalError`] before anything above it sees them.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::agent::Termination;
use crate::keyframe::{Keyframe, RankedResult};

/// Failure to turn query text into a usable embedding.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),
}

/// Some requested keys had no record in the metadata store.
///
/// Informational: `resolved` holds every record that was found, so callers
/// can continue degraded instead of aborting.
#[derive(Error, Debug, Clone)]
#[error("{} of {requested} keyframe keys missing from metadata store", missing.len())]
pub struct PartialHydrationError {
    pub requested: usize,
    pub resolved: HashMap<u64, Keyframe>,
    pub missing: Vec<u64>,
}

/// Errors surfaced by the retrieval service and the refinement agent.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector index unavailable: {0}")]
    VectorIndexUnavailable(String),

    #[error("Metadata store unavailable: {0}")]
    MetadataStoreUnavailable(String),

    #[error("Partial hydration: {0}")]
    PartialHydration(#[from] PartialHydrationError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Refinement aborted ({reason}) with {} partial results", partial.len())]
    RefinementAborted {
        reason: Termination,
        partial: Vec<RankedResult>,
    },
}

/// Result type for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

impl RetrievalError {
    /// Create an invalid request error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Whether the error leaves nothing usable for the caller.
    ///
    /// Partial hydration and aborted refinement both carry results.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::PartialHydration(_) | Self::RefinementAborted { .. }
        )
    }
}

/// Errors outside the query path: configuration and file loading.
#[derive(Error, Debug)]
pub enum FrameseekError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for configuration and loading operations.
pub type FrameseekResult<T> = Result<T, FrameseekError>;

impl FrameseekError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let partial = PartialHydrationError {
            requested: 2,
            resolved: HashMap::new(),
            missing: vec![7],
        };
        assert!(!RetrievalError::from(partial).is_fatal());
        assert!(RetrievalError::VectorIndexUnavailable("down".into()).is_fatal());
        assert!(RetrievalError::from(EmbeddingError::Unavailable("x".into())).is_fatal());
        let aborted = RetrievalError::RefinementAborted {
            reason: Termination::Cancelled,
            partial: Vec::new(),
        };
        assert!(!aborted.is_fatal());
    }

    #[test]
    fn test_partial_hydration_message() {
        let err = PartialHydrationError {
            requested: 3,
            resolved: HashMap::new(),
            missing: vec![4, 9],
        };
        assert_eq!(
            err.to_string(),
            "2 of 3 keyframe keys missing from metadata store"
        );
    }
}
