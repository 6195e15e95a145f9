//! Capability interfaces the retrieval pipeline consumes.
//!
//! Concrete engines (Ollama, Qdrant, Redis, the in-memory implementations)
//! live behind these traits, so any of them can be swapped without touching
//! the retrieval service or the refinement agent. Implementations report
//! failures as plain `anyhow` errors; classification happens in
//! [`crate::retrieval`].

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;

use crate::keyframe::{ExclusionSet, Keyframe, SearchHit};

/// Maps text to an embedding vector.
///
/// Output is not assumed deterministic, so callers must not cache vectors
/// across calls.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Name of the model producing the vectors.
    fn model_name(&self) -> &str;
}

/// Approximate nearest-neighbour search over keyframe embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` hits in descending score order.
    ///
    /// Keys in `exclude` must be removed before truncating to `k`, so that
    /// exclusion never shrinks the result below what the index holds.
    async fn top_k_search(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &ExclusionSet,
    ) -> Result<Vec<SearchHit>>;

    /// Dimension of the vectors stored in the index.
    fn dimension(&self) -> usize;
}

/// Keyed lookup of keyframe records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch all records for `keys` in one round trip.
    ///
    /// Missing keys are absent from the returned map; that alone is not an error.
    async fn get_many(&self, keys: &BTreeSet<u64>) -> Result<HashMap<u64, Keyframe>>;
}
