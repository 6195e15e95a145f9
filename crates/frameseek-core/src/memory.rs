//! In-memory capability implementations.
//!
//! Brute-force cosine index, a hash-map record store and a lookup-table
//! embedder. Suitable for small offline collections and for tests.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::capability::{EmbeddingProvider, MetadataStore, VectorIndex};
use crate::error::{FrameseekError, FrameseekResult};
use crate::keyframe::{ExclusionSet, Keyframe, SearchHit};

/// Cosine similarity in [-1, 1]; 0 for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())) as f32
}

/// Exact nearest-neighbour index scanning every stored vector.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    dimension: usize,
    vectors: Vec<(u64, Vec<f32>)>,
}

impl InMemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    /// Add or replace the vector stored for `key`.
    pub fn insert(&mut self, key: u64, vector: Vec<f32>) -> FrameseekResult<()> {
        if vector.len() != self.dimension {
            return Err(FrameseekError::config(format!(
                "vector for key {} has dimension {}, index expects {}",
                key,
                vector.len(),
                self.dimension
            )));
        }
        match self.vectors.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = vector,
            None => self.vectors.push((key, vector)),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn top_k_search(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &ExclusionSet,
    ) -> Result<Vec<SearchHit>> {
        if vector.len() != self.dimension {
            bail!(
                "query dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            );
        }

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .filter(|(key, _)| !exclude.contains(*key))
            .map(|(key, v)| SearchHit::new(*key, cosine_similarity(v, vector)))
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        hits.truncate(k);
        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Hash-map keyframe store. Keys are unique: a second insert of the same
/// key is rejected.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: HashMap<u64, Keyframe>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyframe: Keyframe) -> FrameseekResult<()> {
        if self.records.contains_key(&keyframe.key) {
            return Err(FrameseekError::config(format!(
                "duplicate keyframe key {}",
                keyframe.key
            )));
        }
        self.records.insert(keyframe.key, keyframe);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get_many(&self, keys: &BTreeSet<u64>) -> Result<HashMap<u64, Keyframe>> {
        Ok(keys
            .iter()
            .filter_map(|key| self.records.get(key).map(|kf| (*key, kf.clone())))
            .collect())
    }
}

/// Embedder backed by a table of precomputed vectors.
#[derive(Debug, Clone, Default)]
pub struct StaticEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl StaticEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.vectors.get(text) {
            Some(v) => Ok(v.clone()),
            None => bail!("no precomputed embedding for '{}'", text),
        }
    }

    fn model_name(&self) -> &str {
        "static"
    }
}
