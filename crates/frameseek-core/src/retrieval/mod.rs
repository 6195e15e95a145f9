//! Single-pass keyframe retrieval.
//!
//! Embeds the query, asks the vector index for the nearest keyframes
//! (excluding already-seen keys), gates hits by score, hydrates the
//! survivors against the metadata store in one batched lookup and returns
//! them in ranking order.
//!
//! The order of the gate is fixed: exclusion and threshold filtering run
//! before hydration, and hits without metadata are dropped after it. A hit
//! below the threshold is therefore never looked up, and a hit above it that
//! has no record is reported in [`SearchOutput::missing_metadata`].

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::capability::{EmbeddingProvider, MetadataStore, VectorIndex};
use crate::error::{EmbeddingError, PartialHydrationError, RetrievalError, RetrievalResult};
use crate::keyframe::{
    sort_ranked, ExclusionSet, Keyframe, KeyframeResponse, RankedResult, SearchHit,
};

/// Timeouts applied to each individual capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub embed: Duration,
    pub index: Duration,
    pub store: Duration,
    pub decide: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            embed: Duration::from_secs(30),
            index: Duration::from_secs(10),
            store: Duration::from_secs(5),
            decide: Duration::from_secs(60),
        }
    }
}

/// Parameters of one search pass.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Natural language query to embed.
    pub query: String,
    /// Maximum number of results.
    pub top_k: usize,
    /// Hits with a score strictly below this are dropped.
    pub score_threshold: f32,
    /// Keys that must not appear in the output.
    pub exclusion: ExclusionSet,
}

impl SearchRequest {
    /// Create a request with no threshold and an empty exclusion set.
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            score_threshold: f32::NEG_INFINITY,
            exclusion: ExclusionSet::new(),
        }
    }

    pub fn with_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    pub fn with_exclusion(mut self, exclusion: ExclusionSet) -> Self {
        self.exclusion = exclusion;
        self
    }

    fn validate(&self) -> RetrievalResult<()> {
        if self.top_k == 0 {
            return Err(RetrievalError::invalid("top_k must be at least 1"));
        }
        if self.score_threshold.is_nan() {
            return Err(RetrievalError::invalid("score_threshold must be a number"));
        }
        Ok(())
    }
}

/// Ranked results of one search pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutput {
    pub results: Vec<RankedResult>,
    /// Keys that passed the score gate but had no metadata record.
    pub missing_metadata: Vec<u64>,
}

impl SearchOutput {
    /// True when hits were dropped for index/store skew.
    pub fn is_degraded(&self) -> bool {
        !self.missing_metadata.is_empty()
    }

    pub fn responses(&self) -> Vec<KeyframeResponse> {
        self.results.iter().map(KeyframeResponse::from).collect()
    }
}

/// Retrieval service over an embedding provider, a vector index and a
/// metadata store.
///
/// Holds no mutable state; share it behind an `Arc` and call `search`
/// concurrently.
#[derive(Clone)]
pub struct RetrievalService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn MetadataStore>,
    timeouts: CallTimeouts,
}

impl RetrievalService {
    /// Create a new retrieval service with default timeouts.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            timeouts: CallTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    /// Run one search pass.
    pub async fn search(&self, req: &SearchRequest) -> RetrievalResult<SearchOutput> {
        req.validate()?;

        let vector = self.embed(&req.query).await?;
        debug!(query = %req.query, dim = vector.len(), "Generated query embedding");

        let hits = self.nearest(&vector, req.top_k, &req.exclusion).await?;
        let fetched = hits.len();
        let hits = gate_hits(hits, req);
        debug!(fetched, kept = hits.len(), threshold = req.score_threshold, "Gated vector hits");

        if hits.is_empty() {
            return Ok(SearchOutput::default());
        }

        let keys: BTreeSet<u64> = hits.iter().map(|h| h.key).collect();
        let (records, missing_metadata) = match self.hydrate(&keys).await {
            Ok(records) => (records, Vec::new()),
            Err(RetrievalError::PartialHydration(partial)) => {
                warn!(
                    missing = ?partial.missing,
                    resolved = partial.resolved.len(),
                    "Dropping hits without metadata"
                );
                (partial.resolved, partial.missing)
            }
            Err(e) => return Err(e),
        };

        let mut results: Vec<RankedResult> = hits
            .into_iter()
            .filter_map(|hit| {
                records
                    .get(&hit.key)
                    .map(|kf| RankedResult::new(kf.clone(), hit.score))
            })
            .collect();
        sort_ranked(&mut results);

        Ok(SearchOutput {
            results,
            missing_metadata,
        })
    }

    /// Resolve keys to keyframe records with a single store lookup.
    ///
    /// Fails with [`RetrievalError::PartialHydration`] when some keys have no
    /// record; the error carries every record that did resolve.
    pub async fn hydrate(&self, keys: &BTreeSet<u64>) -> RetrievalResult<HashMap<u64, Keyframe>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut resolved = call_with_timeout(self.timeouts.store, self.store.get_many(keys))
            .await
            .map_err(RetrievalError::MetadataStoreUnavailable)?;
        resolved.retain(|key, _| keys.contains(key));

        let missing: Vec<u64> = keys
            .iter()
            .copied()
            .filter(|key| !resolved.contains_key(key))
            .collect();

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(PartialHydrationError {
                requested: keys.len(),
                resolved,
                missing,
            }
            .into())
        }
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let call = self.embedder.embed(query);
        let vector = match tokio::time::timeout(self.timeouts.embed, call).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => return Err(EmbeddingError::Unavailable(format!("{:#}", e))),
            Err(_) => return Err(EmbeddingError::Timeout(self.timeouts.embed)),
        };

        let expected = self.index.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &ExclusionSet,
    ) -> RetrievalResult<Vec<SearchHit>> {
        call_with_timeout(self.timeouts.index, self.index.top_k_search(vector, k, exclude))
            .await
            .map_err(RetrievalError::VectorIndexUnavailable)
    }
}

/// Await a capability call, flattening timeout and failure into a message.
async fn call_with_timeout<T, F>(limit: Duration, call: F) -> Result<T, String>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

/// Drop excluded, below-threshold and repeated hits, then cap at `top_k`.
///
/// The index already honours these, but the guarantees of `search` must not
/// depend on every engine getting them right.
fn gate_hits(hits: Vec<SearchHit>, req: &SearchRequest) -> Vec<SearchHit> {
    let mut best: HashMap<u64, SearchHit> = HashMap::with_capacity(hits.len());
    for hit in hits {
        // NaN never passes the gate
        if req.exclusion.contains(hit.key) || !(hit.score >= req.score_threshold) {
            continue;
        }
        best.entry(hit.key)
            .and_modify(|existing| {
                if hit.score > existing.score {
                    existing.score = hit.score;
                }
            })
            .or_insert(hit);
    }

    let mut kept: Vec<SearchHit> = best.into_values().collect();
    kept.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
    kept.truncate(req.top_k);
    kept
}
