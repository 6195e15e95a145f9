//! Qdrant-backed keyframe vector index.
//!
//! Points are keyed by the numeric keyframe key. Exclusion is pushed down as
//! a `must_not` id filter so Qdrant drops excluded points before applying
//! the limit.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{Condition, Filter, PointId, SearchPointsBuilder};
use qdrant_client::Qdrant;
use tracing::debug;

use frameseek_core::config::QdrantConfig;
use frameseek_core::{ExclusionSet, SearchHit, VectorIndex};

/// Keyframe index stored in one Qdrant collection.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    pub fn new(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .context("Failed to create Qdrant client")?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    pub fn from_config(config: &QdrantConfig) -> Result<Self> {
        Self::new(&config.url, &config.collection, config.dimension)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Check that Qdrant answers and the collection exists.
    pub async fn health_check(&self) -> Result<bool> {
        match self.client.collection_exists(self.collection.as_str()).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                debug!(error = %e, "Qdrant health check failed");
                Ok(false)
            }
        }
    }
}

/// Filter removing every excluded key, or `None` when nothing is excluded.
fn exclusion_filter(exclude: &ExclusionSet) -> Option<Filter> {
    if exclude.is_empty() {
        return None;
    }
    Some(Filter::must_not([Condition::has_id(exclude.iter())]))
}

/// Keyframe key carried by a Qdrant point id.
fn point_key(id: Option<PointId>) -> Result<u64> {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Num(key)) => Ok(key),
        Some(PointIdOptions::Uuid(uuid)) => {
            Err(anyhow!("Point id {uuid} is not a numeric keyframe key"))
        }
        None => Err(anyhow!("Search hit without point id")),
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn top_k_search(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &ExclusionSet,
    ) -> Result<Vec<SearchHit>> {
        let mut request = SearchPointsBuilder::new(&self.collection, vector.to_vec(), k as u64)
            .with_payload(false);
        if let Some(filter) = exclusion_filter(exclude) {
            request = request.filter(filter);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .context("Failed to search points")?;

        let hits = response
            .result
            .into_iter()
            .map(|point| Ok(SearchHit::new(point_key(point.id)?, point.score)))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            collection = %self.collection,
            k,
            excluded = exclude.len(),
            returned = hits.len(),
            "Qdrant search"
        );
        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
