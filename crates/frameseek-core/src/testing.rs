//! Scripted capability fakes shared by unit tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::agent::{CancelHandle, Decision, QueryReasoner, RefinementContext};
use crate::capability::{EmbeddingProvider, MetadataStore, VectorIndex};
use crate::keyframe::{ExclusionSet, Keyframe, SearchHit};
use crate::memory::InMemoryStore;

/// Keyframe whose grouping coordinates are derived from its key.
pub fn keyframe(key: u64) -> Keyframe {
    Keyframe::new(key, 1, (key / 10) as u32 + 1, (key * 25) as u32)
}

/// Index returning a fixed hit list regardless of the query vector.
#[derive(Debug, Clone)]
pub struct ScriptedIndex {
    dimension: usize,
    hits: Vec<SearchHit>,
    honor_exclusion: bool,
    fail: bool,
}

impl ScriptedIndex {
    pub fn new(dimension: usize, hits: Vec<(u64, f32)>) -> Self {
        Self {
            dimension,
            hits: hits.into_iter().map(|(k, s)| SearchHit::new(k, s)).collect(),
            honor_exclusion: true,
            fail: false,
        }
    }

    pub fn ignoring_exclusion(mut self) -> Self {
        self.honor_exclusion = false;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn top_k_search(
        &self,
        _vector: &[f32],
        k: usize,
        exclude: &ExclusionSet,
    ) -> Result<Vec<SearchHit>> {
        if self.fail {
            bail!("connection refused");
        }
        let mut hits: Vec<SearchHit> = self
            .hits
            .iter()
            .filter(|h| !self.honor_exclusion || !exclude.contains(h.key))
            .copied()
            .collect();
        if self.honor_exclusion {
            hits.truncate(k);
        }
        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Index that returns never-seen keys with rising scores on every call.
#[derive(Debug)]
pub struct FreshIndex {
    dimension: usize,
    calls: AtomicU64,
}

impl FreshIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl VectorIndex for FreshIndex {
    async fn top_k_search(
        &self,
        _vector: &[f32],
        k: usize,
        _exclude: &ExclusionSet,
    ) -> Result<Vec<SearchHit>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..k as u64)
            .map(|i| SearchHit::new(call * 1000 + i, 0.5 + call as f32 * 0.01 - i as f32 * 0.001))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Store holding a record for every key it is asked about.
#[derive(Debug, Clone, Copy)]
pub struct EchoStore;

#[async_trait]
impl MetadataStore for EchoStore {
    async fn get_many(&self, keys: &BTreeSet<u64>) -> Result<HashMap<u64, Keyframe>> {
        Ok(keys.iter().map(|k| (*k, keyframe(*k))).collect())
    }
}

/// Store wrapper counting lookups.
#[derive(Debug)]
pub struct CountingStore {
    inner: InMemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for CountingStore {
    async fn get_many(&self, keys: &BTreeSet<u64>) -> Result<HashMap<u64, Keyframe>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_many(keys).await
    }
}

/// Embedder whose backend is always down.
#[derive(Debug, Clone, Copy)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Failed to connect to Ollama")
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Reasoner replaying a fixed list of decisions, then stopping.
#[derive(Debug)]
pub struct ScriptedReasoner {
    decisions: Mutex<VecDeque<Decision>>,
}

impl ScriptedReasoner {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
        }
    }
}

#[async_trait]
impl QueryReasoner for ScriptedReasoner {
    async fn decide(&self, _ctx: &RefinementContext<'_>) -> Result<Decision> {
        let next = self.decisions.lock().map(|mut q| q.pop_front()).unwrap_or(None);
        Ok(next.unwrap_or(Decision::Stop))
    }
}

/// Reasoner that always fails.
#[derive(Debug, Clone, Copy)]
pub struct FailingReasoner;

#[async_trait]
impl QueryReasoner for FailingReasoner {
    async fn decide(&self, _ctx: &RefinementContext<'_>) -> Result<Decision> {
        bail!("model returned malformed JSON")
    }
}

/// Reasoner that raises cancellation and asks to continue.
#[derive(Debug)]
pub struct CancellingReasoner {
    handle: CancelHandle,
}

impl CancellingReasoner {
    pub fn new(handle: CancelHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl QueryReasoner for CancellingReasoner {
    async fn decide(&self, ctx: &RefinementContext<'_>) -> Result<Decision> {
        self.handle.cancel();
        Ok(Decision::Continue(ctx.current_query.to_string()))
    }
}

/// Wrapper that sleeps before delegating to `inner`.
///
/// With `only_for`, an embedder wrapper only stalls on that query text.
#[derive(Debug)]
pub struct Delayed<T> {
    inner: T,
    delay: Duration,
    only_for: Option<String>,
}

impl<T> Delayed<T> {
    pub fn new(inner: T, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            only_for: None,
        }
    }

    pub fn only_for(mut self, text: &str) -> Self {
        self.only_for = Some(text.to_string());
        self
    }

    async fn stall(&self, text: Option<&str>) {
        let applies = match (&self.only_for, text) {
            (Some(only), Some(text)) => only == text,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if applies {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl<T: EmbeddingProvider> EmbeddingProvider for Delayed<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.stall(Some(text)).await;
        self.inner.embed(text).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[async_trait]
impl<T: VectorIndex> VectorIndex for Delayed<T> {
    async fn top_k_search(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &ExclusionSet,
    ) -> Result<Vec<SearchHit>> {
        self.stall(None).await;
        self.inner.top_k_search(vector, k, exclude).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[async_trait]
impl<T: MetadataStore> MetadataStore for Delayed<T> {
    async fn get_many(&self, keys: &BTreeSet<u64>) -> Result<HashMap<u64, Keyframe>> {
        self.stall(None).await;
        self.inner.get_many(keys).await
    }
}

#[async_trait]
impl<T: QueryReasoner> QueryReasoner for Delayed<T> {
    async fn decide(&self, ctx: &RefinementContext<'_>) -> Result<Decision> {
        self.stall(None).await;
        self.inner.decide(ctx).await
    }
}
