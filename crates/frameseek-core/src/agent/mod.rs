//! Multi-round refinement over the retrieval service.
//!
//! Round 0 searches with the caller's query. After each round the reasoner
//! decides whether to continue with new query text; before the next round
//! the keys of the current top results join the exclusion set, so every
//! round looks past what is already held. The loop ends on `Stop`, after
//! `max_rounds` refinement rounds, when a refinement round adds nothing new,
//! on cancellation, or when a refinement round fails.
//!
//! A failure in round 0 is returned to the caller. Anything later degrades:
//! the buffered results are returned with [`Termination::Degraded`].

pub mod cancel;
pub mod strategy;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RetrievalError, RetrievalResult};
use crate::keyframe::{merge_best, ranked_from_buffer, KeyframeResponse, RankedResult};
use crate::retrieval::{RetrievalService, SearchRequest};

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use strategy::{Decision, QueryList, QueryReasoner, RefinementContext, Widen};

/// Why a refinement loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The reasoner returned `Stop`.
    Stopped,
    /// `max_rounds` refinement rounds ran.
    MaxRounds,
    /// A refinement round produced no key that was not already held.
    Exhausted,
    /// The cancellation signal was raised between rounds.
    Cancelled,
    /// A refinement round or the decision step failed.
    Degraded,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::MaxRounds => "max_rounds",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Degraded => "degraded",
        }
    }

    /// Whether more rounds might have found better results.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::MaxRounds | Self::Cancelled | Self::Degraded)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a refinement run.
#[derive(Debug, Clone)]
pub struct RefineRequest {
    pub query: String,
    pub top_k: usize,
    pub score_threshold: f32,
    /// Refinement rounds after the initial search; 0 means a single search.
    pub max_rounds: usize,
}

impl RefineRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            score_threshold: f32::NEG_INFINITY,
            max_rounds: 3,
        }
    }

    pub fn with_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

/// One entry of the round trace.
#[derive(Debug, Clone, Serialize)]
pub struct RoundTrace {
    pub round: usize,
    pub query: String,
    /// Results returned by the search of this round.
    pub returned: usize,
    /// Keys not previously in the buffer.
    pub added: usize,
    /// Size of the exclusion set the round searched with.
    pub excluded: usize,
    pub missing_metadata: usize,
    pub decision: Option<Decision>,
    pub elapsed_ms: u64,
    /// Set when this round's search failed.
    pub search_error: Option<String>,
    /// Set when the decision step after this round failed.
    pub decision_error: Option<String>,
}

/// Result of a refinement run.
#[derive(Debug, Clone, Serialize)]
pub struct RefineOutcome {
    pub query_id: Uuid,
    pub started_at: String,
    pub results: Vec<RankedResult>,
    pub termination: Termination,
    pub trace: Vec<RoundTrace>,
}

impl RefineOutcome {
    pub fn is_incomplete(&self) -> bool {
        self.termination.is_incomplete()
    }

    /// True when results may be missing frames: the run degraded, or some
    /// round dropped hits that had no metadata record.
    pub fn is_degraded(&self) -> bool {
        self.termination == Termination::Degraded
            || self.trace.iter().any(|t| t.missing_metadata > 0)
    }

    /// Number of searches that completed.
    pub fn rounds_taken(&self) -> usize {
        self.trace.iter().filter(|t| t.search_error.is_none()).count()
    }

    pub fn responses(&self) -> Vec<KeyframeResponse> {
        self.results.iter().map(KeyframeResponse::from).collect()
    }

    /// Turn an incomplete outcome into [`RetrievalError::RefinementAborted`].
    pub fn require_complete(self) -> RetrievalResult<Vec<RankedResult>> {
        if self.is_incomplete() {
            Err(RetrievalError::RefinementAborted {
                reason: self.termination,
                partial: self.results,
            })
        } else {
            Ok(self.results)
        }
    }
}

/// Mutable state of one refinement run. Never shared between runs.
struct RefinementState {
    search: SearchRequest,
    buffer: HashMap<u64, RankedResult>,
    /// Keys returned by the index that had no metadata record.
    unresolved: Vec<u64>,
    round: usize,
}

impl RefinementState {
    fn new(req: &RefineRequest) -> Self {
        Self {
            search: SearchRequest::new(req.query.clone(), req.top_k)
                .with_threshold(req.score_threshold),
            buffer: HashMap::new(),
            unresolved: Vec::new(),
            round: 0,
        }
    }
}

/// Refinement agent: repeated searches under a reasoner's control.
#[derive(Clone)]
pub struct RefinementAgent {
    service: Arc<RetrievalService>,
    reasoner: Arc<dyn QueryReasoner>,
}

impl RefinementAgent {
    pub fn new(service: Arc<RetrievalService>, reasoner: Arc<dyn QueryReasoner>) -> Self {
        Self { service, reasoner }
    }

    /// Refine without a cancellation signal.
    pub async fn refine(&self, req: &RefineRequest) -> RetrievalResult<RefineOutcome> {
        self.refine_with_cancel(req, &CancelSignal::never()).await
    }

    /// Refine, checking `cancel` before every search.
    pub async fn refine_with_cancel(
        &self,
        req: &RefineRequest,
        cancel: &CancelSignal,
    ) -> RetrievalResult<RefineOutcome> {
        if req.top_k == 0 {
            return Err(RetrievalError::invalid("top_k must be at least 1"));
        }

        let query_id = Uuid::new_v4();
        let started_at = chrono::Utc::now().to_rfc3339();
        let mut state = RefinementState::new(req);
        let mut trace: Vec<RoundTrace> = Vec::new();

        let termination = loop {
            if cancel.is_cancelled() {
                info!(%query_id, round = state.round, "Refinement cancelled");
                break Termination::Cancelled;
            }

            let round_started = Instant::now();
            let mut entry = RoundTrace {
                round: state.round,
                query: state.search.query.clone(),
                returned: 0,
                added: 0,
                excluded: state.search.exclusion.len(),
                missing_metadata: 0,
                decision: None,
                elapsed_ms: 0,
                search_error: None,
                decision_error: None,
            };

            let output = match self.service.search(&state.search).await {
                Ok(output) => output,
                Err(e) if state.round == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        %query_id,
                        round = state.round,
                        error = %e,
                        "Refinement round failed, keeping buffered results"
                    );
                    entry.search_error = Some(e.to_string());
                    entry.elapsed_ms = round_started.elapsed().as_millis() as u64;
                    trace.push(entry);
                    break Termination::Degraded;
                }
            };

            let added = merge_best(&mut state.buffer, &output.results);
            state.unresolved.extend(output.missing_metadata.iter().copied());
            entry.returned = output.results.len();
            entry.added = added;
            entry.missing_metadata = output.missing_metadata.len();
            debug!(
                %query_id,
                round = state.round,
                returned = entry.returned,
                added,
                buffered = state.buffer.len(),
                "Round complete"
            );

            if state.round > 0 && added == 0 {
                entry.elapsed_ms = round_started.elapsed().as_millis() as u64;
                trace.push(entry);
                break Termination::Exhausted;
            }
            if state.round >= req.max_rounds {
                entry.elapsed_ms = round_started.elapsed().as_millis() as u64;
                trace.push(entry);
                break Termination::MaxRounds;
            }

            let top = ranked_from_buffer(&state.buffer, req.top_k);
            let ctx = RefinementContext {
                original_query: &req.query,
                current_query: &state.search.query,
                round: state.round,
                results: &top,
            };
            let limit = self.service.timeouts().decide;
            let decision = match tokio::time::timeout(limit, self.reasoner.decide(&ctx)).await {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => {
                    let message = format!("{:#}", e);
                    warn!(%query_id, round = state.round, error = %message, "Decision step failed");
                    entry.decision_error = Some(message);
                    entry.elapsed_ms = round_started.elapsed().as_millis() as u64;
                    trace.push(entry);
                    break Termination::Degraded;
                }
                Err(_) => {
                    warn!(%query_id, round = state.round, ?limit, "Decision step timed out");
                    entry.decision_error = Some(format!("timed out after {:?}", limit));
                    entry.elapsed_ms = round_started.elapsed().as_millis() as u64;
                    trace.push(entry);
                    break Termination::Degraded;
                }
            };

            entry.decision = Some(decision.clone());
            entry.elapsed_ms = round_started.elapsed().as_millis() as u64;
            trace.push(entry);

            match decision {
                Decision::Stop => break Termination::Stopped,
                Decision::Continue(next_query) => {
                    // every key seen so far, so the next round only surfaces new frames
                    state.search.exclusion.extend(state.buffer.keys().copied());
                    state.search.exclusion.extend(state.unresolved.iter().copied());
                    state.search.query = next_query;
                    state.round += 1;
                }
            }
        };

        let results = ranked_from_buffer(&state.buffer, req.top_k);
        info!(
            %query_id,
            termination = termination.as_str(),
            rounds = trace.len(),
            results = results.len(),
            "Refinement finished"
        );

        Ok(RefineOutcome {
            query_id,
            started_at,
            results,
            termination,
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::capability::EmbeddingProvider;
    use crate::error::EmbeddingError;
    use crate::memory::{InMemoryIndex, InMemoryStore, StaticEmbedder};
    use crate::retrieval::CallTimeouts;
    use crate::testing::{
        keyframe, CancellingReasoner, Delayed, EchoStore, FailingReasoner, FreshIndex,
        ScriptedReasoner,
    };

    /// Ten frames along a quarter circle; "near" points at key 0, "far" at key 9.
    fn arc_service<E: EmbeddingProvider + 'static>(embedder: E) -> Arc<RetrievalService> {
        let mut index = InMemoryIndex::new(2);
        let mut store = InMemoryStore::new();
        for key in 0..10u64 {
            let angle = key as f32 * std::f32::consts::FRAC_PI_2 / 9.0;
            index.insert(key, vec![angle.cos(), angle.sin()]).unwrap();
            store.insert(keyframe(key)).unwrap();
        }
        Arc::new(RetrievalService::new(Arc::new(embedder), Arc::new(index), Arc::new(store)))
    }

    fn arc_embedder() -> StaticEmbedder {
        StaticEmbedder::new()
            .with("near", vec![1.0, 0.0])
            .with("far", vec![0.0, 1.0])
    }

    fn keys(results: &[RankedResult]) -> Vec<u64> {
        results.iter().map(RankedResult::key).collect()
    }

    #[tokio::test]
    async fn test_zero_rounds_matches_single_search() {
        let service = arc_service(arc_embedder());
        let agent = RefinementAgent::new(service.clone(), Arc::new(Widen));

        let outcome = agent
            .refine(&RefineRequest::new("near", 3).with_max_rounds(0))
            .await
            .unwrap();
        let single = service.search(&SearchRequest::new("near", 3)).await.unwrap();

        assert_eq!(outcome.results, single.results);
        assert_eq!(outcome.termination, Termination::MaxRounds);
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].decision, None);
    }

    #[tokio::test]
    async fn test_stop_returns_first_round() {
        let agent = RefinementAgent::new(
            arc_service(arc_embedder()),
            Arc::new(ScriptedReasoner::new(vec![Decision::Stop])),
        );
        let outcome = agent.refine(&RefineRequest::new("near", 3)).await.unwrap();
        assert_eq!(keys(&outcome.results), vec![0, 1, 2]);
        assert_eq!(outcome.termination, Termination::Stopped);
        assert!(!outcome.is_incomplete());
        assert_eq!(outcome.trace[0].decision, Some(Decision::Stop));
    }

    #[tokio::test]
    async fn test_reformulation_merges_and_excludes_held_results() {
        let reasoner = ScriptedReasoner::new(vec![
            Decision::Continue("far".to_string()),
            Decision::Stop,
        ]);
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(reasoner));
        let outcome = agent
            .refine(&RefineRequest::new("near", 3).with_max_rounds(5))
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Stopped);
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[1].query, "far");
        assert_eq!(outcome.trace[1].excluded, 3);
        assert_eq!(outcome.trace[1].added, 3);
        // the perfect match of each query leads the merged buffer
        let top: HashSet<u64> = keys(&outcome.results[..2]).into_iter().collect();
        assert_eq!(top, HashSet::from([0, 9]));
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test]
    async fn test_never_fewer_than_single_search() {
        let service = arc_service(arc_embedder());
        let single = service.search(&SearchRequest::new("near", 4)).await.unwrap();
        let agent = RefinementAgent::new(service, Arc::new(Widen));
        let outcome = agent
            .refine(&RefineRequest::new("near", 4).with_max_rounds(4))
            .await
            .unwrap();
        assert!(outcome.results.len() >= single.results.len());
        assert_eq!(keys(&outcome.results), keys(&single.results));
    }

    #[tokio::test]
    async fn test_widen_pages_through_every_key() {
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(Widen));
        let outcome = agent
            .refine(&RefineRequest::new("near", 3).with_max_rounds(10))
            .await
            .unwrap();

        let excluded: Vec<usize> = outcome.trace.iter().map(|t| t.excluded).collect();
        let added: Vec<usize> = outcome.trace.iter().map(|t| t.added).collect();
        assert_eq!(excluded, vec![0, 3, 6, 9, 10]);
        assert_eq!(added, vec![3, 3, 3, 1, 0]);
        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(keys(&outcome.results), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_exclusion_covers_whole_buffer() {
        // round 1 fills the buffer past top_k; round 2 must not fetch those keys again
        let reasoner = ScriptedReasoner::new(vec![
            Decision::Continue("near".to_string()),
            Decision::Continue("near".to_string()),
            Decision::Stop,
        ]);
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(reasoner));
        let outcome = agent
            .refine(&RefineRequest::new("near", 2).with_max_rounds(5))
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Stopped);
        assert_eq!(outcome.trace.len(), 3);
        assert_eq!(outcome.trace[2].excluded, 4);
        assert_eq!(outcome.trace[2].added, 2);
    }

    #[tokio::test]
    async fn test_unresolved_keys_are_not_refetched() {
        let mut index = InMemoryIndex::new(2);
        let mut store = InMemoryStore::new();
        for key in 0..4u64 {
            index.insert(key, vec![1.0, key as f32 * 0.1]).unwrap();
            if key != 0 {
                store.insert(keyframe(key)).unwrap();
            }
        }
        let embedder = StaticEmbedder::new().with("q", vec![1.0, 0.0]);
        let service = Arc::new(RetrievalService::new(
            Arc::new(embedder),
            Arc::new(index),
            Arc::new(store),
        ));
        let agent = RefinementAgent::new(service, Arc::new(Widen));
        let outcome = agent
            .refine(&RefineRequest::new("q", 2).with_max_rounds(3))
            .await
            .unwrap();

        assert_eq!(outcome.trace[0].missing_metadata, 1);
        assert_eq!(outcome.trace[1].excluded, 2);
        assert_eq!(outcome.trace[1].missing_metadata, 0);
        assert!(outcome.is_degraded());
        assert!(!outcome.is_incomplete());
    }

    #[tokio::test]
    async fn test_always_continue_is_bounded_by_max_rounds() {
        let embedder = StaticEmbedder::new().with("q", vec![1.0]);
        let service = Arc::new(RetrievalService::new(
            Arc::new(embedder),
            Arc::new(FreshIndex::new(1)),
            Arc::new(EchoStore),
        ));
        let agent = RefinementAgent::new(service, Arc::new(Widen));
        let outcome = agent
            .refine(&RefineRequest::new("q", 2).with_max_rounds(4))
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::MaxRounds);
        assert_eq!(outcome.trace.len(), 5);
        assert_eq!(outcome.rounds_taken(), 5);
        assert!(outcome.is_incomplete());
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_on_first_round_propagates() {
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(Widen));
        let err = agent.refine(&RefineRequest::new("unknown", 3)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_embedding_failure_on_refined_round_degrades() {
        let reasoner = ScriptedReasoner::new(vec![Decision::Continue("unknown".to_string())]);
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(reasoner));
        let outcome = agent.refine(&RefineRequest::new("near", 2)).await.unwrap();

        assert_eq!(outcome.termination, Termination::Degraded);
        assert_eq!(keys(&outcome.results), vec![0, 1]);
        assert!(outcome.trace[1].search_error.is_some());
        assert_eq!(outcome.rounds_taken(), 1);

        match outcome.require_complete() {
            Err(RetrievalError::RefinementAborted { reason, partial }) => {
                assert_eq!(reason, Termination::Degraded);
                assert_eq!(partial.len(), 2);
            }
            other => panic!("expected aborted refinement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decision_failure_degrades() {
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(FailingReasoner));
        let outcome = agent.refine(&RefineRequest::new("near", 2)).await.unwrap();
        assert_eq!(outcome.termination, Termination::Degraded);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.trace[0].decision_error.is_some());
        assert_eq!(outcome.rounds_taken(), 1);
    }

    #[tokio::test]
    async fn test_cancel_between_rounds_returns_buffer() {
        let (handle, signal) = cancel_pair();
        let agent = RefinementAgent::new(
            arc_service(arc_embedder()),
            Arc::new(CancellingReasoner::new(handle)),
        );
        let outcome = agent
            .refine_with_cancel(&RefineRequest::new("near", 2).with_max_rounds(5), &signal)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(keys(&outcome.results), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(Widen));
        let outcome = agent
            .refine_with_cancel(&RefineRequest::new("near", 2), &signal)
            .await
            .unwrap();
        assert_eq!(outcome.termination, Termination::Cancelled);
        assert!(outcome.results.is_empty());
        assert!(outcome.trace.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_applies_every_round() {
        let reasoner =
            ScriptedReasoner::new(vec![Decision::Continue("far".to_string()), Decision::Stop]);
        let agent = RefinementAgent::new(arc_service(arc_embedder()), Arc::new(reasoner));
        let outcome = agent
            .refine(&RefineRequest::new("near", 10).with_threshold(0.95))
            .await
            .unwrap();
        assert!(outcome.results.iter().all(|r| r.score >= 0.95));
        let found: HashSet<u64> = keys(&outcome.results).into_iter().collect();
        assert_eq!(found, HashSet::from([0, 1, 8, 9]));
    }

    fn short_timeouts() -> CallTimeouts {
        CallTimeouts {
            embed: Duration::from_millis(50),
            index: Duration::from_millis(50),
            store: Duration::from_millis(50),
            decide: Duration::from_millis(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refined_round_timeout_keeps_earlier_buffer() {
        let embedder = Delayed::new(arc_embedder(), Duration::from_secs(5)).only_for("far");
        let service = arc_service(embedder);
        let service = Arc::new(RetrievalService::clone(&service).with_timeouts(short_timeouts()));
        let reasoner = ScriptedReasoner::new(vec![Decision::Continue("far".to_string())]);
        let agent = RefinementAgent::new(service, Arc::new(reasoner));

        let outcome = agent
            .refine(&RefineRequest::new("near", 2).with_max_rounds(3))
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Degraded);
        assert_eq!(keys(&outcome.results), vec![0, 1]);
        assert_eq!(outcome.trace.len(), 2);
        let error = outcome.trace[1].search_error.as_deref().unwrap();
        assert!(error.contains("timed out"), "{error}");
        assert!(outcome.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_round_timeout_propagates() {
        let embedder = Delayed::new(arc_embedder(), Duration::from_secs(5));
        let service = Arc::new(
            RetrievalService::clone(&arc_service(embedder)).with_timeouts(short_timeouts()),
        );
        let agent = RefinementAgent::new(service, Arc::new(Widen));

        let err = agent.refine(&RefineRequest::new("near", 2)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(EmbeddingError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_timeout_degrades() {
        let service = Arc::new(
            RetrievalService::clone(&arc_service(arc_embedder())).with_timeouts(short_timeouts()),
        );
        let reasoner = Delayed::new(Widen, Duration::from_secs(5));
        let agent = RefinementAgent::new(service, Arc::new(reasoner));

        let outcome = agent.refine(&RefineRequest::new("near", 2)).await.unwrap();

        assert_eq!(outcome.termination, Termination::Degraded);
        assert_eq!(keys(&outcome.results), vec![0, 1]);
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].decision, None);
        let error = outcome.trace[0].decision_error.as_deref().unwrap();
        assert!(error.contains("timed out"), "{error}");
    }
}
