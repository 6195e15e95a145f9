//! Frameseek Core Library
//!
//! Keyframe retrieval: query embedding, ANN search with exclusion,
//! metadata hydration, score-gated ranking and multi-round refinement.

pub mod agent;
pub mod capability;
pub mod config;
pub mod error;
pub mod keyframe;
pub mod memory;
pub mod retrieval;
pub mod video;

#[cfg(test)]
mod testing;

pub use agent::{
    CancelHandle, CancelSignal, Decision, QueryList, QueryReasoner, RefineOutcome,
    RefineRequest, RefinementAgent, RefinementContext, RoundTrace, Termination, Widen,
};
pub use capability::{EmbeddingProvider, MetadataStore, VectorIndex};
pub use config::FrameseekConfig;
pub use error::{
    EmbeddingError, FrameseekError, FrameseekResult, PartialHydrationError, RetrievalError,
    RetrievalResult,
};
pub use keyframe::{ExclusionSet, Keyframe, KeyframeResponse, RankedResult, SearchHit};
pub use retrieval::{CallTimeouts, RetrievalService, SearchOutput, SearchRequest};
pub use video::{filter_by_objects, rank_videos, ObjectIndex, TranscriptIndex, VideoScore};
