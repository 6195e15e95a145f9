//! Decision strategies driving refinement.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::keyframe::RankedResult;

/// What to do after a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "query", rename_all = "snake_case")]
pub enum Decision {
    /// Run another round with this query text.
    Continue(String),
    Stop,
}

/// Everything a reasoner may look at when deciding.
#[derive(Debug, Clone, Copy)]
pub struct RefinementContext<'a> {
    pub original_query: &'a str,
    pub current_query: &'a str,
    /// Index of the round that just completed; 0 is the initial search.
    pub round: usize,
    /// Current best results, in ranking order.
    pub results: &'a [RankedResult],
}

/// Opaque decision step of the refinement loop.
///
/// Can be a fixed rule, a model call or a prompt to a user; the agent only
/// reacts to the returned [`Decision`].
#[async_trait]
pub trait QueryReasoner: Send + Sync {
    async fn decide(&self, ctx: &RefinementContext<'_>) -> Result<Decision>;
}

/// Keep the current query and look past what is already held.
#[derive(Debug, Clone, Copy, Default)]
pub struct Widen;

#[async_trait]
impl QueryReasoner for Widen {
    async fn decide(&self, ctx: &RefinementContext<'_>) -> Result<Decision> {
        Ok(Decision::Continue(ctx.current_query.to_string()))
    }
}

/// Walk through a fixed list of reformulations, then stop.
#[derive(Debug, Clone, Default)]
pub struct QueryList {
    queries: Vec<String>,
}

impl QueryList {
    pub fn new<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queries: queries.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl QueryReasoner for QueryList {
    async fn decide(&self, ctx: &RefinementContext<'_>) -> Result<Decision> {
        Ok(match self.queries.get(ctx.round) {
            Some(query) => Decision::Continue(query.clone()),
            None => Decision::Stop,
        })
    }
}
