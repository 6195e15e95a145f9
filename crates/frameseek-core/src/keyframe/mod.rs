//! Keyframe records, hits and ranking order.

pub mod model;

use std::cmp::Ordering;
use std::collections::HashMap;

pub use model::{video_path, ExclusionSet, Keyframe, KeyframeResponse, RankedResult, SearchHit};

/// Ranking order: descending score, ties broken by ascending key.
pub fn rank_order(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.key().cmp(&b.key()))
}

/// Sort results into ranking order.
pub fn sort_ranked(results: &mut [RankedResult]) {
    results.sort_by(rank_order);
}

/// Merge `incoming` into `buffer`, keeping the highest score seen per key.
///
/// Returns how many keys were not in the buffer before.
pub fn merge_best(buffer: &mut HashMap<u64, RankedResult>, incoming: &[RankedResult]) -> usize {
    let mut added = 0;
    for result in incoming {
        match buffer.get_mut(&result.key()) {
            Some(existing) => {
                if result.score > existing.score {
                    existing.score = result.score;
                }
            }
            None => {
                buffer.insert(result.key(), result.clone());
                added += 1;
            }
        }
    }
    added
}

/// Drain a merge buffer into ranking order, truncated to `limit`.
pub fn ranked_from_buffer(buffer: &HashMap<u64, RankedResult>, limit: usize) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = buffer.values().cloned().collect();
    sort_ranked(&mut results);
    results.truncate(limit);
    results
}
