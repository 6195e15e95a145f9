//! Video-level views over ranked keyframes.
//!
//! Groups results into videos, narrows them by detected objects and pulls
//! the transcript covering a run of keyframes.

pub mod objects;
pub mod transcript;

use std::collections::HashMap;

use serde::Serialize;

use crate::keyframe::{video_path, RankedResult};

pub use objects::{filter_by_objects, ObjectIndex};
pub use transcript::{TranscriptIndex, TranscriptSegment};

/// A video scored by the mean score of its retrieved keyframes.
#[derive(Debug, Clone, Serialize)]
pub struct VideoScore {
    pub group_num: u32,
    pub video_num: u32,
    pub mean_score: f32,
    /// Retrieved keyframes of this video, ordered by `keyframe_num`.
    pub keyframes: Vec<RankedResult>,
}

impl VideoScore {
    pub fn path(&self) -> String {
        video_path(self.group_num, self.video_num)
    }

    /// First and last keyframe numbers covered by the retrieved frames.
    pub fn frame_span(&self) -> Option<(u32, u32)> {
        let first = self.keyframes.first()?.keyframe.keyframe_num;
        let last = self.keyframes.last()?.keyframe.keyframe_num;
        Some((first, last))
    }

    /// The same video keeping only keyframes that show one of `targets`.
    ///
    /// The video keeps its rank score. When no keyframe matches, all of them
    /// stay.
    pub fn narrow_to_objects(&self, objects: &ObjectIndex, targets: &[String]) -> VideoScore {
        VideoScore {
            keyframes: filter_by_objects(&self.keyframes, objects, targets),
            ..self.clone()
        }
    }
}

/// Group results by video and rank videos by mean keyframe score.
///
/// Ties go to the video with more retrieved keyframes, then to the lower
/// group and video numbers.
pub fn rank_videos(results: &[RankedResult]) -> Vec<VideoScore> {
    let mut groups: HashMap<(u32, u32), Vec<RankedResult>> = HashMap::new();
    for result in results {
        groups
            .entry((result.keyframe.group_num, result.keyframe.video_num))
            .or_default()
            .push(result.clone());
    }

    let mut videos: Vec<VideoScore> = groups
        .into_iter()
        .map(|((group_num, video_num), mut keyframes)| {
            keyframes.sort_by_key(|r| (r.keyframe.keyframe_num, r.key()));
            let total: f64 = keyframes.iter().map(|r| r.score as f64).sum();
            VideoScore {
                group_num,
                video_num,
                mean_score: (total / keyframes.len() as f64) as f32,
                keyframes,
            }
        })
        .collect();

    videos.sort_by(|a, b| {
        b.mean_score
            .total_cmp(&a.mean_score)
            .then_with(|| b.keyframes.len().cmp(&a.keyframes.len()))
            .then_with(|| (a.group_num, a.video_num).cmp(&(b.group_num, b.video_num)))
    });
    videos
}
