//! Keyframe domain models.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A keyframe record as held by the metadata store.
///
/// `key` is the identity; `(group_num, video_num, keyframe_num)` locate the
/// frame inside the collection but are not unique on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyframe {
    pub key: u64,
    pub video_num: u32,
    pub group_num: u32,
    pub keyframe_num: u32,
}

impl Keyframe {
    pub fn new(key: u64, group_num: u32, video_num: u32, keyframe_num: u32) -> Self {
        Self {
            key,
            video_num,
            group_num,
            keyframe_num,
        }
    }

    /// Path of the video this frame belongs to, e.g. `L02/V013`.
    pub fn video_path(&self) -> String {
        video_path(self.group_num, self.video_num)
    }

    /// Path of the frame image, e.g. `L02/V013/00000421.webp`.
    pub fn image_path(&self) -> String {
        format!("{}/{:08}.webp", self.video_path(), self.keyframe_num)
    }
}

/// Format the `L{group}/V{video}` path shared by frame images and transcripts.
pub fn video_path(group_num: u32, video_num: u32) -> String {
    format!("L{:02}/V{:03}", group_num, video_num)
}

/// A raw hit from the vector index. Higher score is more similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: u64,
    pub score: f32,
}

impl SearchHit {
    pub fn new(key: u64, score: f32) -> Self {
        Self { key, score }
    }
}

/// A hit resolved against the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub keyframe: Keyframe,
    pub score: f32,
}

impl RankedResult {
    pub fn new(keyframe: Keyframe, score: f32) -> Self {
        Self { keyframe, score }
    }

    pub fn key(&self) -> u64 {
        self.keyframe.key
    }
}

/// Keys to omit from a search.
///
/// Only grows: there is no removal, so exclusion across refinement rounds
/// is monotonic. Ordered so that requests built from it are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    keys: BTreeSet<u64>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key. Returns `true` if it was not already excluded.
    pub fn insert(&mut self, key: u64) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.keys.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.keys.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.keys.iter().copied().collect()
    }
}

impl FromIterator<u64> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl Extend<u64> for ExclusionSet {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        self.keys.extend(iter);
    }
}

/// Flat response shape handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeResponse {
    pub key: u64,
    pub video_num: u32,
    pub group_num: u32,
    pub keyframe_num: u32,
    pub score: f32,
}

impl From<&RankedResult> for KeyframeResponse {
    fn from(result: &RankedResult) -> Self {
        Self {
            key: result.keyframe.key,
            video_num: result.keyframe.video_num,
            group_num: result.keyframe.group_num,
            keyframe_num: result.keyframe.keyframe_num,
            score: result.score,
        }
    }
}
