//! Detected-object labels per keyframe image.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::error::FrameseekResult;
use crate::keyframe::RankedResult;

/// Object labels keyed by keyframe image path (`L01/V002/00000123.webp`).
#[derive(Debug, Clone, Default)]
pub struct ObjectIndex {
    labels: HashMap<String, Vec<String>>,
}

impl ObjectIndex {
    pub fn new(labels: HashMap<String, Vec<String>>) -> Self {
        Self { labels }
    }

    /// Load a JSON object mapping image paths to label arrays.
    pub fn load(path: &Path) -> FrameseekResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let index = Self::from_json(&text)?;
        debug!(path = %path.display(), frames = index.labels.len(), "Loaded object labels");
        Ok(index)
    }

    pub fn from_json(text: &str) -> FrameseekResult<Self> {
        Ok(Self::new(serde_json::from_str(text)?))
    }

    pub fn labels_for(&self, image_path: &str) -> &[String] {
        self.labels.get(image_path).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Keep results whose frame shows at least one of `targets`.
///
/// Labels compare case-insensitively. No targets means no filtering, and a
/// filter that would remove everything returns the input unchanged.
pub fn filter_by_objects(
    results: &[RankedResult],
    objects: &ObjectIndex,
    targets: &[String],
) -> Vec<RankedResult> {
    if targets.is_empty() {
        return results.to_vec();
    }

    let wanted: HashSet<String> = targets.iter().map(|t| t.to_lowercase()).collect();
    let kept: Vec<RankedResult> = results
        .iter()
        .filter(|r| {
            objects
                .labels_for(&r.keyframe.image_path())
                .iter()
                .any(|label| wanted.contains(&label.to_lowercase()))
        })
        .cloned()
        .collect();

    if kept.is_empty() {
        debug!(targets = ?targets, "Object filter matched nothing, keeping all results");
        results.to_vec()
    } else {
        kept
    }
}
