//! Speech transcript segments per video.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::FrameseekResult;
use crate::keyframe::video_path;

/// One recognized speech segment, bounded by keyframe numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptSegment {
    #[serde(deserialize_with = "frame_number")]
    pub start_frame: u32,
    #[serde(deserialize_with = "frame_number")]
    pub end_frame: u32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    file_path: String,
    result: Vec<TranscriptSegment>,
}

/// Frame numbers appear both as JSON numbers and as numeric strings.
fn frame_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Transcript segments keyed by video path (`L01/V002`).
#[derive(Debug, Clone, Default)]
pub struct TranscriptIndex {
    videos: HashMap<String, Vec<TranscriptSegment>>,
}

impl TranscriptIndex {
    /// Load a JSON array of `{file_path, result: [segments]}` entries.
    pub fn load(path: &Path) -> FrameseekResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let index = Self::from_json(&text)?;
        debug!(path = %path.display(), videos = index.videos.len(), "Loaded transcripts");
        Ok(index)
    }

    pub fn from_json(text: &str) -> FrameseekResult<Self> {
        let entries: Vec<TranscriptEntry> = serde_json::from_str(text)?;
        let mut videos: HashMap<String, Vec<TranscriptSegment>> = HashMap::new();
        for entry in entries {
            videos.entry(entry.file_path).or_default().extend(entry.result);
        }
        Ok(Self { videos })
    }

    pub fn segments(&self, group_num: u32, video_num: u32) -> &[TranscriptSegment] {
        self.videos
            .get(&video_path(group_num, video_num))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Text of the segments lying fully inside `[first_kf, last_kf]`, space-joined.
    ///
    /// Returns `None` when the video has no transcript or no segment fits.
    pub fn window(
        &self,
        group_num: u32,
        video_num: u32,
        first_kf: u32,
        last_kf: u32,
    ) -> Option<String> {
        let parts: Vec<&str> = self
            .segments(group_num, video_num)
            .iter()
            .filter(|s| s.start_frame >= first_kf && s.end_frame <= last_kf)
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
