//! Lesson data model
//!
//! A lesson is an ordered, immutable list of segments. Each segment carries
//! narration text, an optional image reference and an optional encoded audio
//! payload that has not been decoded yet.
//!
//! # Wire format
//!
//! Lessons arrive from the generation backend as JSON:
//!
//! ```json
//! {
//!   "topic": "Clouds",
//!   "segments": [
//!     { "segment_id": 1, "imageUrl": "a.jpg", "audioBase64": "UklGR...", "narration": "Intro", "duration": 4.2 },
//!     { "segment_id": 2, "imageUrl": null, "audioBase64": ["SUQz...", "..."], "narration": "Detail" }
//!   ]
//! }
//! ```
//!
//! `audioBase64` is either one transport-encoded string or a list of chunks
//! which are decoded separately and joined as bytes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

/// Segment identifier, unique within one lesson only
pub type SegmentId = i64;

/// Encoded audio payload as delivered by the backend
///
/// Still in transport encoding (base64, optionally behind a `data:` URI
/// prefix). The player's resource codec turns it into a playable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncodedAudio {
    /// Whole clip in one transport-encoded string
    Single(String),
    /// Clip split into transport-encoded chunks, in playback order
    Chunked(Vec<String>),
}

impl EncodedAudio {
    /// Total length of the encoded text across all chunks
    pub fn encoded_len(&self) -> usize {
        match self {
            EncodedAudio::Single(s) => s.len(),
            EncodedAudio::Chunked(chunks) => chunks.iter().map(String::len).sum(),
        }
    }

    /// Iterate over the chunks (a single payload is one chunk)
    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            EncodedAudio::Single(s) => std::slice::from_ref(s),
            EncodedAudio::Chunked(chunks) => chunks.as_slice(),
        };
        slice.iter().map(String::as_str)
    }
}

/// One unit of a lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Identifier, unique within the lesson
    #[serde(rename = "segment_id", alias = "id")]
    pub id: SegmentId,

    /// Image reference (URL); `None` means the segment has no image
    #[serde(rename = "imageUrl", alias = "image_url", default)]
    pub image_url: Option<String>,

    /// Encoded audio payload; `None` means the segment has no audio
    #[serde(
        rename = "audioBase64",
        alias = "audio_base64",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub audio: Option<EncodedAudio>,

    /// Narration text (always present, may be empty)
    #[serde(default)]
    pub narration: String,

    /// Duration hint in seconds
    ///
    /// Informational only. Playback end is driven by the decoded audio's own
    /// end-of-stream, never by this value.
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<f64>,
}

impl Segment {
    /// Create a segment with narration only
    pub fn new(id: SegmentId, narration: impl Into<String>) -> Self {
        Self {
            id,
            image_url: None,
            audio: None,
            narration: narration.into(),
            duration_hint: None,
        }
    }

    /// Builder: attach an image reference
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Builder: attach an encoded audio payload
    pub fn with_audio(mut self, audio: EncodedAudio) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Builder: attach a duration hint in seconds
    pub fn with_duration_hint(mut self, seconds: f64) -> Self {
        self.duration_hint = Some(seconds);
        self
    }

    /// Image reference, treating blank strings as "no image"
    pub fn image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Duration hint as a `Duration`, ignoring non-finite or non-positive values
    pub fn duration_hint(&self) -> Option<Duration> {
        self.duration_hint
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// A lesson: topic plus ordered segments
///
/// The identity is assigned locally when the lesson value is constructed and
/// is never read from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(skip, default = "Uuid::new_v4")]
    pub id: Uuid,
    pub topic: String,
    pub segments: Vec<Segment>,
}

impl Lesson {
    /// Create a lesson with a fresh identity
    pub fn new(topic: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            segments,
        }
    }

    /// Parse and validate a lesson from its JSON wire format
    pub fn from_json(json: &str) -> Result<Self> {
        let lesson: Lesson = serde_json::from_str(json)?;
        lesson.validate()?;
        Ok(lesson)
    }

    /// Check the data model rules
    ///
    /// - at least one segment
    /// - segment ids unique within the lesson
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::InvalidInput(format!(
                "lesson '{}' has no segments",
                self.topic
            )));
        }

        let mut seen = HashSet::with_capacity(self.segments.len());
        for segment in &self.segments {
            if !seen.insert(segment.id) {
                return Err(Error::InvalidInput(format!(
                    "duplicate segment id {} in lesson '{}'",
                    segment.id, self.topic
                )));
            }
        }

        Ok(())
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True if the lesson has no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment at a playback index
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Playback index of a segment id
    pub fn index_of(&self, id: SegmentId) -> Option<usize> {
        self.segments.iter().position(|s| s.id == id)
    }
}
