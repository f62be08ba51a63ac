//! Per-lesson arena
//!
//! Owns everything derived from one loaded lesson: its playable resources
//! (indexed by segment position) and its image preload status. Created when a
//! lesson is staged and torn down, releasing every resource, when the lesson
//! is replaced or cleared. Two lessons never share an arena.

use super::sequencer::{LessonToken, SegmentCue};
use crate::audio::{self, PlayableResource, ResourceRef};
use crate::preload::{PreloadStatus, Preloader, SettlementSink};
use lesson_common::events::ImageStatus;
use lesson_common::{Lesson, SegmentId};
use tracing::{debug, warn};

/// A segment that has no playable audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioGap {
    pub index: usize,
    pub segment_id: SegmentId,
    pub reason: String,
}

pub struct LessonArena {
    token: LessonToken,
    lesson: Lesson,
    resources: Vec<Option<PlayableResource>>,
    gaps: Vec<AudioGap>,
    images: PreloadStatus,
}

impl LessonArena {
    /// Decode every segment's audio up front
    ///
    /// A failed decode marks that segment audio-unavailable; other segments
    /// are unaffected.
    pub fn stage(token: LessonToken, lesson: Lesson) -> Self {
        let mut resources = Vec::with_capacity(lesson.len());
        let mut gaps = Vec::new();

        for (index, segment) in lesson.segments.iter().enumerate() {
            let resource = match &segment.audio {
                Some(payload) => match audio::decode(payload) {
                    Ok(resource) => Some(resource),
                    Err(e) => {
                        warn!(
                            "Segment {} of {} has undecodable audio: {}",
                            segment.id, token, e
                        );
                        gaps.push(AudioGap {
                            index,
                            segment_id: segment.id,
                            reason: e.to_string(),
                        });
                        None
                    }
                },
                None => {
                    gaps.push(AudioGap {
                        index,
                        segment_id: segment.id,
                        reason: "no audio payload".to_string(),
                    });
                    None
                }
            };
            resources.push(resource);
        }

        debug!(
            "Staged {} ({} segments, {} without audio)",
            token,
            lesson.len(),
            gaps.len()
        );

        Self {
            token,
            lesson,
            resources,
            gaps,
            images: PreloadStatus::new(),
        }
    }

    pub fn token(&self) -> LessonToken {
        self.token
    }

    pub fn lesson(&self) -> &Lesson {
        &self.lesson
    }

    /// Sequencer view of the segments
    pub fn cues(&self) -> Vec<SegmentCue> {
        self.lesson
            .segments
            .iter()
            .zip(&self.resources)
            .map(|(segment, resource)| SegmentCue {
                resource: resource.as_ref().map(PlayableResource::id),
                dwell: segment.duration_hint(),
            })
            .collect()
    }

    pub fn resource(&self, index: usize) -> Option<&PlayableResource> {
        self.resources.get(index).and_then(Option::as_ref)
    }

    /// Device handle for a segment's audio
    pub fn source(&self, index: usize) -> Option<ResourceRef> {
        self.resource(index).map(PlayableResource::source)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.iter().flatten().count()
    }

    /// Segments without playable audio
    pub fn gaps(&self) -> &[AudioGap] {
        &self.gaps
    }

    pub fn images(&self) -> &PreloadStatus {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut PreloadStatus {
        &mut self.images
    }

    /// Start image fetches for every segment with an image
    pub fn preload_images(&mut self, preloader: &Preloader, sink: &SettlementSink) -> usize {
        preloader.preload_all(self.token, &self.lesson.segments, &mut self.images, sink)
    }

    /// Re-trigger a segment's image fetch if it was never started
    pub fn ensure_image(&mut self, index: usize, preloader: &Preloader, sink: &SettlementSink) -> bool {
        match self.lesson.segments.get(index) {
            Some(segment) => preloader.preload_one(self.token, segment, &mut self.images, sink),
            None => false,
        }
    }

    pub fn image_status(&self, id: SegmentId) -> ImageStatus {
        self.images.status(id)
    }

    /// Release every resource. Returns how many were released.
    pub fn teardown(self) -> usize {
        let mut released = 0;
        for resource in self.resources.into_iter().flatten() {
            resource.release();
            released += 1;
        }
        debug!("Tore down {} ({} resources released)", self.token, released);
        released
    }
}
