//! Lesson sequencer state machine
//!
//! Pure state machine: [`Sequencer::handle`] takes an event plus a
//! [`DeviceView`] of the playback device (attached source, end reached) and
//! returns the effects the runtime must perform, in order. Nothing here
//! touches a device, a timer or the network, so every transition is testable
//! on its own.
//!
//! # States
//!
//! ```text
//!  Idle ──Load──▶ Ready ──AutoStart/Play──▶ Playing ◀──Play── Paused
//!                                            │  ▲  └──Pause──▶  │
//!                           EndOfStream/Dwell│  │advance         │Next
//!                              (last index)  ▼  │                │
//!                                           Ended ──Play (restart at 0)
//! ```
//!
//! Any state returns to `Idle` on `Clear`; `Load` passes through `Idle` to
//! `Ready` for the new lesson.
//!
//! # Staleness
//!
//! Every asynchronous signal carries the [`LessonToken`] it was launched
//! under. Signals whose token is not the active one are dropped, as are
//! end-of-stream signals for a resource other than the active segment's and
//! dwell timers from a superseded dwell epoch.
//!
//! An end-of-stream that loses the race against a pause is dropped too; the
//! device still reports the clip as finished, so the next resume advances.

use crate::audio::ResourceId;
use crate::config::{MissingAudioPolicy, PlaybackConfig};
use lesson_common::PlayerState;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Generation number identifying one loaded lesson
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LessonToken(u64);

impl LessonToken {
    pub fn first() -> Self {
        LessonToken(1)
    }

    pub fn next(self) -> Self {
        LessonToken(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LessonToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lesson#{}", self.0)
    }
}

/// Sequencing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerPolicy {
    pub missing_audio: MissingAudioPolicy,
    /// Dwell time for audio-less segments without a duration hint
    pub dwell_fallback: Duration,
    /// Delay between load and auto-start
    pub startup_grace: Duration,
}

impl Default for SequencerPolicy {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for SequencerPolicy {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            missing_audio: config.missing_audio,
            dwell_fallback: config.dwell_fallback(),
            startup_grace: config.startup_grace(),
        }
    }
}

/// What the sequencer needs to know about one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentCue {
    /// Playable audio, if the segment has any
    pub resource: Option<ResourceId>,
    /// Duration hint, used as the dwell time when there is no audio
    pub dwell: Option<Duration>,
}

/// What the sequencer may observe of the playback device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceView {
    /// Identity of the attached source
    pub source: Option<ResourceId>,
    /// The attached source played to its end
    pub at_end: bool,
}

impl DeviceView {
    /// Device holding `source`, not at its end
    pub fn holding(source: Option<ResourceId>) -> Self {
        Self {
            source,
            at_end: false,
        }
    }

    /// Device holding `source`, which played to its end
    pub fn finished(source: ResourceId) -> Self {
        Self {
            source: Some(source),
            at_end: true,
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new lesson has been staged
    Load {
        lesson: LessonToken,
        cues: Vec<SegmentCue>,
    },
    /// The host cleared the active lesson
    Clear,
    /// Startup grace period elapsed
    AutoStart { lesson: LessonToken },
    /// The device finished playing a resource
    EndOfStream {
        lesson: LessonToken,
        resource: ResourceId,
    },
    /// A missing-audio dwell elapsed
    DwellElapsed { lesson: LessonToken, epoch: u64 },
    /// The device refused to play
    PlayRejected {
        lesson: LessonToken,
        resource: Option<ResourceId>,
    },
    /// The device cannot decode a resource at all
    SourceUnplayable {
        lesson: LessonToken,
        resource: ResourceId,
    },
    Play,
    Pause,
    Toggle,
    /// Manual advance by one segment
    Next,
}

/// Outputs of the state machine, performed by the runtime in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Detach the device listeners registered for a lesson
    DetachListeners { lesson: LessonToken },
    /// Stop the device and detach its source
    StopDevice,
    /// Release every playable resource of a lesson
    ReleaseResources { lesson: LessonToken },
    /// Make the staged lesson current and start its image preloads
    ActivateLesson { lesson: LessonToken },
    /// Register device listeners tagged with a lesson
    AttachListeners { lesson: LessonToken },
    /// Notify the narration of a segment (`None` = no lesson)
    EmitNarration { index: Option<usize> },
    /// Best-effort re-trigger of a segment's image preload
    EnsureImage { index: usize },
    /// Set the device source to a segment's resource, from its beginning
    /// (or detach the source when the segment has no audio)
    AttachSource { index: usize },
    /// Start or resume device playback
    Play { index: usize },
    /// Pause the device, keeping position and source
    Pause,
    ScheduleAutoStart { lesson: LessonToken, after: Duration },
    ScheduleDwell {
        lesson: LessonToken,
        index: usize,
        epoch: u64,
        after: Duration,
    },
    StateChanged { old: PlayerState, new: PlayerState },
    SegmentCompleted { index: usize },
    LessonCompleted,
}

/// Sequencer state: active lesson, segment index and play state
#[derive(Debug, Clone)]
pub struct Sequencer {
    policy: SequencerPolicy,
    lesson: Option<LessonToken>,
    cues: Vec<SegmentCue>,
    state: PlayerState,
    index: usize,
    dwell_epoch: u64,
}

impl Sequencer {
    pub fn new(policy: SequencerPolicy) -> Self {
        Self {
            policy,
            lesson: None,
            cues: Vec::new(),
            state: PlayerState::Idle,
            index: 0,
            dwell_epoch: 0,
        }
    }

    pub fn policy(&self) -> &SequencerPolicy {
        &self.policy
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Current segment index (meaningful only while a lesson is active)
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lesson(&self) -> Option<LessonToken> {
        self.lesson
    }

    pub fn segment_count(&self) -> usize {
        self.cues.len()
    }

    pub fn cue(&self, index: usize) -> Option<&SegmentCue> {
        self.cues.get(index)
    }

    /// Apply an event, given the current view of the device
    pub fn handle(&mut self, event: Event, device: DeviceView) -> Vec<Effect> {
        match event {
            Event::Load { lesson, cues } => self.load(lesson, cues),
            Event::Clear => self.clear(),
            Event::AutoStart { lesson } => {
                if !self.is_current(lesson) || self.state != PlayerState::Ready {
                    debug!("Ignoring auto-start for {} in state {}", lesson, self.state);
                    return Vec::new();
                }
                self.start()
            }
            Event::EndOfStream { lesson, resource } => {
                let active = self.cues.get(self.index).and_then(|c| c.resource);
                if !self.is_current(lesson)
                    || self.state != PlayerState::Playing
                    || active != Some(resource)
                {
                    debug!("Ignoring stale end-of-stream for {} ({})", resource, lesson);
                    return Vec::new();
                }
                self.advance()
            }
            Event::DwellElapsed { lesson, epoch } => {
                if !self.is_current(lesson)
                    || self.state != PlayerState::Playing
                    || epoch != self.dwell_epoch
                {
                    debug!("Ignoring stale dwell timer (epoch {}, {})", epoch, lesson);
                    return Vec::new();
                }
                self.advance()
            }
            Event::PlayRejected { lesson, resource } => {
                let active = self.cues.get(self.index).and_then(|c| c.resource);
                if !self.is_current(lesson)
                    || self.state != PlayerState::Playing
                    || active != resource
                {
                    return Vec::new();
                }
                vec![self.transition(PlayerState::Paused)]
            }
            Event::SourceUnplayable { lesson, resource } => self.drop_source(lesson, resource),
            Event::Play => self.play(device),
            Event::Pause => self.pause(),
            Event::Toggle => {
                if self.state == PlayerState::Playing {
                    self.pause()
                } else {
                    self.play(device)
                }
            }
            Event::Next => self.next(),
        }
    }

    fn is_current(&self, lesson: LessonToken) -> bool {
        self.lesson == Some(lesson)
    }

    fn last_index(&self) -> usize {
        self.cues.len().saturating_sub(1)
    }

    fn transition(&mut self, new: PlayerState) -> Effect {
        let old = self.state;
        self.state = new;
        Effect::StateChanged { old, new }
    }

    /// Invalidate any scheduled dwell timer
    fn cancel_dwell(&mut self) {
        self.dwell_epoch += 1;
    }

    /// Detach, stop and release the active lesson, leaving `Idle`
    fn teardown(&mut self) -> Vec<Effect> {
        let Some(old) = self.lesson.take() else {
            return Vec::new();
        };
        self.cancel_dwell();
        self.cues.clear();
        self.index = 0;

        let mut effects = vec![
            Effect::DetachListeners { lesson: old },
            Effect::StopDevice,
            Effect::ReleaseResources { lesson: old },
        ];
        if self.state != PlayerState::Idle {
            effects.push(self.transition(PlayerState::Idle));
        }
        effects
    }

    fn load(&mut self, lesson: LessonToken, cues: Vec<SegmentCue>) -> Vec<Effect> {
        if cues.is_empty() {
            return self.clear();
        }

        let mut effects = self.teardown();
        self.lesson = Some(lesson);
        self.cues = cues;
        self.index = 0;

        effects.push(Effect::ActivateLesson { lesson });
        effects.push(Effect::AttachListeners { lesson });
        effects.push(self.transition(PlayerState::Ready));
        effects.push(Effect::EmitNarration { index: Some(0) });
        effects.push(Effect::ScheduleAutoStart {
            lesson,
            after: self.policy.startup_grace,
        });
        effects
    }

    fn clear(&mut self) -> Vec<Effect> {
        let mut effects = self.teardown();
        if !effects.is_empty() {
            effects.push(Effect::EmitNarration { index: None });
        }
        effects
    }

    /// Ready → Playing at segment 0
    fn start(&mut self) -> Vec<Effect> {
        let mut effects = vec![self.transition(PlayerState::Playing)];
        effects.extend(self.begin_segment(self.index));
        effects
    }

    /// Attach a segment from its beginning and get it going
    fn begin_segment(&mut self, index: usize) -> Vec<Effect> {
        let mut effects = vec![Effect::AttachSource { index }];
        match self.cues.get(index).copied() {
            Some(SegmentCue {
                resource: Some(_), ..
            }) => effects.push(Effect::Play { index }),
            Some(cue) => effects.extend(self.schedule_dwell(index, cue.dwell)),
            None => {}
        }
        effects
    }

    fn schedule_dwell(&mut self, index: usize, dwell: Option<Duration>) -> Option<Effect> {
        let lesson = self.lesson?;
        match self.policy.missing_audio {
            MissingAudioPolicy::Dwell => {
                self.cancel_dwell();
                Some(Effect::ScheduleDwell {
                    lesson,
                    index,
                    epoch: self.dwell_epoch,
                    after: dwell.unwrap_or(self.policy.dwell_fallback),
                })
            }
            MissingAudioPolicy::Hold => {
                debug!("Holding on segment {} until a manual advance", index);
                None
            }
        }
    }

    /// Complete the current segment and move to the next one (or end)
    fn advance(&mut self) -> Vec<Effect> {
        self.cancel_dwell();
        let mut effects = vec![Effect::SegmentCompleted { index: self.index }];

        if self.index < self.last_index() {
            self.index += 1;
            if self.state != PlayerState::Playing {
                effects.push(self.transition(PlayerState::Playing));
            }
            effects.push(Effect::EmitNarration {
                index: Some(self.index),
            });
            effects.push(Effect::EnsureImage { index: self.index });
            effects.extend(self.begin_segment(self.index));
        } else {
            // Narration of the final segment stays visible
            effects.push(self.transition(PlayerState::Ended));
            effects.push(Effect::LessonCompleted);
        }
        effects
    }

    fn play(&mut self, device: DeviceView) -> Vec<Effect> {
        match self.state {
            PlayerState::Idle | PlayerState::Playing => Vec::new(),
            PlayerState::Ready => self.start(),
            PlayerState::Paused => {
                let cue = self.cues.get(self.index).copied().unwrap_or_default();
                if device.at_end && cue.resource.is_some() && device.source == cue.resource {
                    // The clip ended before the pause took effect
                    debug!("Segment {} finished while pausing; advancing", self.index);
                    return self.advance();
                }

                let mut effects = vec![self.transition(PlayerState::Playing)];
                match cue.resource {
                    Some(resource) if device.source == Some(resource) => {
                        // Same resource still attached: resume in place
                        effects.push(Effect::Play { index: self.index });
                    }
                    Some(_) => {
                        debug!("Device source drifted; reattaching segment {}", self.index);
                        effects.push(Effect::AttachSource { index: self.index });
                        effects.push(Effect::Play { index: self.index });
                    }
                    None => effects.extend(self.schedule_dwell(self.index, cue.dwell)),
                }
                effects
            }
            PlayerState::Ended => {
                self.index = 0;
                let mut effects = vec![
                    self.transition(PlayerState::Playing),
                    Effect::EmitNarration { index: Some(0) },
                    Effect::EnsureImage { index: 0 },
                ];
                effects.extend(self.begin_segment(0));
                effects
            }
        }
    }

    fn pause(&mut self) -> Vec<Effect> {
        if self.state != PlayerState::Playing {
            return Vec::new();
        }
        self.cancel_dwell();
        vec![Effect::Pause, self.transition(PlayerState::Paused)]
    }

    /// Forget a resource the device cannot decode; its segment falls under
    /// the missing-audio policy from now on
    fn drop_source(&mut self, lesson: LessonToken, resource: ResourceId) -> Vec<Effect> {
        if !self.is_current(lesson) {
            return Vec::new();
        }
        let Some(index) = self.cues.iter().position(|c| c.resource == Some(resource)) else {
            return Vec::new();
        };
        self.cues[index].resource = None;
        debug!("Segment {} audio is unplayable; treating it as missing", index);

        if index != self.index {
            return Vec::new();
        }
        // Detaches the device, since the cue no longer has audio
        let mut effects = vec![Effect::AttachSource { index }];
        if self.state == PlayerState::Playing {
            let dwell = self.cues[index].dwell;
            effects.extend(self.schedule_dwell(index, dwell));
        }
        effects
    }

    fn next(&mut self) -> Vec<Effect> {
        match self.state {
            PlayerState::Ready | PlayerState::Playing | PlayerState::Paused => {
                let mut effects = Vec::new();
                if self.state == PlayerState::Playing && self.index == self.last_index() {
                    effects.push(Effect::Pause);
                }
                effects.extend(self.advance());
                effects
            }
            PlayerState::Idle | PlayerState::Ended => Vec::new(),
        }
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(SequencerPolicy::default())
    }
}
