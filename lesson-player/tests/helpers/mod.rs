//! Test helper modules for lesson-player integration tests
//!
//! Provides reusable test infrastructure components:
//! - MockDevice / DeviceProbe: scriptable playback device with a call timeline
//! - MockFetcher: image fetcher with per-URL outcomes
//! - Fixtures: WAV/MP3 payloads and lesson builders

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hound::{SampleFormat, WavSpec, WavWriter};
use lesson_common::{EncodedAudio, EventBus, Lesson, LessonEvent, Segment};
use lesson_player::audio::{AudioMime, ResourceId, ResourceRef};
use lesson_player::device::{EndOfStreamListener, PlaybackDevice};
use lesson_player::error::{ImageLoadError, PlaybackRejected};
use lesson_player::playback::{LessonPlayer, SequencerPolicy};
use lesson_player::preload::{ImageFetcher, Preloader};
use lesson_player::MissingAudioPolicy;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Mock playback device
// ---------------------------------------------------------------------------

/// Everything observable on the mock device, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    SetSource(ResourceId),
    ClearSource,
    Load(ResourceId),
    Play(ResourceId),
    Pause,
    AttachListener,
    DetachListener,
    /// Narration notified to the host (recorded here to check ordering)
    Narration(Option<String>),
}

#[derive(Default)]
struct DeviceState {
    calls: Vec<DeviceCall>,
    source: Option<ResourceRef>,
    playing: bool,
    at_end: bool,
    /// Simulated position, in milliseconds
    position_ms: u64,
    listener: Option<EndOfStreamListener>,
    reject_next_play: Option<PlaybackRejected>,
}

/// Playback device driven entirely by the test
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

/// Test-side view of a [`MockDevice`]
#[derive(Clone)]
pub struct DeviceProbe {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> (Self, DeviceProbe) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            DeviceProbe { state },
        )
    }
}

#[async_trait(?Send)]
impl PlaybackDevice for MockDevice {
    fn set_source(&mut self, source: ResourceRef) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DeviceCall::SetSource(source.id()));
        state.source = Some(source);
        state.playing = false;
        state.at_end = false;
        state.position_ms = 0;
    }

    fn clear_source(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DeviceCall::ClearSource);
        state.source = None;
        state.playing = false;
        state.at_end = false;
        state.position_ms = 0;
    }

    fn source(&self) -> Option<ResourceId> {
        self.state.lock().unwrap().source.as_ref().map(ResourceRef::id)
    }

    fn load(&mut self) -> Result<(), PlaybackRejected> {
        let mut state = self.state.lock().unwrap();
        let source = state.source.clone().ok_or(PlaybackRejected::NoSource)?;
        source.bytes()?;
        state.calls.push(DeviceCall::Load(source.id()));
        state.position_ms = 0;
        state.at_end = false;
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackRejected> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.reject_next_play.take() {
            return Err(reason);
        }
        let source = state.source.clone().ok_or(PlaybackRejected::NoSource)?;
        source.bytes()?;
        if state.at_end {
            state.position_ms = 0;
            state.at_end = false;
        }
        state.playing = true;
        state.calls.push(DeviceCall::Play(source.id()));
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.playing = false;
        state.calls.push(DeviceCall::Pause);
    }

    fn is_at_end(&self) -> bool {
        self.state.lock().unwrap().at_end
    }

    fn on_end_of_stream(&mut self, listener: EndOfStreamListener) {
        let mut state = self.state.lock().unwrap();
        state.listener = Some(listener);
        state.calls.push(DeviceCall::AttachListener);
    }

    fn clear_end_of_stream(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.listener = None;
        state.calls.push(DeviceCall::DetachListener);
    }
}

impl DeviceProbe {
    /// Play the attached source to its end and signal end-of-stream
    ///
    /// Returns false when nothing is playing or no listener is attached.
    pub fn finish(&self) -> bool {
        let (listener, resource) = {
            let mut state = self.state.lock().unwrap();
            if !state.playing {
                return false;
            }
            let Some(resource) = state.source.as_ref().map(ResourceRef::id) else {
                return false;
            };
            state.playing = false;
            state.at_end = true;
            (state.listener.clone(), resource)
        };
        match listener {
            Some(listener) => {
                listener(resource);
                true
            }
            None => false,
        }
    }

    /// Signal end-of-stream for an arbitrary resource (stale delivery)
    pub fn fire_end_of_stream(&self, resource: ResourceId) -> bool {
        let listener = self.state.lock().unwrap().listener.clone();
        match listener {
            Some(listener) => {
                listener(resource);
                true
            }
            None => false,
        }
    }

    /// Currently registered listener (to simulate callbacks that outlive it)
    pub fn listener(&self) -> Option<EndOfStreamListener> {
        self.state.lock().unwrap().listener.clone()
    }

    pub fn reject_next_play(&self, reason: PlaybackRejected) {
        self.state.lock().unwrap().reject_next_play = Some(reason);
    }

    pub fn source(&self) -> Option<ResourceId> {
        self.state.lock().unwrap().source.as_ref().map(ResourceRef::id)
    }

    pub fn source_ref(&self) -> Option<ResourceRef> {
        self.state.lock().unwrap().source.clone()
    }

    pub fn mime(&self) -> Option<AudioMime> {
        self.state.lock().unwrap().source.as_ref().map(ResourceRef::mime)
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn has_listener(&self) -> bool {
        self.state.lock().unwrap().listener.is_some()
    }

    pub fn set_position_ms(&self, position: u64) {
        self.state.lock().unwrap().position_ms = position;
    }

    pub fn position_ms(&self) -> u64 {
        self.state.lock().unwrap().position_ms
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn note_narration(&self, text: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(DeviceCall::Narration(text.map(str::to_string)));
    }

    /// Narrations notified so far, in order
    pub fn narrations(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Narration(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Mock image fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum FetchBehavior {
    Load,
    Fail(String),
    /// Settle successfully after a delay
    Delay(Duration),
    /// Never settle
    Hang,
}

#[derive(Default)]
pub struct MockFetcher {
    outcomes: HashMap<String, FetchBehavior>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, behavior: FetchBehavior) -> Self {
        self.outcomes.insert(url.to_string(), behavior);
        self
    }

    /// Shared log of requested URLs
    pub fn fetched(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.fetched)
    }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<(), ImageLoadError> {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.outcomes.get(url).cloned() {
            Some(FetchBehavior::Load) => Ok(()),
            Some(FetchBehavior::Fail(reason)) => Err(ImageLoadError::new(url, reason)),
            Some(FetchBehavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(FetchBehavior::Hang) => std::future::pending().await,
            None => Err(ImageLoadError::new(url, "HTTP 404 Not Found")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Valid 16-bit mono WAV file
pub fn wav_bytes(sample_rate: u32, frames: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Bytes starting with an MPEG-1 Layer III frame header
pub fn mp3_bytes() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xFB, 0x90, 0x64];
    bytes.extend(std::iter::repeat(0u8).take(413));
    bytes
}

/// Transport-encode raw bytes the way the lesson service does
pub fn encode(bytes: &[u8]) -> EncodedAudio {
    EncodedAudio::Single(STANDARD.encode(bytes))
}

/// The two-segment "Clouds" lesson: WAV intro with an image, MP3 detail without
pub fn clouds_lesson() -> Lesson {
    Lesson::new(
        "Clouds",
        vec![
            Segment::new(1, "Intro")
                .with_audio(encode(&wav_bytes(8000, 4000)))
                .with_image("a.jpg"),
            Segment::new(2, "Detail").with_audio(encode(&mp3_bytes())),
        ],
    )
}

/// Lesson of `n` WAV segments narrated "Segment 1", "Segment 2", ...
pub fn wav_lesson(topic: &str, n: usize) -> Lesson {
    let segments = (1..=n)
        .map(|i| {
            Segment::new(i as i64, format!("Segment {}", i))
                .with_audio(encode(&wav_bytes(8000, 4000)))
        })
        .collect();
    Lesson::new(topic, segments)
}

/// Sequencing policy without a startup grace period
pub fn immediate_policy(missing_audio: MissingAudioPolicy) -> SequencerPolicy {
    SequencerPolicy {
        missing_audio,
        dwell_fallback: Duration::from_secs(5),
        startup_grace: Duration::ZERO,
    }
}

/// Player over a mock device, recording narration into the device timeline
pub fn mock_player(
    fetcher: MockFetcher,
    policy: SequencerPolicy,
) -> (LessonPlayer<MockDevice>, DeviceProbe) {
    let (device, probe) = MockDevice::new();
    let mut player = LessonPlayer::new(
        device,
        Preloader::new(Arc::new(fetcher)),
        policy,
        Arc::new(EventBus::new(256)),
    );
    let timeline = probe.clone();
    player.set_narration_listener(move |text| timeline.note_narration(text));
    (player, probe)
}

/// Drain every event currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<LessonEvent>) -> Vec<LessonEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
