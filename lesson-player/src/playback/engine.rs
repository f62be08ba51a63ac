//! Lesson player runtime
//!
//! Single logical event queue around the pure [`Sequencer`]. Host commands
//! (via [`PlayerHandle`]) and internally posted signals (end-of-stream, timer
//! expiry, image settlement) arrive on one unbounded mpsc channel and are
//! processed strictly one at a time; the effects each event yields are
//! performed in order before the next message is taken.
//!
//! The playback device is owned exclusively by the runtime. Device futures
//! need not be `Send`, so the player is driven on the task that owns it
//! (`run`, or the `run_until_stalled`/`run_for` drivers in tests).

use super::arena::LessonArena;
use super::sequencer::{DeviceView, Effect, Event, LessonToken, Sequencer, SequencerPolicy};
use crate::audio::ResourceId;
use crate::config::PlayerConfig;
use crate::device::PlaybackDevice;
use crate::error::{Error, PlaybackRejected, Result};
use crate::narration::NarrationNotifier;
use crate::preload::{HttpImageFetcher, ImageSettlement, Preloader, SettlementSink};
use chrono::Utc;
use lesson_common::events::ImageStatus;
use lesson_common::{EventBus, Lesson, LessonEvent, PlayerState, SegmentId};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Host requests
#[derive(Debug)]
pub enum Command {
    Load(Lesson),
    Clear,
    Play,
    Pause,
    Toggle,
    Next,
    Snapshot(oneshot::Sender<PlayerSnapshot>),
    Shutdown,
}

/// Signals posted by device listeners, timers and preload tasks
#[derive(Debug)]
enum Signal {
    AutoStart { lesson: LessonToken },
    EndOfStream { lesson: LessonToken, resource: ResourceId },
    DwellElapsed { lesson: LessonToken, epoch: u64 },
    ImageSettled(ImageSettlement),
}

#[derive(Debug)]
enum Message {
    Host(Command),
    Internal(Signal),
}

/// Point-in-time view of the player for host UIs
#[derive(Debug, Clone, Serialize)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    /// Visible segment index (`None` without a lesson)
    pub index: Option<usize>,
    pub lesson_id: Option<Uuid>,
    pub topic: Option<String>,
    pub narration: Option<String>,
    /// Image status per segment, in lesson order
    pub images: Vec<(SegmentId, ImageStatus)>,
}

/// Cloneable command handle
///
/// Every method fails with [`Error::Shutdown`] once the player has stopped.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl PlayerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Message::Host(command))
            .map_err(|_| Error::Shutdown)
    }

    /// Replace the active lesson
    ///
    /// The lesson is validated here so a bad lesson is reported to the caller
    /// and never disturbs the current one.
    pub fn load(&self, lesson: Lesson) -> Result<()> {
        lesson.validate()?;
        self.send(Command::Load(lesson))
    }

    pub fn clear(&self) -> Result<()> {
        self.send(Command::Clear)
    }

    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn toggle(&self) -> Result<()> {
        self.send(Command::Toggle)
    }

    pub fn next(&self) -> Result<()> {
        self.send(Command::Next)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

/// Why a device refused to play, as reported to the sequencer
struct Rejection {
    resource: Option<ResourceId>,
    reason: PlaybackRejected,
}

/// Segmented playback runtime
pub struct LessonPlayer<D: PlaybackDevice> {
    sequencer: Sequencer,
    device: D,
    /// Arena of the active lesson
    current: Option<LessonArena>,
    /// Arena staged by a load, waiting for the sequencer to activate it
    staged: Option<LessonArena>,
    next_token: LessonToken,
    preloader: Preloader,
    notifier: NarrationNotifier,
    event_bus: Arc<EventBus>,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    running: bool,
}

impl<D: PlaybackDevice> LessonPlayer<D> {
    pub fn new(
        device: D,
        preloader: Preloader,
        policy: SequencerPolicy,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sequencer: Sequencer::new(policy),
            device,
            current: None,
            staged: None,
            next_token: LessonToken::first(),
            preloader,
            notifier: NarrationNotifier::new(Arc::clone(&event_bus)),
            event_bus,
            tx,
            rx,
            running: true,
        }
    }

    /// Build a player from configuration, with an HTTP image fetcher
    pub fn from_config(device: D, config: &PlayerConfig) -> Result<Self> {
        let preloader = if config.preload.enabled {
            Preloader::new(Arc::new(HttpImageFetcher::new(&config.preload.user_agent)?))
        } else {
            info!("Image preloading disabled");
            Preloader::disabled()
        };
        let event_bus = Arc::new(EventBus::new(config.events.bus_capacity));
        Ok(Self::new(
            device,
            preloader,
            SequencerPolicy::from(&config.playback),
            event_bus,
        ))
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Register the host's narration callback
    pub fn set_narration_listener<F>(&mut self, listener: F)
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        self.notifier.set_listener(Box::new(listener));
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LessonEvent> {
        self.event_bus.subscribe()
    }

    pub fn state(&self) -> PlayerState {
        self.sequencer.state()
    }

    /// Visible segment index (`None` without a lesson)
    pub fn index(&self) -> Option<usize> {
        self.current.as_ref().map(|_| self.sequencer.index())
    }

    pub fn narration(&self) -> Option<&str> {
        self.notifier.current()
    }

    pub fn lesson(&self) -> Option<&Lesson> {
        self.current.as_ref().map(LessonArena::lesson)
    }

    pub fn arena(&self) -> Option<&LessonArena> {
        self.current.as_ref()
    }

    pub fn image_status(&self, segment_id: SegmentId) -> ImageStatus {
        self.current
            .as_ref()
            .map(|arena| arena.image_status(segment_id))
            .unwrap_or(ImageStatus::NoImage)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let arena = self.current.as_ref();
        PlayerSnapshot {
            state: self.sequencer.state(),
            index: self.index(),
            lesson_id: arena.map(|a| a.lesson().id),
            topic: arena.map(|a| a.lesson().topic.clone()),
            narration: self.notifier.current().map(str::to_string),
            images: arena
                .map(|a| {
                    a.lesson()
                        .segments
                        .iter()
                        .map(|s| (s.id, a.image_status(s.id)))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Process messages until shutdown
    pub async fn run(mut self) {
        info!("Lesson player started");
        while let Some(message) = self.rx.recv().await {
            if !self.process(message).await {
                break;
            }
        }
        info!("Lesson player stopped");
    }

    /// Process everything that is queued, letting spawned tasks run in
    /// between, until the queue stays empty. Returns false after shutdown.
    pub async fn run_until_stalled(&mut self) -> bool {
        let mut idle_rounds = 0;
        while self.running && idle_rounds < 3 {
            match self.rx.try_recv() {
                Ok(message) => {
                    idle_rounds = 0;
                    self.process(message).await;
                }
                Err(_) => {
                    idle_rounds += 1;
                    tokio::task::yield_now().await;
                }
            }
        }
        self.running
    }

    /// Process messages as they arrive for `window`. Returns false after shutdown.
    pub async fn run_for(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        while self.running {
            let message = tokio::select! {
                message = self.rx.recv() => message,
                _ = tokio::time::sleep_until(deadline) => return true,
            };
            match message {
                Some(message) => {
                    self.process(message).await;
                }
                None => break,
            }
        }
        self.running
    }

    /// Handle one message. Returns false once the player has shut down.
    async fn process(&mut self, message: Message) -> bool {
        if !self.running {
            return false;
        }

        match message {
            Message::Host(command) => match command {
                Command::Load(lesson) => self.load(lesson).await,
                Command::Clear => self.dispatch(Event::Clear).await,
                Command::Play => self.dispatch(Event::Play).await,
                Command::Pause => self.dispatch(Event::Pause).await,
                Command::Toggle => self.dispatch(Event::Toggle).await,
                Command::Next => self.dispatch(Event::Next).await,
                Command::Snapshot(reply) => {
                    // Requester may have gone away
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown => {
                    info!("Shutdown requested");
                    self.dispatch(Event::Clear).await;
                    if let Some(staged) = self.staged.take() {
                        staged.teardown();
                    }
                    self.running = false;
                }
            },
            Message::Internal(signal) => match signal {
                Signal::AutoStart { lesson } => self.dispatch(Event::AutoStart { lesson }).await,
                Signal::EndOfStream { lesson, resource } => {
                    self.dispatch(Event::EndOfStream { lesson, resource }).await
                }
                Signal::DwellElapsed { lesson, epoch } => {
                    self.dispatch(Event::DwellElapsed { lesson, epoch }).await
                }
                Signal::ImageSettled(settlement) => self.settle_image(settlement),
            },
        }

        self.running
    }

    async fn load(&mut self, lesson: Lesson) {
        if let Err(e) = lesson.validate() {
            warn!("Rejected lesson '{}': {}", lesson.topic, e);
            return;
        }

        let token = self.next_token;
        self.next_token = token.next();

        info!(
            "Loading lesson '{}' ({} segments) as {}",
            lesson.topic,
            lesson.len(),
            token
        );

        let arena = LessonArena::stage(token, lesson);
        let cues = arena.cues();
        if let Some(abandoned) = self.staged.replace(arena) {
            abandoned.teardown();
        }

        self.dispatch(Event::Load { lesson: token, cues }).await;
    }

    /// Run an event through the sequencer and perform its effects, then any
    /// follow-up events the effects produced
    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let device = DeviceView {
                source: self.device.source(),
                at_end: self.device.is_at_end(),
            };
            let effects = self.sequencer.handle(event, device);

            for effect in effects {
                if let Some(rejection) = self.apply(effect).await {
                    let Some(lesson) = self.sequencer.lesson() else {
                        continue;
                    };
                    let follow_up = match &rejection.reason {
                        PlaybackRejected::Unplayable(resource, _) => Event::SourceUnplayable {
                            lesson,
                            resource: *resource,
                        },
                        _ => Event::PlayRejected {
                            lesson,
                            resource: rejection.resource,
                        },
                    };
                    // Load and play of one source may both refuse
                    if queue.contains(&follow_up) {
                        continue;
                    }
                    self.report_rejection(&rejection);
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn report_rejection(&self, rejection: &Rejection) {
        let Some(arena) = &self.current else {
            return;
        };
        let lesson_id = arena.lesson().id;
        let index = self.sequencer.index();

        match &rejection.reason {
            PlaybackRejected::Unplayable(_, reason) => {
                warn!("Segment {} audio is unplayable: {}", index, reason);
                if let Some(segment) = arena.lesson().segment(index) {
                    self.event_bus.emit_lossy(LessonEvent::AudioUnavailable {
                        lesson_id,
                        segment_id: segment.id,
                        reason: reason.clone(),
                        timestamp: Utc::now(),
                    });
                }
            }
            reason => {
                warn!("Playback rejected: {}", reason);
                self.event_bus.emit_lossy(LessonEvent::PlaybackRejected {
                    lesson_id,
                    segment_index: index,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<Rejection> {
        trace!(?effect, "Applying effect");

        match effect {
            Effect::DetachListeners { lesson } => {
                debug!("Detaching device listeners of {}", lesson);
                self.device.clear_end_of_stream();
            }

            Effect::StopDevice => {
                self.device.pause();
                self.device.clear_source();
            }

            Effect::ReleaseResources { lesson } => {
                match self.current.take() {
                    Some(arena) if arena.token() == lesson => {
                        let lesson_id = arena.lesson().id;
                        let released = arena.teardown();
                        info!("Released {} resources of {}", released, lesson);
                        self.event_bus.emit_lossy(LessonEvent::LessonCleared {
                            lesson_id,
                            released,
                            timestamp: Utc::now(),
                        });
                    }
                    other => self.current = other,
                }
            }

            Effect::ActivateLesson { lesson } => {
                let Some(arena) = self.staged.take() else {
                    warn!("No staged arena for {}", lesson);
                    return None;
                };
                if arena.token() != lesson {
                    warn!("Staged arena {} does not match {}", arena.token(), lesson);
                    arena.teardown();
                    return None;
                }
                self.activate(arena);
            }

            Effect::AttachListeners { lesson } => {
                let tx = self.tx.clone();
                self.device.on_end_of_stream(Arc::new(move |resource| {
                    let _ = tx.send(Message::Internal(Signal::EndOfStream { lesson, resource }));
                }));
            }

            Effect::EmitNarration { index } => {
                let visible = self.current.as_ref().zip(index).and_then(|(arena, i)| {
                    arena
                        .lesson()
                        .segment(i)
                        .map(|segment| (arena.lesson().id, i, segment.narration.clone()))
                });
                match visible {
                    Some((lesson_id, i, text)) => {
                        self.notifier.notify(Some(lesson_id), Some(i), Some(&text))
                    }
                    None => self.notifier.notify(None, None, None),
                }
            }

            Effect::EnsureImage { index } => {
                let sink = self.settlement_sink();
                if let Some(arena) = self.current.as_mut() {
                    if arena.ensure_image(index, &self.preloader, &sink) {
                        debug!("Re-triggered image preload for segment {}", index);
                    }
                }
            }

            Effect::AttachSource { index } => {
                let Some(arena) = self.current.as_ref() else {
                    return None;
                };
                // Sources found unplayable stay detached
                let playable = self.sequencer.cue(index).and_then(|c| c.resource).is_some();
                let Some(source) = arena.source(index).filter(|_| playable) else {
                    self.device.clear_source();
                    return None;
                };

                let resource = source.id();
                let mime = source.mime();
                let lesson_id = arena.lesson().id;
                let segment_id = arena.lesson().segments[index].id;

                self.device.set_source(source);
                if let Err(reason) = self.device.load() {
                    return Some(Rejection {
                        resource: Some(resource),
                        reason,
                    });
                }

                debug!("Segment {} attached ({}, {})", index, resource, mime);
                self.event_bus.emit_lossy(LessonEvent::SegmentStarted {
                    lesson_id,
                    segment_index: index,
                    segment_id,
                    mime_type: mime.to_string(),
                    timestamp: Utc::now(),
                });
            }

            Effect::Play { index } => {
                if let Err(reason) = self.device.play().await {
                    return Some(Rejection {
                        resource: self.device.source(),
                        reason,
                    });
                }
                trace!("Playing segment {}", index);
            }

            Effect::Pause => self.device.pause(),

            Effect::ScheduleAutoStart { lesson, after } => {
                self.schedule(after, Signal::AutoStart { lesson });
            }

            Effect::ScheduleDwell {
                lesson,
                index,
                epoch,
                after,
            } => {
                debug!("Segment {} has no audio; dwelling {:?}", index, after);
                self.schedule(after, Signal::DwellElapsed { lesson, epoch });
            }

            Effect::StateChanged { old, new } => {
                info!("Playback state: {} -> {}", old, new);
                self.event_bus.emit_lossy(LessonEvent::PlaybackStateChanged {
                    old_state: old,
                    new_state: new,
                    timestamp: Utc::now(),
                });
            }

            Effect::SegmentCompleted { index } => {
                if let Some(arena) = &self.current {
                    if let Some(segment) = arena.lesson().segment(index) {
                        self.event_bus.emit_lossy(LessonEvent::SegmentCompleted {
                            lesson_id: arena.lesson().id,
                            segment_index: index,
                            segment_id: segment.id,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }

            Effect::LessonCompleted => {
                if let Some(arena) = &self.current {
                    info!("Lesson '{}' completed", arena.lesson().topic);
                    self.event_bus.emit_lossy(LessonEvent::LessonCompleted {
                        lesson_id: arena.lesson().id,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        None
    }

    /// Make a staged arena current: announce it and start image preloads
    fn activate(&mut self, mut arena: LessonArena) {
        let lesson_id = arena.lesson().id;

        self.event_bus.emit_lossy(LessonEvent::LessonLoaded {
            lesson_id,
            topic: arena.lesson().topic.clone(),
            segment_count: arena.lesson().len(),
            timestamp: Utc::now(),
        });

        for gap in arena.gaps() {
            self.event_bus.emit_lossy(LessonEvent::AudioUnavailable {
                lesson_id,
                segment_id: gap.segment_id,
                reason: gap.reason.clone(),
                timestamp: Utc::now(),
            });
        }

        let sink = self.settlement_sink();
        let started = arena.preload_images(&self.preloader, &sink);
        debug!("Started {} image preloads for {}", started, arena.token());

        self.current = Some(arena);
    }

    fn settlement_sink(&self) -> SettlementSink {
        let tx = self.tx.clone();
        Arc::new(move |settlement| {
            let _ = tx.send(Message::Internal(Signal::ImageSettled(settlement)));
        })
    }

    /// Post a signal to the queue after a delay (immediately for zero)
    fn schedule(&self, after: Duration, signal: Signal) {
        let tx = self.tx.clone();
        if after.is_zero() {
            let _ = tx.send(Message::Internal(signal));
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Message::Internal(signal));
        });
    }

    fn settle_image(&mut self, settlement: ImageSettlement) {
        let Some(arena) = self.current.as_mut().filter(|a| a.token() == settlement.lesson) else {
            debug!(
                "Ignoring image settlement for segment {} of stale {}",
                settlement.segment_id, settlement.lesson
            );
            return;
        };

        let lesson_id = arena.lesson().id;
        let segment_id = settlement.segment_id;
        if !arena.images_mut().record(segment_id, settlement.outcome.is_ok()) {
            return;
        }

        match settlement.outcome {
            Ok(()) => {
                debug!("Image for segment {} loaded", segment_id);
                self.event_bus.emit_lossy(LessonEvent::ImagePreloaded {
                    lesson_id,
                    segment_id,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!("Image for segment {} failed: {}", segment_id, e);
                self.event_bus.emit_lossy(LessonEvent::ImagePreloadFailed {
                    lesson_id,
                    segment_id,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }
}
