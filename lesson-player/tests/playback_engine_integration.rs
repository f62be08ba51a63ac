//! Lesson player integration tests over a mock device
//!
//! Drives the full runtime (arena, preloader, sequencer, notifier) through a
//! scripted playback device and checks what the host would observe.

mod helpers;

use helpers::*;
use lesson_common::events::ImageStatus;
use lesson_common::{Lesson, LessonEvent, PlayerState, Segment};
use lesson_player::audio::AudioMime;
use lesson_player::error::{Error, PlaybackRejected};
use lesson_player::MissingAudioPolicy;
use std::time::Duration;

fn state_changes(events: &[LessonEvent]) -> Vec<(PlayerState, PlayerState)> {
    events
        .iter()
        .filter_map(|e| match e {
            LessonEvent::PlaybackStateChanged {
                old_state,
                new_state,
                ..
            } => Some((*old_state, *new_state)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_clouds_lesson_end_to_end() {
    let fetcher = MockFetcher::new().with("a.jpg", FetchBehavior::Load);
    let (mut player, probe) = mock_player(fetcher, immediate_policy(MissingAudioPolicy::Dwell));
    let mut events = player.subscribe();
    let handle = player.handle();

    handle.load(clouds_lesson()).unwrap();
    player.run_until_stalled().await;

    // Segment 1: narration shown, WAV attached and playing
    assert_eq!(player.narration(), Some("Intro"));
    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(player.index(), Some(0));
    assert_eq!(probe.mime(), Some(AudioMime::Wav));
    assert!(probe.is_playing());
    assert_eq!(player.image_status(1), ImageStatus::Loaded);
    assert_eq!(player.image_status(2), ImageStatus::NoImage);

    // Segment 1 ends: advance to segment 2 without pausing
    assert!(probe.finish());
    player.run_until_stalled().await;

    assert_eq!(player.narration(), Some("Detail"));
    assert_eq!(player.index(), Some(1));
    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(probe.mime(), Some(AudioMime::Mpeg));
    assert!(probe.is_playing());

    // Segment 2 ends: terminal, narration stays
    assert!(probe.finish());
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Ended);
    assert_eq!(player.narration(), Some("Detail"));

    let events = drain_events(&mut events);
    assert_eq!(
        state_changes(&events),
        vec![
            (PlayerState::Idle, PlayerState::Ready),
            (PlayerState::Ready, PlayerState::Playing),
            (PlayerState::Playing, PlayerState::Ended),
        ]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, LessonEvent::LessonCompleted { .. })));
    assert_eq!(
        probe.narrations(),
        vec![Some("Intro".to_string()), Some("Detail".to_string())]
    );
}

#[tokio::test]
async fn test_load_emits_single_narration_before_playback() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));

    player.handle().load(wav_lesson("Rain", 3)).unwrap();
    player.run_until_stalled().await;

    let calls = probe.calls();
    let narration_at = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::Narration(_)))
        .unwrap();
    let first_play = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::Play(_)))
        .unwrap();

    assert!(narration_at < first_play);
    assert_eq!(probe.narrations(), vec![Some("Segment 1".to_string())]);
}

#[tokio::test]
async fn test_grace_period_delays_auto_start() {
    tokio::time::pause();
    let mut policy = immediate_policy(MissingAudioPolicy::Dwell);
    policy.startup_grace = Duration::from_millis(150);
    let (mut player, probe) = mock_player(MockFetcher::new(), policy);

    player.handle().load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Ready);
    assert_eq!(player.narration(), Some("Segment 1"));
    assert!(!probe.is_playing());

    player.run_for(Duration::from_millis(200)).await;
    assert_eq!(player.state(), PlayerState::Playing);
    assert!(probe.is_playing());
}

#[tokio::test]
async fn test_pause_resume_keeps_resource_and_position() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;

    let before = probe.source().unwrap();
    probe.set_position_ms(1234);

    handle.pause().unwrap();
    player.run_until_stalled().await;
    assert_eq!(player.state(), PlayerState::Paused);
    assert!(!probe.is_playing());

    probe.clear_calls();
    handle.play().unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(probe.source(), Some(before));
    assert_eq!(probe.position_ms(), 1234);
    // Resumed in place: no reattach, no reload
    assert_eq!(probe.calls(), vec![DeviceCall::Play(before)]);
}

#[tokio::test]
async fn test_clip_ending_as_pause_lands_advances_on_resume() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;
    let first = probe.source().unwrap();
    let second = player.arena().unwrap().source(1).unwrap().id();

    // The clip ends while the pause request is still queued, so its
    // end-of-stream arrives after the pause
    handle.pause().unwrap();
    assert!(probe.finish());
    player.run_until_stalled().await;
    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(player.index(), Some(0));

    probe.clear_calls();
    handle.play().unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(player.index(), Some(1));
    assert_eq!(player.narration(), Some("Segment 2"));
    assert_eq!(probe.source(), Some(second));
    let calls = probe.calls();
    assert!(calls.contains(&DeviceCall::Play(second)));
    // The finished segment is not replayed
    assert!(!calls.contains(&DeviceCall::Play(first)));
}

#[tokio::test]
async fn test_restart_after_ended() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;
    let first = probe.source().unwrap();

    probe.finish();
    player.run_until_stalled().await;
    probe.finish();
    player.run_until_stalled().await;
    assert_eq!(player.state(), PlayerState::Ended);

    handle.play().unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(player.index(), Some(0));
    assert_eq!(player.narration(), Some("Segment 1"));
    assert_eq!(probe.source(), Some(first));
    assert_eq!(probe.position_ms(), 0);
    assert_eq!(
        probe.narrations(),
        vec![
            Some("Segment 1".to_string()),
            Some("Segment 2".to_string()),
            Some("Segment 1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_image_failure_does_not_block_segment() {
    let lesson = Lesson::new(
        "Storms",
        vec![
            Segment::new(10, "Lightning")
                .with_audio(encode(&wav_bytes(8000, 800)))
                .with_image("https://example.test/ok.png"),
            Segment::new(20, "Thunder")
                .with_audio(encode(&mp3_bytes()))
                .with_image("https://example.test/missing.png"),
        ],
    );
    let fetcher = MockFetcher::new()
        .with("https://example.test/ok.png", FetchBehavior::Load)
        .with(
            "https://example.test/missing.png",
            FetchBehavior::Fail("HTTP 404".to_string()),
        );
    let (mut player, probe) = mock_player(fetcher, immediate_policy(MissingAudioPolicy::Dwell));
    let mut events = player.subscribe();

    player.handle().load(lesson).unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.image_status(10), ImageStatus::Loaded);
    assert_eq!(player.image_status(20), ImageStatus::Errored);

    probe.finish();
    player.run_until_stalled().await;

    assert_eq!(player.narration(), Some("Thunder"));
    assert_eq!(probe.mime(), Some(AudioMime::Mpeg));
    assert!(probe.is_playing());

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        LessonEvent::ImagePreloadFailed { segment_id: 20, .. }
    )));
}

#[tokio::test]
async fn test_slow_image_does_not_delay_audio() {
    let lesson = Lesson::new(
        "Fog",
        vec![Segment::new(1, "Hazy")
            .with_audio(encode(&wav_bytes(8000, 800)))
            .with_image("slow.jpg")],
    );
    let fetcher = MockFetcher::new().with("slow.jpg", FetchBehavior::Hang);
    let (mut player, probe) = mock_player(fetcher, immediate_policy(MissingAudioPolicy::Dwell));

    player.handle().load(lesson).unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Playing);
    assert!(probe.is_playing());
    assert_eq!(player.image_status(1), ImageStatus::Pending);
}

#[tokio::test]
async fn test_replacing_lesson_releases_resources() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let mut events = player.subscribe();
    let handle = player.handle();

    handle.load(wav_lesson("Old", 3)).unwrap();
    player.run_until_stalled().await;

    let arena = player.arena().unwrap();
    let old_sources: Vec<_> = (0..3).map(|i| arena.source(i).unwrap()).collect();
    let old_lesson_id = arena.lesson().id;

    handle.load(wav_lesson("New", 1)).unwrap();
    player.run_until_stalled().await;

    assert!(old_sources.iter().all(|s| s.is_released()));
    assert_eq!(player.lesson().unwrap().topic, "New");
    assert_eq!(player.narration(), Some("Segment 1"));
    assert!(probe.has_listener());

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        LessonEvent::LessonCleared { lesson_id, released: 3, .. } if *lesson_id == old_lesson_id
    )));
}

#[tokio::test]
async fn test_listeners_detached_before_new_attach() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Old", 2)).unwrap();
    player.run_until_stalled().await;
    probe.clear_calls();

    handle.load(wav_lesson("New", 2)).unwrap();
    player.run_until_stalled().await;

    let calls = probe.calls();
    let detach = calls
        .iter()
        .position(|c| *c == DeviceCall::DetachListener)
        .unwrap();
    let attach = calls
        .iter()
        .position(|c| *c == DeviceCall::AttachListener)
        .unwrap();
    assert!(detach < attach);
}

#[tokio::test]
async fn test_stale_end_of_stream_after_replacement() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Old", 3)).unwrap();
    player.run_until_stalled().await;
    let old_resource = probe.source().unwrap();
    let old_listener = probe.listener().unwrap();

    handle.load(wav_lesson("New", 3)).unwrap();
    player.run_until_stalled().await;
    let new_resource = probe.source().unwrap();

    // A callback from the previous lesson's playback arrives late
    old_listener(old_resource);
    // And the device reports the old resource through the new listener
    probe.fire_end_of_stream(old_resource);
    player.run_until_stalled().await;

    assert_eq!(player.index(), Some(0));
    assert_eq!(player.narration(), Some("Segment 1"));
    assert_eq!(probe.source(), Some(new_resource));
    assert_eq!(player.state(), PlayerState::Playing);
}

#[tokio::test]
async fn test_stale_image_settlement_ignored() {
    tokio::time::pause();
    let old = Lesson::new(
        "Old",
        vec![Segment::new(1, "Old intro").with_image("shared.jpg")],
    );
    let new = Lesson::new(
        "New",
        vec![Segment::new(1, "New intro").with_image("new.jpg")],
    );
    let fetcher = MockFetcher::new()
        .with("shared.jpg", FetchBehavior::Delay(Duration::from_secs(1)))
        .with("new.jpg", FetchBehavior::Hang);
    let (mut player, _probe) = mock_player(fetcher, immediate_policy(MissingAudioPolicy::Hold));
    let handle = player.handle();

    handle.load(old).unwrap();
    player.run_until_stalled().await;
    handle.load(new).unwrap();
    player.run_until_stalled().await;

    // The old lesson's fetch settles after replacement
    player.run_for(Duration::from_secs(2)).await;
    assert_eq!(player.image_status(1), ImageStatus::Pending);
}

#[tokio::test]
async fn test_play_rejection_reverts_to_paused() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let mut events = player.subscribe();
    let handle = player.handle();

    probe.reject_next_play(PlaybackRejected::Refused("autoplay blocked".to_string()));
    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Paused);
    assert!(!probe.is_playing());
    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, LessonEvent::PlaybackRejected { segment_index: 0, .. })));

    // User retries explicitly
    handle.play().unwrap();
    player.run_until_stalled().await;
    assert_eq!(player.state(), PlayerState::Playing);
    assert!(probe.is_playing());
}

#[tokio::test]
async fn test_undecodable_audio_dwells_then_advances() {
    tokio::time::pause();
    let lesson = Lesson::new(
        "Wind",
        vec![
            Segment::new(1, "Broken")
                .with_audio(lesson_common::EncodedAudio::Single("@@@".to_string()))
                .with_duration_hint(2.0),
            Segment::new(2, "Fine").with_audio(encode(&wav_bytes(8000, 800))),
        ],
    );
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let mut events = player.subscribe();

    player.handle().load(lesson).unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(probe.source(), None);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, LessonEvent::AudioUnavailable { segment_id: 1, .. })));

    player.run_for(Duration::from_millis(1500)).await;
    assert_eq!(player.index(), Some(0));

    player.run_for(Duration::from_millis(1000)).await;
    assert_eq!(player.index(), Some(1));
    assert_eq!(player.narration(), Some("Fine"));
    assert!(probe.is_playing());
}

#[tokio::test]
async fn test_hold_policy_waits_for_next() {
    tokio::time::pause();
    let lesson = Lesson::new(
        "Snow",
        vec![Segment::new(1, "Silent"), Segment::new(2, "Also silent")],
    );
    let (mut player, _probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Hold));
    let handle = player.handle();

    handle.load(lesson).unwrap();
    player.run_until_stalled().await;
    player.run_for(Duration::from_secs(30)).await;
    assert_eq!(player.index(), Some(0));
    assert_eq!(player.state(), PlayerState::Playing);

    handle.next().unwrap();
    player.run_until_stalled().await;
    assert_eq!(player.index(), Some(1));
    assert_eq!(player.narration(), Some("Also silent"));

    handle.next().unwrap();
    player.run_until_stalled().await;
    assert_eq!(player.state(), PlayerState::Ended);
}

#[tokio::test]
async fn test_clear_returns_to_idle() {
    let (mut player, probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;
    let source = probe.source_ref().unwrap();

    handle.clear().unwrap();
    player.run_until_stalled().await;

    assert_eq!(player.state(), PlayerState::Idle);
    assert_eq!(player.index(), None);
    assert_eq!(player.narration(), None);
    assert_eq!(probe.narrations().last(), Some(&None));
    assert!(source.is_released());
    assert!(!probe.has_listener());
    assert_eq!(probe.source(), None);
}

#[tokio::test]
async fn test_invalid_lesson_rejected_without_disturbing_current() {
    let (mut player, _probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;

    let empty = Lesson::new("Empty", Vec::new());
    assert!(matches!(handle.load(empty), Err(Error::Common(_))));

    player.run_until_stalled().await;
    assert_eq!(player.lesson().unwrap().topic, "Rain");
    assert_eq!(player.state(), PlayerState::Playing);
}

#[tokio::test]
async fn test_shutdown_releases_and_stops() {
    let (mut player, _probe) =
        mock_player(MockFetcher::new(), immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(wav_lesson("Rain", 2)).unwrap();
    player.run_until_stalled().await;
    let source = player.arena().unwrap().source(0).unwrap();

    handle.shutdown().unwrap();
    assert!(!player.run_until_stalled().await);
    assert!(source.is_released());

    drop(player);
    assert!(matches!(handle.play(), Err(Error::Shutdown)));
}

#[tokio::test]
async fn test_snapshot_through_handle() {
    let fetcher = MockFetcher::new().with("a.jpg", FetchBehavior::Load);
    let (mut player, _probe) = mock_player(fetcher, immediate_policy(MissingAudioPolicy::Dwell));
    let handle = player.handle();

    handle.load(clouds_lesson()).unwrap();
    player.run_until_stalled().await;

    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { handle.snapshot().await }
    });
    tokio::task::yield_now().await;
    player.run_until_stalled().await;

    let snapshot = pending.await.unwrap().unwrap();
    assert_eq!(snapshot.state, PlayerState::Playing);
    assert_eq!(snapshot.topic.as_deref(), Some("Clouds"));
    assert_eq!(snapshot.narration.as_deref(), Some("Intro"));
    assert_eq!(
        snapshot.images,
        vec![(1, ImageStatus::Loaded), (2, ImageStatus::NoImage)]
    );
}
