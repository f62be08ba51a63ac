//! Lesson Player - headless command-line entry point
//!
//! Loads a lesson JSON file, plays it through the selected device, prints
//! each narration change, and exits once the lesson ends (or on Ctrl+C).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lesson_common::{Lesson, LessonEvent};
use lesson_player::config::PlayerConfig;
use lesson_player::device::{ClockDevice, PlaybackDevice};
use lesson_player::LessonPlayer;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Timer-driven, no sound
    Clock,
    /// Sound card via cpal (requires the `cpal-output` feature)
    Cpal,
}

/// Command-line arguments for lesson-player
#[derive(Parser, Debug)]
#[command(name = "lesson-player")]
#[command(about = "Play a narrated slideshow lesson")]
#[command(version)]
struct Args {
    /// Lesson JSON file
    lesson: PathBuf,

    /// Configuration file (falls back to $LESSON_PLAYER_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Clock device speed factor (overrides configuration)
    #[arg(short, long)]
    speed: Option<f64>,

    /// Skip image preloading
    #[arg(long)]
    no_images: bool,

    /// Playback device
    #[arg(short, long, value_enum, default_value = "clock")]
    output: Output,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) =
        PlayerConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(speed) = args.speed {
        config.playback.clock_speed = speed;
    }
    if args.no_images {
        config.preload.enabled = false;
    }

    // Initialize tracing
    let fallback = config.logging.directive(&["lesson_player", "lesson_common"]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting lesson player v{}", env!("CARGO_PKG_VERSION"));
    match source.path() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let json = tokio::fs::read_to_string(&args.lesson)
        .await
        .with_context(|| format!("Failed to read {}", args.lesson.display()))?;
    let lesson = Lesson::from_json(&json).context("Invalid lesson file")?;

    match args.output {
        Output::Clock => play(ClockDevice::new(config.playback.clock_speed), &config, lesson).await,
        Output::Cpal => play_cpal(&config, lesson).await,
    }
}

#[cfg(feature = "cpal-output")]
async fn play_cpal(config: &PlayerConfig, lesson: Lesson) -> Result<()> {
    let device = lesson_player::device::CpalDevice::new(None)
        .context("Failed to open audio output")?;
    play(device, config, lesson).await
}

#[cfg(not(feature = "cpal-output"))]
async fn play_cpal(_config: &PlayerConfig, _lesson: Lesson) -> Result<()> {
    anyhow::bail!("lesson-player was built without the cpal-output feature")
}

async fn play<D: PlaybackDevice>(device: D, config: &PlayerConfig, lesson: Lesson) -> Result<()> {
    let mut player =
        LessonPlayer::from_config(device, config).context("Failed to initialize player")?;

    player.set_narration_listener(|text| {
        if let Some(text) = text {
            println!("{}", text);
        }
    });

    let handle = player.handle();
    let mut events = player.subscribe();

    // Stop after the lesson completes
    let completion = handle.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LessonEvent::LessonCompleted { .. }) => {
                    let _ = completion.shutdown();
                    break;
                }
                Ok(event) => debug!(event = event.event_type(), "Player event"),
                Err(RecvError::Lagged(n)) => warn!("Event listener lagged by {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let interrupt = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = interrupt.shutdown();
    });

    info!("Playing '{}' ({} segments)", lesson.topic, lesson.len());
    handle.load(lesson).context("Failed to load lesson")?;
    player.run().await;

    info!("Lesson player shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
