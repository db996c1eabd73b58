//! Audio Player (ringplay-ap) - Main entry point
//!
//! Plays one file headless through the default (or named) output device,
//! printing a peak meter until the file ends or Ctrl+C is pressed.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ringplay_ap::audio::CpalBackend;
use ringplay_ap::{Player, PlayerConfig};
use ringplay_common::config::ConfigResolver;
use ringplay_common::events::{PlayerEvent, PlayerState};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Width of the text meter in characters
const METER_WIDTH: usize = 40;

/// Command-line arguments for ringplay-ap
#[derive(Parser, Debug)]
#[command(name = "ringplay-ap")]
#[command(about = "Real-time audio player with low-pass effect and peak metering")]
#[command(version)]
struct Args {
    /// Audio file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Configuration file (overrides the per-user and system files)
    #[arg(short, long, env = "RINGPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(short, long, env = "RINGPLAY_DEVICE")]
    device: Option<String>,

    /// Start with the low-pass effect enabled
    #[arg(short, long)]
    effects: bool,

    /// Low-pass preset (muffled, warm)
    #[arg(long, env = "RINGPLAY_PRESET")]
    preset: Option<String>,

    /// Disable peak metering
    #[arg(long)]
    no_metering: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "RINGPLAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print player events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Meter refresh interval in milliseconds
    #[arg(long, default_value = "100", env = "RINGPLAY_METER_INTERVAL_MS")]
    meter_interval_ms: u64,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is loaded first so its log level can seed the filter
    let toml = ConfigResolver::new("ringplay")
        .with_explicit(args.config.clone())
        .resolve();
    let level = args
        .log_level
        .clone()
        .or_else(|| toml.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ringplay_ap={level},ringplay_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.list_devices {
        for name in CpalBackend::list_devices().context("Failed to enumerate output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut toml = toml.context("Failed to load configuration")?;
    if let Some(device) = &args.device {
        toml.output.device = Some(device.clone());
    }
    if let Some(preset) = &args.preset {
        toml.playback.filter_preset = preset.clone();
    }
    if args.effects {
        toml.playback.use_effects = true;
    }
    if args.no_metering {
        toml.playback.metering_enabled = false;
    }

    let config = PlayerConfig::from_toml(&toml).context("Invalid configuration")?;
    let file = args
        .file
        .clone()
        .ok_or_else(|| anyhow!("No file given"))?;

    info!("Starting ringplay-ap {}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration: {:?}", config);

    let backend = CpalBackend::new(config.device.clone(), config.buffer_frames);
    let mut player = Player::new(config, Box::new(backend)).context("Failed to create player")?;
    let mut events = player.events();

    player
        .prepare(&file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    player.play().context("Failed to start playback")?;

    let outcome = run(&mut player, &mut events, &args).await;

    if player.state() != PlayerState::Idle {
        tokio::task::block_in_place(|| player.stop()).context("Failed to stop playback")?;
    }
    if player.metering_enabled() && !args.json {
        eprintln!();
    }

    let stats = player.stats();
    info!(
        "Session ended: {} callbacks, {} underruns ({} frames)",
        stats.callbacks.callback_count,
        stats.callbacks.underrun_count,
        stats.callbacks.underrun_frames
    );

    outcome
}

/// Drive the session until it ends, fails or is interrupted
async fn run(
    player: &mut Player,
    events: &mut tokio::sync::broadcast::Receiver<PlayerEvent>,
    args: &Args,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(args.meter_interval_ms.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                return Ok(());
            }
            _ = ticker.tick() => {
                if player.metering_enabled() && !args.json {
                    draw_meter(player.meter_level(), player.peak_db());
                }
                if poll_blocking(player) == PlayerState::Idle {
                    return Ok(());
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if args.json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else {
                        debug!("Event: {}", event.event_type());
                    }
                    match event {
                        PlayerEvent::PlaybackFinished { .. } => return Ok(()),
                        PlayerEvent::PlaybackFailed { message, .. } => {
                            return Err(anyhow!("Playback failed: {}", message));
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event receiver lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

/// Poll the player without stalling the runtime; session teardown joins the
/// refill thread for up to the stop timeout
fn poll_blocking(player: &mut Player) -> PlayerState {
    tokio::task::block_in_place(|| player.poll())
}

fn draw_meter(level: f32, peak_db: f32) {
    let lit = (level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    let mut stderr = std::io::stderr().lock();
    let _ = write!(
        stderr,
        "\r[{}{}] {:6.1} dBFS",
        "#".repeat(lit),
        " ".repeat(METER_WIDTH - lit),
        peak_db
    );
    let _ = stderr.flush();
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
            info!("Received Ctrl+C, stopping");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping");
        },
    }
}
