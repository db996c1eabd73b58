//! End-to-end player tests
//!
//! WAV fixtures are synthesised into temp directories and played through a
//! `ManualBackend`, with the test thread acting as the hardware clock.

mod helpers;

use helpers::{generate_constant_wav, generate_sine_wav, pull_until};
use ringplay_ap::audio::{ManualBackend, MemoryProducer, StreamDescriptor};
use ringplay_ap::{Error, Player, PlayerConfig};
use ringplay_common::events::{PlayerEvent, PlayerState};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CALLBACK_FRAMES: usize = 64;

fn test_config() -> PlayerConfig {
    PlayerConfig {
        ring_capacity_frames: 1024,
        min_refill_frames: 32,
        refill_period: Duration::from_millis(2),
        buffer_frames: Some(CALLBACK_FRAMES as u32),
        ..PlayerConfig::default()
    }
}

fn player_with_clock(rate: u32) -> (Player, ringplay_ap::audio::ManualClock) {
    let backend = ManualBackend::new(rate, 2).with_buffer_frames(CALLBACK_FRAMES as u32);
    let clock = backend.clock();
    let player = Player::new(test_config(), Box::new(backend)).unwrap();
    (player, clock)
}

#[test]
fn test_file_plays_through_sample_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("constant.wav");
    generate_constant_wav(&path, 4410, 1000).unwrap();

    let (mut player, clock) = player_with_clock(44100);
    player.prepare(&path).unwrap();
    assert_eq!(player.state(), PlayerState::Ready);
    assert_eq!(player.format(), Some(StreamDescriptor::pcm16(44100, 2)));

    player.play().unwrap();
    let (rendered, ended) = pull_until(&clock, CALLBACK_FRAMES, Duration::from_secs(10), || {
        player.state() != PlayerState::Playing
    });
    assert!(ended);

    // Underrun padding is zeros, so every source sample is still counted
    let near = |s: i16| (s as i32 - 1000).abs() <= 1;
    assert_eq!(rendered.iter().filter(|&&s| near(s)).count(), 4410 * 2);
    assert!(rendered.iter().all(|&s| near(s) || s == 0));

    assert_eq!(player.state(), PlayerState::Stopping);
    assert_eq!(player.poll(), PlayerState::Idle);
    assert!(!player.is_initialized());
    assert!(player.last_error().is_none());
}

#[test]
fn test_unreadable_path_leaves_player_idle() {
    let dir = TempDir::new().unwrap();
    let (mut player, _clock) = player_with_clock(44100);

    let result = player.prepare(&dir.path().join("missing.wav"));
    assert!(matches!(result, Err(Error::SourceOpen(_))));
    assert!(!player.is_playing());
    assert!(!player.is_initialized());
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(player.last_error().is_some());

    // Nothing was prepared, so there is nothing to re-prepare
    assert!(matches!(player.play(), Err(Error::InvalidState { .. })));
}

#[test]
fn test_garbage_file_is_source_open_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.wav");
    std::fs::write(&path, b"definitely not a RIFF header").unwrap();

    let (mut player, _clock) = player_with_clock(44100);
    assert!(matches!(player.prepare(&path), Err(Error::SourceOpen(_))));
    assert_eq!(player.state(), PlayerState::Idle);
}

#[test]
fn test_stop_mid_stream_is_prompt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("long.wav");
    generate_constant_wav(&path, 44100 * 10, 500).unwrap();

    let (mut player, clock) = player_with_clock(44100);
    player.prepare(&path).unwrap();
    player.play().unwrap();
    for _ in 0..20 {
        clock.pull(CALLBACK_FRAMES);
    }

    let started = Instant::now();
    player.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(player.state(), PlayerState::Idle);
    assert!(!clock.is_running());
    assert_eq!(player.stats().ring.map(|r| r.fill_count), Some(0));

    // A stopped unit renders silence without touching the ring
    assert_eq!(clock.render_into(&mut [1i16; 8]), None);
}

#[test]
fn test_play_from_idle_prepares_last_file_again() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("again.wav");
    generate_constant_wav(&path, 8820, 700).unwrap();

    let (mut player, clock) = player_with_clock(44100);
    player.prepare(&path).unwrap();
    player.play().unwrap();
    player.stop().unwrap();

    player.play().unwrap();
    assert!(player.is_playing());
    let block = clock.pull(CALLBACK_FRAMES);
    assert!(block.iter().all(|&s| (s as i32 - 700).abs() <= 1));
    player.stop().unwrap();
}

#[test]
fn test_events_follow_session_lifecycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.wav");
    generate_constant_wav(&path, 4410, 100).unwrap();

    let (mut player, clock) = player_with_clock(44100);
    let mut events = player.events();

    player.prepare(&path).unwrap();
    player.play().unwrap();
    let (_, ended) = pull_until(&clock, CALLBACK_FRAMES, Duration::from_secs(10), || {
        player.state() == PlayerState::Stopping
    });
    assert!(ended);
    player.stop().unwrap();

    let received: Vec<PlayerEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| !matches!(e, PlayerEvent::UnderrunDetected { .. }))
        .collect();
    let names: Vec<&str> = received.iter().map(PlayerEvent::event_type).collect();
    assert_eq!(
        names,
        vec![
            "StateChanged",
            "StateChanged",
            "SourcePrepared",
            "StateChanged",
            "EndOfStream",
            "StateChanged",
            "PlaybackFinished",
            "StateChanged",
        ]
    );

    let transitions: Vec<(PlayerState, PlayerState)> = received
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => Some((*old_state, *new_state)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (PlayerState::Idle, PlayerState::Preparing),
            (PlayerState::Preparing, PlayerState::Ready),
            (PlayerState::Ready, PlayerState::Playing),
            (PlayerState::Playing, PlayerState::Stopping),
            (PlayerState::Stopping, PlayerState::Idle),
        ]
    );
}

#[test]
fn test_session_rate_differs_from_file_rate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resample.wav");
    generate_sine_wav(&path, 4410, 440.0, 0.5).unwrap();

    let (mut player, clock) = player_with_clock(48000);
    player.prepare(&path).unwrap();
    assert_eq!(player.format().map(|f| f.sample_rate), Some(48000));

    player.play().unwrap();
    let (_, ended) = pull_until(&clock, CALLBACK_FRAMES, Duration::from_secs(10), || {
        player.state() != PlayerState::Playing
    });
    assert!(ended);

    let produced_frames = player.stats().ring.map_or(0, |r| r.total_produced) / 2;
    assert!(
        (produced_frames as i64 - 4800).abs() < 300,
        "produced {} frames",
        produced_frames
    );
    player.stop().unwrap();
}

#[test]
fn test_meter_and_effects_controls() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    generate_sine_wav(&path, 44100, 440.0, 0.5).unwrap();

    let (mut player, clock) = player_with_clock(44100);
    assert!(player.metering_enabled());
    assert!(!player.use_effects());

    player.prepare(&path).unwrap();
    player.play().unwrap();
    for _ in 0..100 {
        clock.pull(CALLBACK_FRAMES);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(player.meter_level() > 0.5);
    assert!(player.peak_db() < 0.0);

    player.set_use_effects(true);
    assert!(player.use_effects());
    clock.pull(CALLBACK_FRAMES);

    player.set_metering_enabled(false);
    assert_eq!(player.meter_level(), 0.0);
    clock.pull(CALLBACK_FRAMES);
    assert_eq!(player.meter_level(), 0.0);

    player.stop().unwrap();
}

#[test]
fn test_memory_producer_session() {
    let (mut player, clock) = player_with_clock(44100);
    let producer = MemoryProducer::new(StreamDescriptor::pcm16(44100, 2), vec![-250; 512])
        .with_name("memory");

    player.prepare_producer(Box::new(producer)).unwrap();
    assert_eq!(player.source(), Some("memory"));
    player.play().unwrap();

    let block = clock.pull(256);
    assert!(block.iter().all(|&s| s == -250));
    let (_, ended) = pull_until(&clock, CALLBACK_FRAMES, Duration::from_secs(5), || {
        player.state() == PlayerState::Stopping
    });
    assert!(ended);
    assert_eq!(player.stats().callbacks.underrun_count, 0);
    assert_eq!(player.poll(), PlayerState::Idle);
}
