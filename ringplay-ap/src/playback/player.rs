//! Player state machine and session lifecycle
//!
//! ```text
//! Idle → Preparing → Ready → Playing → Stopping → Idle
//!            └── (open failure) ──→ Idle
//! ```
//!
//! A session is one source played through one hardware unit. `prepare`
//! opens the source, allocates the unit and resets the ring buffer; `play`
//! splits the ring buffer between a [`RenderEngine`] (moved into the unit)
//! and a [`RefillTask`] (moved onto the refill thread); `stop` halts the
//! unit, then the refill task, then releases the session and clears the ring.
//!
//! When the refill task reaches a terminal outcome it moves the player to
//! `Stopping` and emits `PlaybackFinished` or `PlaybackFailed`; the owner
//! completes the teardown with [`Player::stop`] or [`Player::poll`].

use crate::audio::decoder::FileProducer;
use crate::audio::output::{OutputBackend, OutputStream};
use crate::audio::producer::AudioProducer;
use crate::audio::ring_buffer::{RingBuffer, RingBufferStats};
use crate::audio::types::StreamDescriptor;
use crate::config::PlayerConfig;
use crate::effects::{LowPassEffect, MeterReading, PeakMeter};
use crate::error::{Error, Result};
use crate::playback::callback_monitor::{CallbackMonitor, CallbackStats};
use crate::playback::refill::{RefillScheduler, RefillTask, SessionLinks, TickOutcome};
use crate::playback::render::{telemetry_channel, RenderControls, RenderEngine};
use ringplay_common::events::{EventBus, PlayerEvent, PlayerState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Event channel capacity
const EVENT_CAPACITY: usize = 256;

/// Player diagnostics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStats {
    pub state: PlayerState,
    pub callbacks: CallbackStats,
    /// None when no ring buffer is allocated
    pub ring: Option<RingBufferStats>,
    pub peak_db: f32,
}

/// State reachable from the refill thread
struct PlayerShared {
    state: AtomicU8,
    events: EventBus,
    last_error: Mutex<Option<String>>,
}

impl PlayerShared {
    fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, new_state: PlayerState) {
        let old_state = PlayerState::from_u8(self.state.swap(new_state.as_u8(), Ordering::AcqRel));
        if old_state != new_state {
            debug!("Player state: {} -> {}", old_state, new_state);
            self.emit_state_change(old_state, new_state);
        }
    }

    fn emit_state_change(&self, old_state: PlayerState, new_state: PlayerState) {
        self.events.emit_lossy(PlayerEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    fn record_error(&self, message: String) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    /// Called on the refill thread with the first terminal outcome
    fn session_ended(&self, outcome: TickOutcome) {
        // Only a playing session moves to Stopping; a concurrent stop wins
        let moved = self
            .state
            .compare_exchange(
                PlayerState::Playing.as_u8(),
                PlayerState::Stopping.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            self.emit_state_change(PlayerState::Playing, PlayerState::Stopping);
        }

        let timestamp = chrono::Utc::now();
        match outcome {
            TickOutcome::Finished => {
                info!("Playback finished");
                self.events
                    .emit_lossy(PlayerEvent::PlaybackFinished { timestamp });
            }
            TickOutcome::Failed(message) => {
                warn!("Playback failed: {}", message);
                self.record_error(message.clone());
                self.events
                    .emit_lossy(PlayerEvent::PlaybackFailed { message, timestamp });
            }
            TickOutcome::Continue => {}
        }
    }
}

struct Session {
    source: String,
    format: StreamDescriptor,
    stream: Box<dyn OutputStream>,
    /// Present until `play` hands it to the refill task
    producer: Option<Box<dyn AudioProducer>>,
    scheduler: Option<RefillScheduler>,
}

/// Real-time audio player
pub struct Player {
    config: PlayerConfig,
    backend: Box<dyn OutputBackend>,
    shared: Arc<PlayerShared>,
    controls: Arc<RenderControls>,
    monitor: Arc<CallbackMonitor>,
    meter: Arc<MeterReading>,
    ring: Option<RingBuffer<i16>>,
    session: Option<Session>,
    last_source: Option<PathBuf>,
}

impl Player {
    /// Create an idle player. No hardware unit is allocated until `prepare`.
    pub fn new(config: PlayerConfig, backend: Box<dyn OutputBackend>) -> Result<Self> {
        let config = config.validated()?;
        let controls = Arc::new(RenderControls::new(
            config.use_effects,
            config.metering_enabled,
            config.reset_filter_on_enable,
        )
        .with_read_across_wrap(config.read_across_wrap));

        Ok(Self {
            config,
            backend,
            shared: Arc::new(PlayerShared {
                state: AtomicU8::new(PlayerState::Idle.as_u8()),
                events: EventBus::new(EVENT_CAPACITY),
                last_error: Mutex::new(None),
            }),
            controls,
            monitor: Arc::new(CallbackMonitor::new()),
            meter: Arc::new(MeterReading::new()),
            ring: None,
            session: None,
            last_source: None,
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn state(&self) -> PlayerState {
        self.shared.state()
    }

    /// True while the unit is started and the session has not ended
    pub fn is_playing(&self) -> bool {
        self.state() == PlayerState::Playing
    }

    /// True while a hardware unit is allocated
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Source of the current session
    pub fn source(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.source.as_str())
    }

    /// Stream format of the current session
    pub fn format(&self) -> Option<StreamDescriptor> {
        self.session.as_ref().map(|s| s.format)
    }

    /// Most recent open or decode failure
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    pub fn use_effects(&self) -> bool {
        self.controls.use_effects.load(Ordering::Relaxed)
    }

    /// Takes effect at the next render callback
    pub fn set_use_effects(&self, enabled: bool) {
        debug!("Effects {}", if enabled { "enabled" } else { "disabled" });
        self.controls.use_effects.store(enabled, Ordering::Relaxed);
    }

    pub fn metering_enabled(&self) -> bool {
        self.controls.metering_enabled.load(Ordering::Relaxed)
    }

    /// Disabling also drops the reading to the floor
    pub fn set_metering_enabled(&self, enabled: bool) {
        self.controls
            .metering_enabled
            .store(enabled, Ordering::Relaxed);
        if !enabled {
            self.meter.reset();
        }
    }

    /// Meter level in 0.0 (silence, -96 dBFS) ..= 1.0 (full scale), linear in dB
    pub fn meter_level(&self) -> f32 {
        self.meter.level()
    }

    /// Last metered peak in dBFS
    pub fn peak_db(&self) -> f32 {
        self.meter.peak_db()
    }

    pub fn stats(&self) -> PlayerStats {
        PlayerStats {
            state: self.state(),
            callbacks: self.monitor.stats(),
            ring: self.ring.as_ref().map(RingBuffer::stats),
            peak_db: self.meter.peak_db(),
        }
    }

    /// Open a file and allocate the hardware unit.
    ///
    /// Valid from `Idle` or `Ready` (replacing the prepared source). On
    /// failure the player is back in `Idle` with nothing allocated.
    pub fn prepare(&mut self, path: &Path) -> Result<()> {
        self.prepare_with(
            || Ok(Box::new(FileProducer::open(path)?) as Box<dyn AudioProducer>),
            path.display().to_string(),
        )?;
        self.last_source = Some(path.to_path_buf());
        Ok(())
    }

    /// Prepare a session around an already-open producer
    pub fn prepare_producer(&mut self, producer: Box<dyn AudioProducer>) -> Result<()> {
        let source = producer.source_name();
        self.prepare_with(move || Ok(producer), source)
    }

    fn prepare_with<F>(&mut self, open: F, source: String) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn AudioProducer>>,
    {
        let state = self.state();
        if !matches!(state, PlayerState::Idle | PlayerState::Ready) {
            return Err(Error::InvalidState {
                operation: "prepare",
                state,
            });
        }

        self.release_session();
        self.shared.transition(PlayerState::Preparing);
        info!("Preparing {}", source);

        match open().and_then(|producer| self.attach(producer, source.clone())) {
            Ok(()) => {
                self.shared.transition(PlayerState::Ready);
                if let Some(session) = &self.session {
                    self.shared.events.emit_lossy(PlayerEvent::SourcePrepared {
                        source,
                        sample_rate: session.format.sample_rate,
                        channels: session.format.channels,
                        timestamp: chrono::Utc::now(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                warn!("Failed to prepare {}: {}", source, e);
                self.shared.record_error(e.to_string());
                self.release_session();
                self.shared.transition(PlayerState::Idle);
                Err(e)
            }
        }
    }

    /// Allocate the unit, fix the session format and reset shared state
    fn attach(&mut self, mut producer: Box<dyn AudioProducer>, source: String) -> Result<()> {
        let native = producer.descriptor();
        if native.channels == 0 {
            return Err(Error::SourceOpen(format!("{} reports no channels", source)));
        }
        let requested = StreamDescriptor::pcm16(self.config.sample_rate, native.channels);
        let stream = self.backend.open(&requested)?;
        let format = stream.format();
        producer.set_output_format(&format)?;

        if format != native {
            info!("Converting {} to {}", native, format);
        }

        self.reset_ring(format.samples_for_frames(self.config.ring_capacity_frames));
        self.meter.reset();
        self.monitor.reset();
        if let Some(frames) = stream.buffer_frames() {
            self.monitor.set_expected_period(frames, format.sample_rate);
        }
        self.controls
            .source_exhausted
            .store(false, Ordering::Relaxed);

        self.session = Some(Session {
            source,
            format,
            stream,
            producer: Some(producer),
            scheduler: None,
        });
        Ok(())
    }

    /// Clear the ring buffer, or replace it if the size changed or a
    /// detached refill thread still holds its producer role
    fn reset_ring(&mut self, capacity_samples: usize) {
        let reusable = self
            .ring
            .as_ref()
            .is_some_and(|ring| ring.capacity() == capacity_samples && ring.clear().is_ok());

        if !reusable {
            debug!("Allocating ring buffer of {} samples", capacity_samples);
            self.ring = Some(RingBuffer::new(capacity_samples));
        }
    }

    /// Start playback.
    ///
    /// Valid from `Ready`, or from `Idle` when a file was prepared before
    /// (it is prepared again).
    pub fn play(&mut self) -> Result<()> {
        match self.state() {
            PlayerState::Ready => {}
            PlayerState::Idle => match self.last_source.clone() {
                Some(path) => self.prepare(&path)?,
                None => {
                    return Err(Error::InvalidState {
                        operation: "play",
                        state: PlayerState::Idle,
                    })
                }
            },
            state => {
                return Err(Error::InvalidState {
                    operation: "play",
                    state,
                })
            }
        }

        if let Err(e) = self.start_session() {
            warn!("Failed to start playback: {}", e);
            self.shared.record_error(e.to_string());
            self.release_session();
            self.shared.transition(PlayerState::Idle);
            return Err(e);
        }
        Ok(())
    }

    fn start_session(&mut self) -> Result<()> {
        let (Some(session), Some(ring)) = (self.session.as_mut(), self.ring.as_ref()) else {
            return Err(Error::InvalidState {
                operation: "play",
                state: self.shared.state(),
            });
        };
        let producer = session.producer.take().ok_or(Error::InvalidState {
            operation: "play",
            state: PlayerState::Ready,
        })?;

        let (ring_producer, ring_consumer) = ring.split()?;
        let (telemetry_tx, telemetry_rx) = telemetry_channel();
        let channels = session.format.channel_count();

        let engine = RenderEngine::new(
            ring_consumer,
            channels,
            LowPassEffect::from_preset(self.config.filter_preset, channels),
            PeakMeter::new(Arc::clone(&self.meter)),
            Arc::clone(&self.controls),
            Arc::clone(&self.monitor),
            telemetry_tx,
        );

        let mut task = RefillTask::new(
            producer,
            ring_producer,
            session.format,
            self.config.min_refill_frames,
            telemetry_rx,
            SessionLinks {
                controls: Arc::clone(&self.controls),
                monitor: Arc::clone(&self.monitor),
                events: self.shared.events.clone(),
            },
        );

        // Prime so the first callback has audio; a terminal outcome here is
        // repeated by the first scheduled tick
        task.tick();

        session.stream.start(engine)?;

        // Playing before the scheduler exists, so its terminal callback
        // always observes Playing
        self.shared.transition(PlayerState::Playing);

        let shared = Arc::clone(&self.shared);
        let scheduler = RefillScheduler::spawn(task, self.config.refill_period, move |outcome| {
            shared.session_ended(outcome)
        });

        match scheduler {
            Ok(scheduler) => {
                session.scheduler = Some(scheduler);
                info!("Playing {} ({})", session.source, session.format);
                Ok(())
            }
            Err(e) => {
                if let Err(stop_err) = session.stream.stop() {
                    warn!("Failed to stop output after refill spawn error: {}", stop_err);
                }
                Err(e)
            }
        }
    }

    /// Stop playback and release the session.
    ///
    /// Valid from any state except `Idle`. Halts the unit first, then the
    /// refill task (bounded by the configured stop timeout), then releases
    /// the session and clears the ring buffer.
    pub fn stop(&mut self) -> Result<()> {
        let state = self.state();
        if state == PlayerState::Idle {
            return Err(Error::InvalidState {
                operation: "stop",
                state,
            });
        }

        self.shared.transition(PlayerState::Stopping);
        self.release_session();
        self.meter.reset();
        self.shared.transition(PlayerState::Idle);
        info!("Stopped");
        Ok(())
    }

    /// Complete teardown of a session that ended on its own, ending it
    /// first if the output device reported a stream error.
    ///
    /// Returns the state after polling.
    pub fn poll(&mut self) -> PlayerState {
        let device_failed = self.state() == PlayerState::Playing
            && self
                .session
                .as_ref()
                .is_some_and(|session| session.stream.has_failed());
        if device_failed {
            self.shared.session_ended(TickOutcome::Failed(
                "Output device reported a stream error".to_string(),
            ));
        }

        if self.state() == PlayerState::Stopping {
            if let Err(e) = self.stop() {
                warn!("Teardown after session end failed: {}", e);
            }
        }
        self.state()
    }

    fn release_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Err(e) = session.stream.stop() {
            warn!("Failed to stop output unit: {}", e);
        }

        if let Some(mut scheduler) = session.scheduler.take() {
            if !scheduler.stop(self.config.stop_timeout) {
                warn!("Refill task for {} detached", session.source);
            }
        }

        if let Some(mut producer) = session.producer.take() {
            producer.close();
        }

        debug!("Released session for {}", session.source);
        drop(session);

        if let Some(ring) = &self.ring {
            if ring.clear().is_err() {
                // A detached refill thread still owns the producer role
                warn!("Ring buffer still in use; a new one is allocated on next prepare");
                self.ring = None;
            }
        }
        self.controls
            .source_exhausted
            .store(false, Ordering::Relaxed);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.state() != PlayerState::Idle {
            let _ = self.stop();
        }
    }
}
