//! Periodic ring buffer refill
//!
//! The refill task is the producer side of a playback session. It runs on its
//! own thread at a fixed period, independent of the hardware callback period,
//! and may block on file I/O. Each tick:
//!
//! - drains render telemetry and logs it (the render thread never logs)
//! - fills the free space of the ring buffer from the producer, one
//!   contiguous run at a time, publishing exactly what the producer returned
//! - after end of stream, waits for the ring buffer to drain before
//!   reporting the session finished, so queued audio is never truncated
//!
//! A producer error is terminal: it is reported once and the task exits.

use crate::audio::producer::AudioProducer;
use crate::audio::ring_buffer::RingProducer;
use crate::audio::types::StreamDescriptor;
use crate::error::{Error, Result};
use crate::playback::callback_monitor::CallbackMonitor;
use crate::playback::render::{RenderControls, RenderEvent};
use ringbuf::{traits::*, HeapCons};
use ringplay_common::events::{EventBus, PlayerEvent};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Result of one refill tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking
    Continue,
    /// End of stream reached and the ring buffer drained
    Finished,
    /// Producer failed; the message is surfaced to the player once
    Failed(String),
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TickOutcome::Continue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Streaming,
    Draining,
    Done(TickOutcome),
}

/// Handles the refill task shares with the rest of the session
#[derive(Clone)]
pub struct SessionLinks {
    pub controls: Arc<RenderControls>,
    pub monitor: Arc<CallbackMonitor>,
    pub events: EventBus,
}

/// Producer-side state of a playback session
pub struct RefillTask {
    producer: Box<dyn AudioProducer>,
    ring: RingProducer<i16>,
    format: StreamDescriptor,
    min_chunk_samples: usize,
    telemetry: HeapCons<RenderEvent>,
    links: SessionLinks,
    phase: Phase,
    reported_underruns: u64,
    frames_produced: u64,
}

impl RefillTask {
    pub fn new(
        producer: Box<dyn AudioProducer>,
        ring: RingProducer<i16>,
        format: StreamDescriptor,
        min_refill_frames: usize,
        telemetry: HeapCons<RenderEvent>,
        links: SessionLinks,
    ) -> Self {
        let min_chunk_samples = format
            .samples_for_frames(min_refill_frames.max(1))
            .min(format.align_to_frame(ring.capacity()));

        Self {
            producer,
            ring,
            format,
            min_chunk_samples,
            telemetry,
            links,
            phase: Phase::Streaming,
            reported_underruns: 0,
            frames_produced: 0,
        }
    }

    /// Frames published to the ring buffer so far
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    /// True once the producer reported end of stream
    pub fn is_draining(&self) -> bool {
        self.phase == Phase::Draining
    }

    /// Run one refill cycle.
    ///
    /// Terminal outcomes are sticky: later ticks repeat them.
    pub fn tick(&mut self) -> TickOutcome {
        self.drain_telemetry();

        match &self.phase {
            Phase::Done(outcome) => return outcome.clone(),
            Phase::Draining => return self.check_drained(),
            Phase::Streaming => {}
        }

        match self.fill() {
            Ok(true) => TickOutcome::Continue,
            Ok(false) => {
                info!(
                    "End of stream after {} frames from {}",
                    self.frames_produced,
                    self.producer.source_name()
                );
                self.phase = Phase::Draining;
                self.links
                    .controls
                    .source_exhausted
                    .store(true, Ordering::Relaxed);
                self.links.events.emit_lossy(PlayerEvent::EndOfStream {
                    timestamp: chrono::Utc::now(),
                });
                self.check_drained()
            }
            Err(e) => {
                error!("Refill failed for {}: {}", self.producer.source_name(), e);
                let outcome = TickOutcome::Failed(e.to_string());
                self.phase = Phase::Done(outcome.clone());
                outcome
            }
        }
    }

    /// Fill up to two contiguous runs. Returns `Ok(false)` at end of stream.
    fn fill(&mut self) -> Result<bool> {
        for _ in 0..2 {
            // Total space gates the tick; the run itself may end at the wrap point
            if self.ring.space() < self.min_chunk_samples {
                trace!("Refill skipped: {} samples free", self.ring.space());
                break;
            }

            let region = self.ring.write_region();
            let chunk = self.format.align_to_frame(region.len());
            if chunk == 0 {
                break;
            }

            let frames = self.producer.render_into(&mut region[..chunk])?;
            if frames == 0 {
                return Ok(false);
            }

            let samples = self.format.samples_for_frames(frames);
            if let Err(e) = self.ring.produce(samples) {
                error!("Producer returned more than it was offered: {}", e);
                debug_assert!(false, "refill produce violated ring contract: {}", e);
                return Err(Error::RingBuffer(e));
            }
            self.frames_produced += frames as u64;

            if samples < chunk {
                break;
            }
        }
        Ok(true)
    }

    fn check_drained(&mut self) -> TickOutcome {
        if self.ring.fill_count() == 0 {
            debug!("Ring buffer drained after end of stream");
            self.phase = Phase::Done(TickOutcome::Finished);
            TickOutcome::Finished
        } else {
            TickOutcome::Continue
        }
    }

    /// Deferred logging for the render thread
    fn drain_telemetry(&mut self) {
        while let Some(event) = self.telemetry.try_pop() {
            match event {
                RenderEvent::Underrun {
                    requested_frames,
                    delivered_frames,
                } => {
                    debug!(
                        "Render underrun: {} of {} frames delivered",
                        delivered_frames, requested_frames
                    );
                }
                RenderEvent::Violation(e) => {
                    error!("Render callback ring buffer violation: {}", e);
                }
            }
        }

        let underruns = self.links.monitor.underrun_count();
        if underruns > self.reported_underruns {
            warn!(
                "{} new render underruns ({} total)",
                underruns - self.reported_underruns,
                underruns
            );
            self.reported_underruns = underruns;
            self.links.events.emit_lossy(PlayerEvent::UnderrunDetected {
                total: underruns,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn close(&mut self) {
        self.drain_telemetry();
        self.producer.close();
    }
}

/// Stop flag guarded by the mutex the refill thread waits on
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the running refill thread
pub struct RefillScheduler {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
    exited: mpsc::Receiver<()>,
}

impl RefillScheduler {
    /// Start ticking `task` every `period` on a dedicated thread.
    ///
    /// `on_terminal` runs on the refill thread with the first terminal
    /// outcome; it is not called when the task is stopped from outside.
    pub fn spawn<F>(mut task: RefillTask, period: Duration, on_terminal: F) -> Result<Self>
    where
        F: FnOnce(TickOutcome) + Send + 'static,
    {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let (exited_tx, exited) = mpsc::channel();

        let thread_signal = Arc::clone(&signal);
        let thread = thread::Builder::new()
            .name("ringplay-refill".to_string())
            .spawn(move || {
                debug!("Refill task started ({:?} period)", period);
                let mut on_terminal = Some(on_terminal);

                loop {
                    let outcome = task.tick();
                    if outcome.is_terminal() {
                        if let Some(callback) = on_terminal.take() {
                            callback(outcome);
                        }
                        break;
                    }

                    let stopped = thread_signal
                        .stopped
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    let (stopped, _) = thread_signal
                        .wake
                        .wait_timeout_while(stopped, period, |stopped| !*stopped)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *stopped {
                        debug!("Refill task received stop signal");
                        break;
                    }
                }

                task.close();
                debug!("Refill task exited after {} frames", task.frames_produced());
                let _ = exited_tx.send(());
            })?;

        Ok(Self {
            signal,
            thread: Some(thread),
            exited,
        })
    }

    /// Interrupt the wait and join with a hard timeout.
    ///
    /// Returns false if the thread did not exit in time (it is detached; an
    /// in-flight read finishes on its own and the thread then exits).
    pub fn stop(&mut self, timeout: Duration) -> bool {
        {
            let mut stopped = self
                .signal
                .stopped
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *stopped = true;
        }
        self.signal.wake.notify_all();

        let Some(thread) = self.thread.take() else {
            return true;
        };

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("Refill thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Refill task did not exit within {:?}; detaching", timeout);
                false
            }
        }
    }

    /// True while the thread has not been joined or detached
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for RefillScheduler {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop(Duration::from_millis(500));
        }
    }
}
