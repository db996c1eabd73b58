//! Real-time render path
//!
//! [`RenderEngine`] is moved into the output stream and invoked on every
//! hardware callback. Per callback it:
//!
//! 1. Copies up to the requested frame count out of the contiguous run that
//!    starts at the read head; the run after the wrap point waits for the next
//!    callback unless [`RenderControls::read_across_wrap`] is set
//! 2. Zero-fills whatever the ring could not supply and counts the underrun
//! 3. Runs the low-pass filter over the copied audio when effects are on
//! 4. Meters the whole block when metering is on
//! 5. Consumes exactly what was copied
//!
//! Nothing here blocks on I/O, allocates or logs. Control flags are atomics
//! read once per callback; diagnostics go out through atomics and a
//! fixed-capacity telemetry queue drained by the refill task.

use crate::audio::ring_buffer::{copy, RingBufferError, RingConsumer};
use crate::effects::{AudioEffect, LowPassEffect, PeakMeter};
use crate::playback::callback_monitor::CallbackMonitor;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Capacity of the render telemetry queue
pub const TELEMETRY_CAPACITY: usize = 64;

/// Diagnostic record pushed from the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    /// A callback was silence-padded
    Underrun {
        requested_frames: u32,
        delivered_frames: u32,
    },

    /// The ring buffer rejected a consume; a programming error
    Violation(RingBufferError),
}

/// Telemetry queue halves: the engine pushes, the refill task pops
pub fn telemetry_channel() -> (HeapProd<RenderEvent>, HeapCons<RenderEvent>) {
    HeapRb::<RenderEvent>::new(TELEMETRY_CAPACITY).split()
}

/// Flags shared between the player (writer) and the render thread (reader)
#[derive(Debug)]
pub struct RenderControls {
    /// Low-pass filter on
    pub use_effects: AtomicBool,

    /// Peak metering on
    pub metering_enabled: AtomicBool,

    /// Producer hit end of stream; padding from here on is not an underrun
    pub source_exhausted: AtomicBool,

    /// Clear filter history when effects switch back on
    pub reset_filter_on_enable: bool,

    /// Continue past the wrap point within one callback instead of padding
    /// the rest of the block with silence
    pub read_across_wrap: bool,
}

impl RenderControls {
    pub fn new(use_effects: bool, metering_enabled: bool, reset_filter_on_enable: bool) -> Self {
        Self {
            use_effects: AtomicBool::new(use_effects),
            metering_enabled: AtomicBool::new(metering_enabled),
            source_exhausted: AtomicBool::new(false),
            reset_filter_on_enable,
            read_across_wrap: false,
        }
    }

    pub fn with_read_across_wrap(mut self, enabled: bool) -> Self {
        self.read_across_wrap = enabled;
        self
    }
}

/// Consumer side of a playback session
pub struct RenderEngine {
    consumer: RingConsumer<i16>,
    channels: usize,
    filter: LowPassEffect,
    meter: PeakMeter,
    controls: Arc<RenderControls>,
    monitor: Arc<CallbackMonitor>,
    telemetry: HeapProd<RenderEvent>,
    effects_active: bool,
}

impl RenderEngine {
    pub fn new(
        consumer: RingConsumer<i16>,
        channels: usize,
        filter: LowPassEffect,
        meter: PeakMeter,
        controls: Arc<RenderControls>,
        monitor: Arc<CallbackMonitor>,
        telemetry: HeapProd<RenderEvent>,
    ) -> Self {
        let effects_active = controls.use_effects.load(Ordering::Relaxed);
        Self {
            consumer,
            channels: channels.max(1),
            filter,
            meter,
            controls,
            monitor,
            telemetry,
            effects_active,
        }
    }

    /// Samples per frame
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn filter(&self) -> &LowPassEffect {
        &self.filter
    }

    pub fn meter(&self) -> &PeakMeter {
        &self.meter
    }

    /// Fill `output` completely; returns the number of frames taken from the ring.
    ///
    /// `output` holds interleaved samples; a trailing partial frame is
    /// zeroed.
    pub fn render(&mut self, output: &mut [i16]) -> usize {
        let channels = self.channels;
        let requested_frames = output.len() / channels;
        let requested = requested_frames * channels;
        self.monitor.record_callback(requested_frames);

        let (first_len, second_len) = {
            let (first, second) = self.consumer.readable_slices();
            let first_len = align(first.len().min(requested), channels);
            copy(output, first, first_len);

            // The post-wrap run only continues a fully drained pre-wrap run
            let second_len = if self.controls.read_across_wrap && first_len == first.len() {
                align(second.len().min(requested - first_len), channels)
            } else {
                0
            };
            copy(&mut output[first_len..], second, second_len);
            (first_len, second_len)
        };

        let delivered = first_len + second_len;
        output[delivered..].fill(0);

        if delivered < requested && !self.controls.source_exhausted.load(Ordering::Relaxed) {
            let delivered_frames = delivered / channels;
            self.monitor
                .record_underrun(requested_frames - delivered_frames);
            // Queue full: the counter above still records it
            let _ = self.telemetry.try_push(RenderEvent::Underrun {
                requested_frames: requested_frames as u32,
                delivered_frames: delivered_frames as u32,
            });
        }

        let use_effects = self.controls.use_effects.load(Ordering::Relaxed);
        if use_effects {
            if !self.effects_active && self.controls.reset_filter_on_enable {
                self.filter.reset();
            }
            self.filter.process(&mut output[..delivered], channels);
        }
        self.effects_active = use_effects;

        if self.controls.metering_enabled.load(Ordering::Relaxed) {
            self.meter.process(&mut output[..requested], channels);
        }

        for run in [first_len, second_len] {
            if run == 0 {
                continue;
            }
            if let Err(e) = self.consumer.consume(run) {
                let _ = self.telemetry.try_push(RenderEvent::Violation(e));
                debug_assert!(false, "render consume violated ring contract: {}", e);
                break;
            }
        }

        delivered / channels
    }
}

#[inline]
fn align(samples: usize, channels: usize) -> usize {
    samples - samples % channels
}
