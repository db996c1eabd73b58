//! Peak metering
//!
//! The render thread owns [`PeakMeter`] (smoothing history and block peak)
//! and publishes one decibel value per callback into a shared
//! [`MeterReading`]. Readers on any thread load a single atomic word, so a
//! reading is never torn; it may be one callback stale.

use crate::audio::types::FULL_SCALE;
use crate::effects::AudioEffect;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Floor of the decibel scale (silence)
pub const MIN_DB: f32 = -96.0;

/// One-pole smoothing weight given to each new rectified sample
pub const DEFAULT_SMOOTHING: f32 = 0.001;

/// Last published peak, shared between the render thread and readers
#[derive(Debug)]
pub struct MeterReading {
    peak_db_bits: AtomicU32,
}

impl MeterReading {
    pub fn new() -> Self {
        Self {
            peak_db_bits: AtomicU32::new(MIN_DB.to_bits()),
        }
    }

    /// Last published peak in dBFS, `MIN_DB` when silent
    pub fn peak_db(&self) -> f32 {
        f32::from_bits(self.peak_db_bits.load(Ordering::Relaxed))
    }

    /// Peak mapped linearly in decibels onto 0.0 (silence) ..= 1.0 (full scale)
    pub fn level(&self) -> f32 {
        ((self.peak_db() - MIN_DB) / -MIN_DB).clamp(0.0, 1.0)
    }

    pub fn publish(&self, peak_db: f32) {
        self.peak_db_bits
            .store(peak_db.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.publish(MIN_DB);
    }
}

impl Default for MeterReading {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a linear magnitude to dBFS, floored at `MIN_DB`
pub fn magnitude_to_db(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return MIN_DB;
    }
    (20.0 * (magnitude / FULL_SCALE).log10()).max(MIN_DB)
}

/// Smoothed peak meter
pub struct PeakMeter {
    previous_rectified: f32,
    smoothing: f32,
    reading: Arc<MeterReading>,
}

impl PeakMeter {
    pub fn new(reading: Arc<MeterReading>) -> Self {
        Self::with_smoothing(reading, DEFAULT_SMOOTHING)
    }

    /// `smoothing` is clamped to (0, 1]; 1.0 disables smoothing
    pub fn with_smoothing(reading: Arc<MeterReading>, smoothing: f32) -> Self {
        Self {
            previous_rectified: 0.0,
            smoothing: smoothing.clamp(f32::MIN_POSITIVE, 1.0),
            reading,
        }
    }

    pub fn reading(&self) -> &Arc<MeterReading> {
        &self.reading
    }

    /// Smoothing history carried into the next block
    pub fn previous_rectified(&self) -> f32 {
        self.previous_rectified
    }

    /// Meter one interleaved block and publish its peak.
    ///
    /// Each sample is rectified and smoothed against the previous smoothed
    /// value; the block peak of the smoothed signal is converted to dBFS once.
    pub fn measure(&mut self, samples: &[i16]) -> f32 {
        let k = self.smoothing;
        let mut previous = self.previous_rectified;
        let mut peak = 0.0f32;

        for &sample in samples {
            let rectified = (sample as f32).abs();
            previous = k * rectified + (1.0 - k) * previous;
            if previous > peak {
                peak = previous;
            }
        }

        self.previous_rectified = previous;
        let peak_db = magnitude_to_db(peak);
        self.reading.publish(peak_db);
        peak_db
    }
}

impl AudioEffect for PeakMeter {
    fn name(&self) -> &'static str {
        "peak-meter"
    }

    fn process(&mut self, samples: &mut [i16], _channels: usize) {
        self.measure(samples);
    }

    fn reset(&mut self) {
        self.previous_rectified = 0.0;
        self.reading.reset();
    }

    fn is_destructive(&self) -> bool {
        false
    }
}
