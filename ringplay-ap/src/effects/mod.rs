//! In-callback effects chain
//!
//! Effects run on the real-time render thread. `process` must not allocate,
//! block or log; any state it needs is allocated when the effect is built.

pub mod low_pass;
pub mod meter;

pub use low_pass::{FilterCoefficients, LowPassEffect, LowPassFilter, LowPassPreset};
pub use meter::{magnitude_to_db, MeterReading, PeakMeter, MIN_DB};

/// A processing stage applied to interleaved 16-bit blocks
pub trait AudioEffect: Send {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Process one interleaved block in place.
    ///
    /// `samples.len()` is a whole number of frames of `channels` samples.
    fn process(&mut self, samples: &mut [i16], channels: usize);

    /// Drop all history, as if no audio had been processed
    fn reset(&mut self);

    /// True if `process` rewrites samples; analysis-only effects return false.
    fn is_destructive(&self) -> bool {
        true
    }
}
