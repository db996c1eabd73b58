//! Core audio data types
//!
//! The engine moves interleaved signed 16-bit PCM end to end. A session's
//! stream format is fixed when the producer is attached and never changes.

use std::time::Duration;

/// Full-scale magnitude of a 16-bit sample, used for dBFS conversion
pub const FULL_SCALE: f32 = i16::MAX as f32;

/// Scale between normalised float and 16-bit PCM (2^15)
const PCM_SCALE: f32 = 32768.0;

/// Stream format descriptor for a playback session.
///
/// Set once when a producer is attached; immutable for the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Frames per second
    pub sample_rate: u32,

    /// Samples per frame
    pub channels: u16,

    /// Always 16 for the render path
    pub bits_per_sample: u16,

    /// Samples of one frame are adjacent in memory
    pub interleaved: bool,
}

impl StreamDescriptor {
    /// Interleaved 16-bit PCM at the given rate and channel count
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            interleaved: true,
        }
    }

    /// Channel count as usize for slice arithmetic
    pub fn channel_count(&self) -> usize {
        self.channels as usize
    }

    /// Bytes occupied by one frame
    pub fn bytes_per_frame(&self) -> usize {
        self.channel_count() * (self.bits_per_sample as usize / 8)
    }

    /// Number of samples in `frames` frames
    pub fn samples_for_frames(&self, frames: usize) -> usize {
        frames * self.channel_count()
    }

    /// Number of whole frames in `samples` samples; zero for a
    /// channel-less descriptor
    pub fn frames_for_samples(&self, samples: usize) -> usize {
        samples.checked_div(self.channel_count()).unwrap_or(0)
    }

    /// Round a sample count down to a whole number of frames
    pub fn align_to_frame(&self, samples: usize) -> usize {
        self.frames_for_samples(samples) * self.channel_count()
    }

    /// Wall-clock duration of `frames` frames
    pub fn duration_of(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl Default for StreamDescriptor {
    fn default() -> Self {
        Self::pcm16(44100, 2)
    }
}

impl std::fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}-bit {}",
            self.sample_rate,
            self.channels,
            self.bits_per_sample,
            if self.interleaved { "interleaved" } else { "planar" }
        )
    }
}

/// Convert a normalised float sample to i16 with rounding and clamping
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * PCM_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert an i16 sample to a normalised float
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_arithmetic() {
        let desc = StreamDescriptor::pcm16(48000, 2);
        assert_eq!(desc.bytes_per_frame(), 4);
        assert_eq!(desc.samples_for_frames(512), 1024);
        assert_eq!(desc.frames_for_samples(1025), 512);
        assert_eq!(desc.align_to_frame(1025), 1024);
        assert_eq!(desc.duration_of(48000), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_channels_hold_no_frames() {
        let desc = StreamDescriptor::pcm16(44100, 0);
        assert_eq!(desc.frames_for_samples(7), 0);
        assert_eq!(desc.align_to_frame(7), 0);
        assert_eq!(desc.bytes_per_frame(), 0);
    }

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(i16_to_f32(1234)), 1234);
        assert_eq!(f32_to_i16(i16_to_f32(i16::MIN)), i16::MIN);
        assert_eq!(f32_to_i16(i16_to_f32(i16::MAX)), i16::MAX);
    }
}
