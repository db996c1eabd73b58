//! Audio test file generation
//!
//! Generates stereo 16-bit WAV files with known content so tests can check
//! the producer → ring buffer → render path sample for sample.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44100;

fn stereo_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Silent stereo WAV of `frames` frames
pub fn generate_silent_wav<P: AsRef<Path>>(path: P, frames: usize) -> Result<(), hound::Error> {
    generate_constant_wav(path, frames, 0)
}

/// Stereo WAV where every sample equals `value`
pub fn generate_constant_wav<P: AsRef<Path>>(
    path: P,
    frames: usize,
    value: i16,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, stereo_spec(TEST_SAMPLE_RATE))?;
    for _ in 0..frames * 2 {
        writer.write_sample(value)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Stereo sine WAV, same signal on both channels
///
/// `amplitude` is a fraction of full scale (0.0-1.0).
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    frames: usize,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, stereo_spec(TEST_SAMPLE_RATE))?;
    let peak = amplitude * i16::MAX as f32;

    for frame_idx in 0..frames {
        let t = frame_idx as f32 / TEST_SAMPLE_RATE as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * peak) as i16;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}
