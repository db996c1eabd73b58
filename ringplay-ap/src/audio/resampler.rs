//! Streaming sample-rate conversion using rubato
//!
//! Sources whose native rate differs from the session rate are converted
//! incrementally as they decode, one fixed-size input chunk at a time, so the
//! producer never holds more than a chunk of unconverted audio.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Input frames per rubato call
pub const CHUNK_FRAMES: usize = 1024;

/// Incremental interleaved-f32 resampler
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    pending: Vec<Vec<f32>>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    /// Create a resampler converting `input_rate` to `output_rate`.
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::SourceOpen("resampler needs at least one channel".to_string()));
        }

        // FastFixedIn with a septic polynomial: good quality at low CPU cost
        let inner = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| Error::SourceOpen(format!("Failed to create resampler: {}", e)))?;

        debug!(
            "Resampling {}Hz -> {}Hz ({} channels)",
            input_rate, output_rate, channels
        );

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            input_rate,
            output_rate,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Frames buffered but not yet converted
    pub fn pending_frames(&self) -> usize {
        self.pending[0].len()
    }

    /// Queue interleaved input; a trailing partial frame is ignored.
    pub fn push_interleaved(&mut self, samples: &[f32]) {
        for frame in samples.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
    }

    /// Convert every complete input chunk, appending interleaved output.
    pub fn drain_ready(&mut self, output: &mut Vec<f32>) -> Result<()> {
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending_frames() < needed {
                return Ok(());
            }

            let chunk: Vec<&[f32]> = self.pending.iter().map(|c| &c[..needed]).collect();
            let converted = self
                .inner
                .process(&chunk, None)
                .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

            interleave_into(&converted, output);
            for channel in &mut self.pending {
                channel.drain(..needed);
            }
        }
    }

    /// Convert whatever remains at end of stream.
    pub fn flush(&mut self, output: &mut Vec<f32>) -> Result<()> {
        self.drain_ready(output)?;
        if self.pending_frames() == 0 {
            return Ok(());
        }

        let remaining = self.pending_frames();
        let mut converted = self
            .inner
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        // The partial call pads with silence; keep only the converted remainder
        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let keep = (remaining as f64 * ratio).ceil() as usize;
        for channel in &mut converted {
            channel.truncate(keep);
        }

        interleave_into(&converted, output);
        for channel in &mut self.pending {
            channel.clear();
        }
        Ok(())
    }
}

/// Planar to interleaved: [[L, L], [R, R]] -> [L, R, L, R]
fn interleave_into(planar: &[Vec<f32>], output: &mut Vec<f32>) {
    let Some(first) = planar.first() else {
        return;
    };

    output.reserve(first.len() * planar.len());
    for frame_idx in 0..first.len() {
        for channel in planar {
            output.push(channel[frame_idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_into() {
        let planar = vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]];
        let mut out = Vec::new();
        interleave_into(&planar, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let mut out = Vec::new();
        interleave_into(&[], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_partial_chunk_stays_pending() {
        let mut resampler = StreamResampler::new(48000, 44100, 2).unwrap();
        resampler.push_interleaved(&vec![0.0; 100 * 2 + 1]);
        assert_eq!(resampler.pending_frames(), 100);

        let mut out = Vec::new();
        resampler.drain_ready(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(resampler.pending_frames(), 100);
    }

    #[test]
    fn test_stream_length_tracks_ratio() {
        let input_rate = 48000;
        let frames = 4800;
        let mut resampler = StreamResampler::new(input_rate, 44100, 2).unwrap();

        let mut input = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / input_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            input.push(sample);
            input.push(sample);
        }

        let mut out = Vec::new();
        // Feed in uneven pieces the way a decoder would
        for piece in input.chunks(1152 * 2) {
            resampler.push_interleaved(piece);
            resampler.drain_ready(&mut out).unwrap();
        }
        resampler.flush(&mut out).unwrap();

        assert_eq!(out.len() % 2, 0);
        assert_eq!(resampler.pending_frames(), 0);

        let expected = (frames as f64 * 44100.0 / input_rate as f64) as usize;
        let produced = out.len() / 2;
        assert!(
            produced + 200 >= expected && produced <= expected + 200,
            "expected ~{} frames, got {}",
            expected,
            produced
        );
    }

    #[test]
    fn test_zero_channels_rejected() {
        assert!(StreamResampler::new(48000, 44100, 0).is_err());
    }
}
