//! Second-order low-pass filter
//!
//! Direct-form recursive filter with a three-sample input window `xv` and
//! output window `yv`. Both windows shift by one on every sample:
//!
//! ```text
//! xv[2] = x / GAIN
//! yv[2] = (xv[0] + xv[2]) + 2 * xv[1] + C0 * yv[0] + C1 * yv[1]
//! ```
//!
//! Two Butterworth coefficient sets are built in (designed at 44.1 kHz);
//! [`FilterCoefficients::butterworth`] computes a set for any cutoff.

use crate::effects::AudioEffect;
use crate::error::{Error, Result};
use std::f64::consts::{PI, SQRT_2};
use std::fmt;
use std::str::FromStr;

/// Coefficients for the recursive update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoefficients {
    /// Input divisor (1 / b0)
    pub gain: f64,
    /// Feedback applied to `yv[0]`
    pub c0: f64,
    /// Feedback applied to `yv[1]`
    pub c1: f64,
}

impl FilterCoefficients {
    /// 800 Hz cutoff at 44.1 kHz
    pub const MUFFLED: Self = Self {
        gain: 3.330_129_770_481_613_6e2,
        c0: -0.851_128_341_245_971_8,
        c1: 1.839_116_797_325_203,
    };

    /// 2.5 kHz cutoff at 44.1 kHz
    pub const WARM: Self = Self {
        gain: 3.972_018_787_248_387e1,
        c0: -0.604_399_799_516_827_1,
        c1: 1.503_695_341_299_221_3,
    };

    /// Bilinear-transform Butterworth design for `cutoff_hz` at `sample_rate`.
    ///
    /// # Errors
    /// `Error::Config` unless `0 < cutoff_hz < sample_rate / 2`.
    pub fn butterworth(cutoff_hz: f64, sample_rate: u32) -> Result<Self> {
        let nyquist = sample_rate as f64 / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(Error::Config(format!(
                "Low-pass cutoff {}Hz outside (0, {}Hz)",
                cutoff_hz, nyquist
            )));
        }

        let wa = (PI * cutoff_hz / sample_rate as f64).tan();
        let wa2 = wa * wa;
        let d = 1.0 + SQRT_2 * wa + wa2;

        let b0 = wa2 / d;
        let a1 = 2.0 * (wa2 - 1.0) / d;
        let a2 = (1.0 - SQRT_2 * wa + wa2) / d;

        Ok(Self {
            gain: 1.0 / b0,
            c0: -a2,
            c1: -a1,
        })
    }
}

/// Built-in coefficient sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowPassPreset {
    /// Heavy smoothing: 800 Hz
    #[default]
    Muffled,
    /// Light smoothing: 2.5 kHz
    Warm,
}

impl LowPassPreset {
    pub fn coefficients(self) -> FilterCoefficients {
        match self {
            LowPassPreset::Muffled => FilterCoefficients::MUFFLED,
            LowPassPreset::Warm => FilterCoefficients::WARM,
        }
    }

    /// Nominal cutoff frequency in Hz
    pub fn cutoff_hz(self) -> f64 {
        match self {
            LowPassPreset::Muffled => 800.0,
            LowPassPreset::Warm => 2500.0,
        }
    }
}

impl FromStr for LowPassPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "muffled" => Ok(LowPassPreset::Muffled),
            "warm" => Ok(LowPassPreset::Warm),
            other => Err(Error::Config(format!(
                "Unknown filter preset '{}' (expected muffled or warm)",
                other
            ))),
        }
    }
}

impl fmt::Display for LowPassPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowPassPreset::Muffled => write!(f, "muffled"),
            LowPassPreset::Warm => write!(f, "warm"),
        }
    }
}

/// Single-channel low-pass filter state
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    coeffs: FilterCoefficients,
    xv: [f64; 3],
    yv: [f64; 3],
}

impl LowPassFilter {
    pub fn new(coeffs: FilterCoefficients) -> Self {
        Self {
            coeffs,
            xv: [0.0; 3],
            yv: [0.0; 3],
        }
    }

    pub fn from_preset(preset: LowPassPreset) -> Self {
        Self::new(preset.coefficients())
    }

    /// Filter with a computed Butterworth response
    pub fn with_cutoff(cutoff_hz: f64, sample_rate: u32) -> Result<Self> {
        Ok(Self::new(FilterCoefficients::butterworth(cutoff_hz, sample_rate)?))
    }

    pub fn coefficients(&self) -> FilterCoefficients {
        self.coeffs
    }

    /// Current (input, output) history windows
    pub fn history(&self) -> ([f64; 3], [f64; 3]) {
        (self.xv, self.yv)
    }

    pub fn reset(&mut self) {
        self.xv = [0.0; 3];
        self.yv = [0.0; 3];
    }

    /// Filter one sample, shifting both history windows
    #[inline]
    pub fn process_sample(&mut self, sample: i16) -> i16 {
        let c = &self.coeffs;
        self.xv[0] = self.xv[1];
        self.xv[1] = self.xv[2];
        self.xv[2] = sample as f64 / c.gain;
        self.yv[0] = self.yv[1];
        self.yv[1] = self.yv[2];
        self.yv[2] = (self.xv[0] + self.xv[2])
            + 2.0 * self.xv[1]
            + c.c0 * self.yv[0]
            + c.c1 * self.yv[1];

        self.yv[2]
            .round()
            .clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    /// Filter a mono block in place
    pub fn process(&mut self, samples: &mut [i16]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Filter one channel of an interleaved block in place
    pub fn process_channel(&mut self, samples: &mut [i16], channel: usize, channels: usize) {
        for sample in samples.iter_mut().skip(channel).step_by(channels) {
            *sample = self.process_sample(*sample);
        }
    }
}

/// Low-pass applied independently to every channel of an interleaved stream
pub struct LowPassEffect {
    filters: Vec<LowPassFilter>,
}

impl LowPassEffect {
    /// One filter per channel, allocated up front
    pub fn new(coeffs: FilterCoefficients, channels: usize) -> Self {
        Self {
            filters: vec![LowPassFilter::new(coeffs); channels.max(1)],
        }
    }

    pub fn from_preset(preset: LowPassPreset, channels: usize) -> Self {
        Self::new(preset.coefficients(), channels)
    }

    pub fn channels(&self) -> usize {
        self.filters.len()
    }

    /// Filter state for one channel
    pub fn filter(&self, channel: usize) -> Option<&LowPassFilter> {
        self.filters.get(channel)
    }
}

impl AudioEffect for LowPassEffect {
    fn name(&self) -> &'static str {
        "low-pass"
    }

    fn process(&mut self, samples: &mut [i16], channels: usize) {
        debug_assert_eq!(channels, self.filters.len());
        let channels = channels.min(self.filters.len());
        for (channel, filter) in self.filters.iter_mut().take(channels).enumerate() {
            filter.process_channel(samples, channel, channels);
        }
    }

    fn reset(&mut self) {
        self.filters.iter_mut().for_each(LowPassFilter::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tolerance: f64) {
        assert!((a - b).abs() <= tolerance, "{} vs {}", a, b);
    }

    #[test]
    fn test_butterworth_reproduces_presets() {
        for preset in [LowPassPreset::Muffled, LowPassPreset::Warm] {
            let computed = FilterCoefficients::butterworth(preset.cutoff_hz(), 44100).unwrap();
            let builtin = preset.coefficients();
            assert_close(computed.c0, builtin.c0, 1e-6);
            assert_close(computed.c1, builtin.c1, 1e-6);
            assert_close(computed.gain / builtin.gain, 1.0, 1e-6);
        }
    }

    #[test]
    fn test_butterworth_rejects_out_of_range_cutoff() {
        assert!(FilterCoefficients::butterworth(0.0, 44100).is_err());
        assert!(FilterCoefficients::butterworth(22050.0, 44100).is_err());
        assert!(FilterCoefficients::butterworth(f64::NAN, 44100).is_err());
    }

    #[test]
    fn test_dc_passes_at_unity_gain() {
        let mut filter = LowPassFilter::from_preset(LowPassPreset::Muffled);
        let mut block = vec![10000i16; 4096];
        filter.process(&mut block);
        let settled = *block.last().unwrap();
        assert!((settled - 10000).abs() <= 2, "settled at {}", settled);
    }

    #[test]
    fn test_nyquist_is_attenuated() {
        let mut filter = LowPassFilter::from_preset(LowPassPreset::Warm);
        let mut block: Vec<i16> = (0..4096)
            .map(|i| if i % 2 == 0 { 20000 } else { -20000 })
            .collect();
        filter.process(&mut block);
        let peak = block[2048..].iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak < 100, "peak {}", peak);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = LowPassFilter::from_preset(LowPassPreset::Muffled);
        filter.process(&mut [5000; 16]);
        assert_ne!(filter.history(), ([0.0; 3], [0.0; 3]));
        filter.reset();
        assert_eq!(filter.history(), ([0.0; 3], [0.0; 3]));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut effect = LowPassEffect::from_preset(LowPassPreset::Muffled, 2);
        // Left carries DC, right is silent
        let mut block: Vec<i16> = (0..2048).flat_map(|_| [8000i16, 0]).collect();
        effect.process(&mut block, 2);

        assert!(block.iter().skip(1).step_by(2).all(|&s| s == 0));
        assert!((block[block.len() - 2] - 8000).abs() <= 2);
        assert_eq!(effect.filter(1).unwrap().history(), ([0.0; 3], [0.0; 3]));
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("Warm".parse::<LowPassPreset>().unwrap(), LowPassPreset::Warm);
        assert_eq!("muffled".parse::<LowPassPreset>().unwrap(), LowPassPreset::Muffled);
        assert!("tinny".parse::<LowPassPreset>().is_err());
        assert_eq!(LowPassPreset::Warm.to_string(), "warm");
    }
}
