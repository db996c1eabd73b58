//! Runtime player configuration
//!
//! [`PlayerConfig`] is the validated form of the `[playback]` and `[output]`
//! TOML sections. Construction is the only place where limits are checked;
//! everything downstream trusts it.

use crate::effects::LowPassPreset;
use crate::error::{Error, Result};
use ringplay_common::config::TomlConfig;
use std::time::Duration;
use tracing::warn;

/// Callback size assumed for validation when the device picks its own
const ASSUMED_BUFFER_FRAMES: usize = 1024;

/// Validated player parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Ring buffer capacity in frames (power of two)
    pub ring_capacity_frames: usize,

    /// Refill tick period
    pub refill_period: Duration,

    /// Minimum useful refill chunk in frames
    pub min_refill_frames: usize,

    /// Upper bound on joining the refill task during stop
    pub stop_timeout: Duration,

    /// Low-pass filter on at start-up
    pub use_effects: bool,

    /// Peak metering on at start-up
    pub metering_enabled: bool,

    /// Low-pass coefficient set
    pub filter_preset: LowPassPreset,

    /// Clear filter history whenever effects switch back on
    pub reset_filter_on_enable: bool,

    /// Let one callback read past the ring's wrap point
    pub read_across_wrap: bool,

    /// Requested session sample rate
    pub sample_rate: u32,

    /// Output device name (None = default device)
    pub device: Option<String>,

    /// Fixed callback size in frames (None = device default)
    pub buffer_frames: Option<u32>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ring_capacity_frames: 16384,
            refill_period: Duration::from_millis(10),
            min_refill_frames: 256,
            stop_timeout: Duration::from_millis(500),
            use_effects: false,
            metering_enabled: true,
            filter_preset: LowPassPreset::Muffled,
            reset_filter_on_enable: false,
            read_across_wrap: false,
            sample_rate: 44100,
            device: None,
            buffer_frames: None,
        }
    }
}

impl PlayerConfig {
    /// Build and validate from bootstrap TOML
    pub fn from_toml(toml: &TomlConfig) -> Result<Self> {
        let playback = &toml.playback;
        let config = Self {
            ring_capacity_frames: playback.ring_capacity_frames,
            refill_period: Duration::from_millis(playback.refill_period_ms),
            min_refill_frames: playback.min_refill_frames,
            stop_timeout: Duration::from_millis(playback.stop_timeout_ms),
            use_effects: playback.use_effects,
            metering_enabled: playback.metering_enabled,
            filter_preset: playback.filter_preset.parse()?,
            reset_filter_on_enable: playback.reset_filter_on_enable,
            read_across_wrap: playback.read_across_wrap,
            sample_rate: toml.output.sample_rate,
            device: toml.device_name().map(str::to_string),
            buffer_frames: toml.output.buffer_frames,
        };
        config.validated()
    }

    /// Check limits, rounding the ring capacity up to a power of two
    pub fn validated(mut self) -> Result<Self> {
        if self.ring_capacity_frames == 0 {
            return Err(Error::Config("ring_capacity_frames must be non-zero".to_string()));
        }
        if !self.ring_capacity_frames.is_power_of_two() {
            let rounded = self.ring_capacity_frames.next_power_of_two();
            warn!(
                "ring_capacity_frames {} rounded up to {}",
                self.ring_capacity_frames, rounded
            );
            self.ring_capacity_frames = rounded;
        }

        if self.refill_period.is_zero() {
            return Err(Error::Config("refill_period_ms must be non-zero".to_string()));
        }
        if self.stop_timeout.is_zero() {
            return Err(Error::Config("stop_timeout_ms must be non-zero".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".to_string()));
        }
        if self.buffer_frames == Some(0) {
            return Err(Error::Config("buffer_frames must be non-zero".to_string()));
        }

        let period = self
            .buffer_frames
            .map_or(ASSUMED_BUFFER_FRAMES, |frames| frames as usize);
        if self.ring_capacity_frames < 4 * period {
            return Err(Error::Config(format!(
                "ring_capacity_frames {} holds fewer than four {}-frame callbacks",
                self.ring_capacity_frames, period
            )));
        }

        if self.min_refill_frames == 0 || self.min_refill_frames >= self.ring_capacity_frames {
            return Err(Error::Config(format!(
                "min_refill_frames must be in 1..{}",
                self.ring_capacity_frames
            )));
        }

        Ok(self)
    }

    /// Wall-clock audio held by a full ring buffer
    pub fn ring_duration(&self) -> Duration {
        Duration::from_secs_f64(self.ring_capacity_frames as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PlayerConfig::from_toml(&TomlConfig::default()).unwrap();
        assert_eq!(config, PlayerConfig::default());
        assert!(config.ring_duration() > Duration::from_millis(300));
    }

    #[test]
    fn test_capacity_rounded_to_power_of_two() {
        let mut toml = TomlConfig::default();
        toml.playback.ring_capacity_frames = 5000;
        let config = PlayerConfig::from_toml(&toml).unwrap();
        assert_eq!(config.ring_capacity_frames, 8192);
    }

    #[test]
    fn test_capacity_must_cover_four_callbacks() {
        let mut toml = TomlConfig::default();
        toml.playback.ring_capacity_frames = 4096;
        toml.output.buffer_frames = Some(2048);
        assert!(matches!(
            PlayerConfig::from_toml(&toml),
            Err(Error::Config(_))
        ));

        toml.output.buffer_frames = Some(1024);
        assert!(PlayerConfig::from_toml(&toml).is_ok());
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut toml = TomlConfig::default();
        toml.playback.refill_period_ms = 0;
        assert!(PlayerConfig::from_toml(&toml).is_err());

        let mut toml = TomlConfig::default();
        toml.playback.filter_preset = "tinny".to_string();
        assert!(PlayerConfig::from_toml(&toml).is_err());

        let mut toml = TomlConfig::default();
        toml.playback.min_refill_frames = 16384;
        assert!(PlayerConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_output_section_mapped() {
        let mut toml = TomlConfig::default();
        toml.output.device = Some("default".to_string());
        toml.output.sample_rate = 48000;
        toml.playback.filter_preset = "warm".to_string();

        let config = PlayerConfig::from_toml(&toml).unwrap();
        assert_eq!(config.device, None);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.filter_preset, LowPassPreset::Warm);
    }

    #[test]
    fn test_wrap_read_policy_mapped() {
        let mut toml = TomlConfig::default();
        assert!(!PlayerConfig::from_toml(&toml).unwrap().read_across_wrap);

        toml.playback.read_across_wrap = true;
        assert!(PlayerConfig::from_toml(&toml).unwrap().read_across_wrap);
    }
}
