//! Bootstrap configuration loading
//!
//! Configuration is layered, highest priority first:
//! 1. Command-line arguments (applied by the binary on top of the loaded file)
//! 2. Explicit config file (`--config` or the `RINGPLAY_CONFIG` environment variable)
//! 3. Per-user TOML file (`<config_dir>/ringplay/config.toml`)
//! 4. System-wide TOML file (`/etc/ringplay/config.toml`, Linux only)
//! 5. Compiled defaults
//!
//! A missing file never aborts start-up: the resolver logs a warning and falls
//! back to compiled defaults. A file that exists but fails to parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RINGPLAY_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every section and key is optional; absent values take compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Ring buffer, refill and render settings
    pub playback: PlaybackSection,

    /// Output device settings
    pub output: OutputSection,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[playback]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    /// Ring buffer capacity in frames (rounded up to a power of two)
    pub ring_capacity_frames: usize,

    /// Refill task period in milliseconds
    pub refill_period_ms: u64,

    /// Refill ticks with less contiguous space than this are skipped
    pub min_refill_frames: usize,

    /// Upper bound on how long `stop()` waits for the refill task to exit
    pub stop_timeout_ms: u64,

    /// Low-pass filter enabled at start-up
    pub use_effects: bool,

    /// Peak metering enabled at start-up
    pub metering_enabled: bool,

    /// Low-pass coefficient set: "muffled" or "warm"
    pub filter_preset: String,

    /// Clear filter history whenever effects are switched back on
    pub reset_filter_on_enable: bool,

    /// Render may continue past the wrap point within one callback instead
    /// of padding with silence until the next one
    pub read_across_wrap: bool,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            ring_capacity_frames: 16384,
            refill_period_ms: 10,
            min_refill_frames: 256,
            stop_timeout_ms: 500,
            use_effects: false,
            metering_enabled: true,
            filter_preset: "muffled".to_string(),
            reset_filter_on_enable: false,
            read_across_wrap: false,
        }
    }
}

/// `[output]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Output device name; "default" (or absent) selects the host default
    pub device: Option<String>,

    /// Preferred session sample rate in Hz
    pub sample_rate: u32,

    /// Fixed callback size in frames (None = device default)
    pub buffer_frames: Option<u32>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44100,
            buffer_frames: None,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Output device name with "default" normalised to None
    pub fn device_name(&self) -> Option<&str> {
        match self.output.device.as_deref() {
            None | Some("") | Some("default") => None,
            Some(name) => Some(name),
        }
    }
}

/// Resolves which configuration file applies and loads it
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    app_name: String,
    explicit: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver for the given application directory name
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            explicit: None,
        }
    }

    /// Use an explicit file (from `--config`); it must exist
    pub fn with_explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// Candidate files in priority order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(&self.app_name).join("config.toml"));
        }

        if cfg!(target_os = "linux") {
            paths.push(PathBuf::from("/etc").join(&self.app_name).join("config.toml"));
        }

        paths
    }

    /// Find the configuration file to load, if any
    pub fn locate(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(Error::Config(format!(
                    "{} points to a missing file: {}",
                    CONFIG_ENV_VAR,
                    path.display()
                )));
            }
            return Ok(Some(path));
        }

        Ok(self.candidates().into_iter().find(|p| p.exists()))
    }

    /// Load the highest-priority configuration, or compiled defaults
    pub fn resolve(&self) -> Result<TomlConfig> {
        match self.locate()? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                TomlConfig::from_file(&path)
            }
            None => {
                warn!("No configuration file found, using compiled defaults");
                debug!("Searched: {:?}", self.candidates());
                Ok(TomlConfig::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.playback.ring_capacity_frames, 16384);
        assert_eq!(config.output.sample_rate, 44100);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [playback]
            use_effects = true
            filter_preset = "warm"
            "#,
        )
        .unwrap();

        assert!(config.playback.use_effects);
        assert_eq!(config.playback.filter_preset, "warm");
        assert_eq!(config.playback.refill_period_ms, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = TomlConfig::from_toml_str("[playback\nuse_effects = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_device_name_normalised() {
        let mut config = TomlConfig::default();
        assert_eq!(config.device_name(), None);

        config.output.device = Some("default".to_string());
        assert_eq!(config.device_name(), None);

        config.output.device = Some("USB DAC".to_string());
        assert_eq!(config.device_name(), Some("USB DAC"));
    }
}
