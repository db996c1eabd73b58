//! # Ringplay Audio Player Library (ringplay-ap)
//!
//! Real-time playback engine: a file producer decodes off the real-time path,
//! a periodic refill task stages 16-bit PCM into a fixed-capacity ring buffer,
//! and the hardware render callback drains it, applies the low-pass effect,
//! and updates the peak meter without blocking or allocating.
//!
//! **Architecture:** symphonia + rubato (producer) → ring buffer → cpal (render)

pub mod audio;
pub mod config;
pub mod effects;
pub mod error;
pub mod playback;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::Player;
