//! Test helper modules for ringplay-ap integration tests
//!
//! - audio_generator: deterministic WAV fixtures
//! - clock: drive a `ManualClock` until a condition holds

#![allow(dead_code)]

pub mod audio_generator;
pub mod clock;

pub use audio_generator::{
    generate_constant_wav, generate_silent_wav, generate_sine_wav, TEST_SAMPLE_RATE,
};
pub use clock::pull_until;
