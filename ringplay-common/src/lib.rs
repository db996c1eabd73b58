//! # Ringplay Common Library
//!
//! Shared code for the ringplay binaries:
//! - Common error type
//! - Bootstrap configuration (TOML) with layered resolution
//! - Player event types and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
