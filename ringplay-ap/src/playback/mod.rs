//! Playback: render path, refill task and the player state machine

pub mod callback_monitor;
pub mod player;
pub mod refill;
pub mod render;

pub use callback_monitor::{CallbackMonitor, CallbackStats};
pub use player::{Player, PlayerStats};
pub use refill::{RefillScheduler, RefillTask, TickOutcome};
pub use render::{RenderControls, RenderEngine, RenderEvent};
