//! Event types for the ringplay event system
//!
//! Provides the player state enum, the `PlayerEvent` enum and the EventBus
//! used to fan events out to the UI collaborator (or the CLI).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Player state machine states
///
/// `Idle → Preparing → Ready → Playing → Stopping → Idle`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// No hardware unit allocated
    Idle,
    /// Source being opened, buffers being reset
    Preparing,
    /// Source open and hardware unit allocated, not yet started
    Ready,
    /// Hardware unit running, refill task active
    Playing,
    /// Source finished or failed; waiting for teardown
    Stopping,
}

impl PlayerState {
    /// Stable numeric encoding for atomic storage
    pub fn as_u8(self) -> u8 {
        match self {
            PlayerState::Idle => 0,
            PlayerState::Preparing => 1,
            PlayerState::Ready => 2,
            PlayerState::Playing => 3,
            PlayerState::Stopping => 4,
        }
    }

    /// Inverse of [`PlayerState::as_u8`]; unknown values decode as Idle
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Preparing,
            2 => PlayerState::Ready,
            3 => PlayerState::Playing,
            4 => PlayerState::Stopping,
            _ => PlayerState::Idle,
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Preparing => write!(f, "preparing"),
            PlayerState::Ready => write!(f, "ready"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Player event types
///
/// Events are broadcast via EventBus and serialize as internally tagged JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Player state changed
    StateChanged {
        /// State before change
        old_state: PlayerState,
        /// State after change
        new_state: PlayerState,
        /// When state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A source was opened and the session is ready
    SourcePrepared {
        /// Source description (file path or producer name)
        source: String,
        /// Session sample rate in Hz
        sample_rate: u32,
        /// Session channel count
        channels: u16,
        /// When the session became ready
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The producer reported a clean end of stream; queued audio still draining
    EndOfStream {
        /// When end of stream was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queued audio drained after end of stream
    PlaybackFinished {
        /// When the ring buffer emptied
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Terminal decode failure; emitted once per session
    PlaybackFailed {
        /// Error description
        message: String,
        /// When the failure was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// New render-callback underruns observed (advisory)
    UnderrunDetected {
        /// Total underruns this session
        total: u64,
        /// When the underruns were observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::SourcePrepared { .. } => "SourcePrepared",
            PlayerEvent::EndOfStream { .. } => "EndOfStream",
            PlayerEvent::PlaybackFinished { .. } => "PlaybackFinished",
            PlayerEvent::PlaybackFailed { .. } => "PlaybackFailed",
            PlayerEvent::UnderrunDetected { .. } => "UnderrunDetected",
        }
    }

    /// True for events after which the session must be stopped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerEvent::PlaybackFinished { .. } | PlayerEvent::PlaybackFailed { .. }
        )
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow subscribers
/// see `Lagged` instead of stalling the publisher. Sending and `try_recv`
/// work without a running runtime, so plain threads can publish.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
