//! Atomic session phase machine.
//!
//! Thread-safe phase tracking for one live session using `AtomicU8`.
//! Shared between the connect path, the stream loop task, and the
//! controller's send path.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle phases of a session. `Closed` is terminal; a new connect
/// always constructs a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Constructed, no connect attempt yet.
    Idle = 0,
    /// WebSocket/setup handshake in progress.
    Connecting = 1,
    /// Handshake acknowledged; streaming both directions.
    Open = 2,
    /// Torn down (client disconnect, server close, or error).
    Closed = 3,
}

impl SessionPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closed,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Thread-safe phase holder, shareable via `Arc`.
#[derive(Debug)]
pub struct SessionPhaseMachine {
    phase: AtomicU8,
}

impl SessionPhaseMachine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: AtomicU8::new(SessionPhase::Idle as u8),
        })
    }

    /// Current phase.
    pub fn current(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Transition Idle → Connecting.
    pub fn begin_connect(&self) -> bool {
        self.phase
            .compare_exchange(
                SessionPhase::Idle as u8,
                SessionPhase::Connecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Transition Connecting → Open.
    pub fn mark_open(&self) -> bool {
        self.phase
            .compare_exchange(
                SessionPhase::Connecting as u8,
                SessionPhase::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Transition any phase → Closed. Returns `true` the first time, so a
    /// racing error path and disconnect run terminal work exactly once.
    pub fn close(&self) -> bool {
        let prev = self.phase.swap(SessionPhase::Closed as u8, Ordering::AcqRel);
        prev != SessionPhase::Closed as u8
    }
}

impl Default for SessionPhaseMachine {
    fn default() -> Self {
        Self {
            phase: AtomicU8::new(SessionPhase::Idle as u8),
        }
    }
}
