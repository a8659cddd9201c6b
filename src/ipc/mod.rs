//! IPC protocol types for communication with the desktop shell.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> shell).
//! Commands use `{"command": "<name>", ...}` format (shell -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Events: core -> shell (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the shell via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Process is alive; emitted before anything else.
    Starting {},
    /// Configuration loaded and the command loop is running.
    Ready {},
    /// Controller status changed: `idle`, `connecting`, `listening`, or
    /// `speaking`.
    Status { status: String },
    /// One merged transcript line (already capped by the rolling window).
    Transcript {
        text: String,
        #[serde(rename = "isUser")]
        is_user: bool,
    },
    Error { message: String },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: shell -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the shell via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum VoiceCommand {
    /// Start a conversation when idle, end it when active.
    Toggle {},
    /// Tear down any session unconditionally (assistant panel closed).
    Disconnect {},
    /// Re-emit the current status and transcript window.
    Status {},
    /// Exit the process.
    Stop {},
    Ping {},
}
