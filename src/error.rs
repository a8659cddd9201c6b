//! Error taxonomy for the voice session pipeline.
//!
//! Device, config, and connection errors propagate to the controller and
//! force a teardown back to idle; malformed-audio and protocol errors are
//! contained where they occur (the offending fragment/message is dropped
//! and the session continues).

use thiserror::Error;

/// All errors produced by the voice core.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Microphone or speaker could not be acquired. Recoverable: surfaced
    /// to the user, the controller stays idle.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A server audio fragment failed to decode. The fragment is dropped;
    /// the session keeps running.
    #[error("malformed audio payload: {0}")]
    MalformedAudio(String),

    /// Transport-level failure (handshake, socket, close). Tears the
    /// session down; no automatic retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// An inbound message matched no known shape. Logged and ignored.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing or invalid configuration (e.g. no API key).
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VoiceError>;
