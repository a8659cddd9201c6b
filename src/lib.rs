//! Voice session core for Skin Routine Tracker Pro.
//!
//! Streams microphone audio to a live conversational endpoint and plays
//! the spoken responses back gaplessly, while a desktop shell drives it
//! over JSON-line IPC on stdin/stdout.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod ipc;
pub mod live;
pub mod logging;
pub mod profile;
pub mod transcript;

pub use audio::{AudioBackend, AudioBlock, DeviceBackend};
pub use config::LiveConfig;
pub use controller::{ControllerCommand, SessionController, Status};
pub use error::{Result, VoiceError};
pub use live::{LiveSession, SessionEvent};
pub use transcript::{TranscriptLine, TranscriptLog};
