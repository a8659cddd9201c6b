//! Live voice session layer: wire protocol, phase tracking, and the
//! WebSocket stream loop.

pub mod protocol;
pub mod session;
pub mod state;

pub use session::{LiveSession, SessionEvent};
pub use state::{SessionPhase, SessionPhaseMachine};
