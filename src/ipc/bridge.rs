//! Stdin/stdout bridge to the desktop shell.
//!
//! The shell writes one JSON command per line to our stdin and reads one
//! JSON event per line from our stdout. A dedicated blocking thread owns
//! stdin and feeds parsed commands into the async side through a channel.
//! stdout carries protocol lines only; diagnostics go to stderr/tracing.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{VoiceCommand, VoiceEvent};

/// Write one event line to stdout and flush. Write failures are ignored:
/// a closed pipe means the shell is gone, and the stdin side will notice
/// and end the process.
pub fn emit_event(event: &VoiceEvent) {
    match serde_json::to_string(event) {
        Ok(line) => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => warn!("Could not serialize event: {e}"),
    }
}

/// Shorthand for protocol-level error reporting.
pub fn emit_error(message: &str) {
    emit_event(&VoiceEvent::Error {
        message: message.to_string(),
    });
}

/// Own stdin on a blocking thread and forward parsed commands through the
/// returned channel. The thread finishes on stdin EOF (shell exited), on
/// a read error, or once the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<VoiceCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    break;
                }
            };
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            match serde_json::from_str::<VoiceCommand>(raw) {
                Ok(command) => {
                    debug!(?command, "Shell command");
                    if tx.send(command).is_err() {
                        // Receiver dropped, main task is gone.
                        break;
                    }
                }
                Err(e) => {
                    warn!(input = raw, "Unparseable shell command: {e}");
                    emit_error(&format!("invalid command: {e}"));
                }
            }
        }
        debug!("stdin reader finished");
    });

    rx
}
