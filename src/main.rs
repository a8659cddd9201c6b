//! Voice session core for Skin Routine Tracker Pro.
//!
//! Communicates with the desktop shell via JSON-line IPC on stdin/stdout.
//! This is the entry point that wires config, logging, and the session
//! controller together and runs the main event loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use skintracker_voice::audio::DeviceBackend;
use skintracker_voice::config::{self, paths};
use skintracker_voice::controller::{ControllerCommand, SessionController};
use skintracker_voice::ipc::bridge::{emit_event, spawn_stdin_reader};
use skintracker_voice::ipc::{VoiceCommand, VoiceEvent};
use skintracker_voice::logging;

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Emit starting event immediately so the shell knows we're alive.
    emit_event(&VoiceEvent::Starting {});

    let config = config::read_live_config();
    let data_dir = paths::get_data_dir();
    info!(
        model = config.model(),
        device = ?config.input_device,
        data_dir = %data_dir.display(),
        "Configuration loaded"
    );

    // Spawn stdin reader (blocking thread -> async channel).
    let mut shell_rx = spawn_stdin_reader();

    // Controller runs on its own task; its events flow back through a
    // channel so this loop is the only stdout writer besides the bridge.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let controller =
        SessionController::new(config, data_dir, Arc::new(DeviceBackend), event_tx);
    let controller_task = tokio::spawn(controller.run(ctrl_rx));

    emit_event(&VoiceEvent::Ready {});
    info!("Voice core ready");

    loop {
        tokio::select! {
            cmd = shell_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(command, &ctrl_tx) {
                            break; // Stop command received
                        }
                    }
                    None => {
                        // stdin closed — parent process gone
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => emit_event(&event),
                    None => break, // controller gone
                }
            }
        }
    }

    // Drain the controller so devices and the socket are released before
    // the process exits.
    let _ = ctrl_tx.send(ControllerCommand::Shutdown);
    while let Some(event) = event_rx.recv().await {
        emit_event(&event);
    }
    let _ = controller_task.await;

    info!("Voice core shutting down");
}

/// Handle a single command from the shell.
/// Returns `false` if the main loop should exit.
fn handle_command(cmd: VoiceCommand, ctrl_tx: &mpsc::UnboundedSender<ControllerCommand>) -> bool {
    match cmd {
        VoiceCommand::Ping {} => {
            emit_event(&VoiceEvent::Pong {});
        }

        VoiceCommand::Stop {} => {
            emit_event(&VoiceEvent::Stopping {});
            return false;
        }

        VoiceCommand::Toggle {} => {
            let _ = ctrl_tx.send(ControllerCommand::Toggle);
        }

        VoiceCommand::Disconnect {} => {
            let _ = ctrl_tx.send(ControllerCommand::Disconnect);
        }

        VoiceCommand::Status {} => {
            let _ = ctrl_tx.send(ControllerCommand::Status);
        }
    }

    true
}
