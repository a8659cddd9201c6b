//! Session controller: owns the conversation lifecycle.
//!
//! One task runs the whole pipeline: shell commands come in, session
//! events and capture blocks come out of their channels, and every state
//! change happens here, so status transitions never race.
//!
//! A toggle from idle spawns a connect task (device open, context load,
//! WebSocket handshake) and the loop keeps serving commands meanwhile.
//! Connect completions carry the generation number they were started
//! under; a teardown bumps the generation, so a completion from a
//! superseded connect is recognized as stale and its session is disposed
//! instead of adopted.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::capture::SampleSource;
use crate::audio::pcm;
use crate::audio::playback::PlaybackScheduler;
use crate::audio::{AudioBackend, AudioBlock};
use crate::config::LiveConfig;
use crate::error::{Result, VoiceError};
use crate::ipc::VoiceEvent;
use crate::live::{LiveSession, SessionEvent};
use crate::profile::AssistantContext;
use crate::transcript::TranscriptLog;

/// What the controller is doing right now, as reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Connecting,
    Listening,
    Speaking,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Commands the controller loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCommand {
    /// Start a conversation when idle, end it when active. Ignored while
    /// a connect is already in flight.
    Toggle,
    /// Unconditional teardown (the assistant panel was closed).
    Disconnect,
    /// Re-emit current status and the transcript window.
    Status,
    /// Tear down and exit the loop.
    Shutdown,
}

/// Everything a successful connect hands back to the loop.
struct SessionParts {
    session: LiveSession,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    source: Box<dyn SampleSource>,
    scheduler: PlaybackScheduler,
    drained_rx: mpsc::Receiver<()>,
}

struct ConnectOutcome {
    generation: u64,
    result: Result<SessionParts>,
}

pub struct SessionController {
    config: LiveConfig,
    data_dir: PathBuf,
    backend: Arc<dyn AudioBackend>,
    events_tx: mpsc::UnboundedSender<VoiceEvent>,
    status: Status,
    /// Bumped when a connect starts and on every teardown. Connect
    /// completions carrying an older value are discarded.
    generation: u64,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    session: Option<LiveSession>,
    session_events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    source: Option<Box<dyn SampleSource>>,
    scheduler: Option<PlaybackScheduler>,
    drained: Option<mpsc::Receiver<()>>,
    blocks: Option<mpsc::Receiver<AudioBlock>>,
    transcript: TranscriptLog,
}

impl SessionController {
    pub fn new(
        config: LiveConfig,
        data_dir: PathBuf,
        backend: Arc<dyn AudioBackend>,
        events_tx: mpsc::UnboundedSender<VoiceEvent>,
    ) -> Self {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        Self {
            config,
            data_dir,
            backend,
            events_tx,
            status: Status::Idle,
            generation: 0,
            connect_tx,
            connect_rx,
            session: None,
            session_events: None,
            source: None,
            scheduler: None,
            drained: None,
            blocks: None,
            transcript: TranscriptLog::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Run until a `Shutdown` command arrives or the command channel
    /// closes. Consumes the controller; all session resources are released
    /// before returning.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ControllerCommand>) {
        info!(backend = self.backend.name(), "Session controller running");
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ControllerCommand::Toggle) => self.handle_toggle().await,
                    Some(ControllerCommand::Disconnect) => {
                        // Panel closed: drop the session and the display
                        // history. A plain toggle-off keeps the transcript.
                        self.teardown().await;
                        self.transcript.clear();
                    }
                    Some(ControllerCommand::Status) => self.report_status(),
                    Some(ControllerCommand::Shutdown) | None => {
                        self.teardown().await;
                        break;
                    }
                },
                outcome = self.connect_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_connect_outcome(outcome).await;
                    }
                },
                ev = recv_opt_unbounded(&mut self.session_events) => {
                    self.handle_session_event(ev).await;
                },
                block = recv_opt(&mut self.blocks) => {
                    if let Some(session) = &self.session {
                        session.send_audio(pcm::encode_base64(&block.samples));
                    }
                },
                _ = recv_opt(&mut self.drained) => {
                    self.handle_playback_drained();
                },
            }
        }
        info!("Session controller stopped");
    }

    async fn handle_toggle(&mut self) {
        match self.status {
            Status::Idle => self.start_connect(),
            Status::Connecting => {
                info!("Toggle ignored, connect already in flight");
            }
            Status::Listening | Status::Speaking => {
                info!("Toggle while active, ending conversation");
                self.teardown().await;
            }
        }
    }

    fn start_connect(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.set_status(Status::Connecting);

        let config = self.config.clone();
        let data_dir = self.data_dir.clone();
        let backend = self.backend.clone();
        let outcome_tx = self.connect_tx.clone();
        tokio::spawn(async move {
            let result = open_session(&config, &data_dir, backend).await;
            let _ = outcome_tx.send(ConnectOutcome { generation, result });
        });
    }

    async fn handle_connect_outcome(&mut self, outcome: ConnectOutcome) {
        if outcome.generation != self.generation {
            // A teardown happened while this connect was in flight. Nothing
            // may start from it, including capture.
            if let Ok(parts) = outcome.result {
                info!("Disposing session from superseded connect");
                dispose_parts(parts);
            }
            return;
        }

        let parts = match outcome.result {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.emit(VoiceEvent::Error {
                    message: e.to_string(),
                });
                self.set_status(Status::Idle);
                return;
            }
        };
        let SessionParts {
            session,
            events_rx,
            mut source,
            scheduler,
            drained_rx,
        } = parts;

        // The session is open; only now may the microphone start feeding
        // it. Stream setup talks to the host audio layer, so it runs on
        // the blocking pool and hands the source back when done.
        let (block_tx, block_rx) = mpsc::channel(1);
        let started = tokio::task::spawn_blocking(move || {
            let result = source.start(block_tx);
            (source, result)
        })
        .await;
        let (source, started) = match started {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Capture start task failed: {}", e);
                self.emit(VoiceEvent::Error {
                    message: format!("capture start failed: {e}"),
                });
                tokio::spawn(async move {
                    let mut session = session;
                    scheduler.stop_all();
                    session.disconnect().await;
                });
                self.set_status(Status::Idle);
                return;
            }
        };
        if let Err(e) = started {
            warn!("Capture failed to start: {}", e);
            self.emit(VoiceEvent::Error {
                message: e.to_string(),
            });
            dispose_parts(SessionParts {
                session,
                events_rx,
                source,
                scheduler,
                drained_rx,
            });
            self.set_status(Status::Idle);
            return;
        }

        self.session = Some(session);
        self.session_events = Some(events_rx);
        self.source = Some(source);
        self.scheduler = Some(scheduler);
        self.drained = Some(drained_rx);
        self.blocks = Some(block_rx);
        self.set_status(Status::Listening);
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Audio(decoded) => {
                let scheduled = match &self.scheduler {
                    Some(scheduler) => scheduler.schedule(decoded),
                    None => return,
                };
                match scheduled {
                    Ok(Some(_)) => {
                        if self.status == Status::Listening {
                            self.set_status(Status::Speaking);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to schedule playback: {}", e),
                }
            }
            SessionEvent::Transcript { text, is_user } => {
                if let Some(line) = self.transcript.push(&text, is_user) {
                    let event = VoiceEvent::Transcript {
                        text: line.text.clone(),
                        is_user: line.is_user,
                    };
                    self.emit(event);
                }
            }
            SessionEvent::TurnComplete => {
                debug!("Server turn complete");
            }
            SessionEvent::Error(e) => {
                warn!("Session error: {}", e);
                self.emit(VoiceEvent::Error {
                    message: e.to_string(),
                });
                self.teardown().await;
            }
            SessionEvent::Closed => {
                info!("Session closed by server");
                self.teardown().await;
            }
        }
    }

    /// The last scheduled unit finished. Back to listening unless new
    /// audio was scheduled between the signal and now.
    fn handle_playback_drained(&mut self) {
        let playback_idle = self
            .scheduler
            .as_ref()
            .map(|s| s.in_flight() == 0)
            .unwrap_or(false);
        if playback_idle && self.status == Status::Speaking {
            self.set_status(Status::Listening);
        }
    }

    fn report_status(&self) {
        self.emit(VoiceEvent::Status {
            status: self.status.to_string(),
        });
        for line in self.transcript.lines() {
            self.emit(VoiceEvent::Transcript {
                text: line.text.clone(),
                is_user: line.is_user,
            });
        }
    }

    /// Release everything in dependency order: capture first so no more
    /// blocks feed the network, then playback, then the socket. Safe to
    /// call at any time, any number of times.
    async fn teardown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.blocks = None;
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop_all();
        }
        self.drained = None;
        self.session_events = None;
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
        }
        self.set_status(Status::Idle);
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }
        info!(from = %self.status, to = %status, "Status change");
        self.status = status;
        self.emit(VoiceEvent::Status {
            status: status.to_string(),
        });
    }

    fn emit(&self, event: VoiceEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Connect-task body: acquire the devices, load the assistant context, open
/// the session. Runs off the controller loop so commands stay responsive.
async fn open_session(
    config: &LiveConfig,
    data_dir: &std::path::Path,
    backend: Arc<dyn AudioBackend>,
) -> Result<SessionParts> {
    // Device problems surface before any network work is done. The opens
    // talk to the host audio layer, so they run on the blocking pool.
    let device_name = config.input_device.clone();
    let (source, sink) = tokio::task::spawn_blocking(move || {
        let source = backend.open_source(device_name.as_deref())?;
        let sink = backend.open_sink()?;
        Ok::<_, VoiceError>((source, sink))
    })
    .await
    .map_err(|e| VoiceError::DeviceUnavailable(format!("device open task: {e}")))??;
    let (drained_tx, drained_rx) = mpsc::channel(1);
    let scheduler = PlaybackScheduler::new(sink, drained_tx);

    let context = AssistantContext::load(data_dir);
    let instruction = context.system_instruction();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = LiveSession::connect(config, &instruction, events_tx).await?;

    Ok(SessionParts {
        session,
        events_rx,
        source,
        scheduler,
        drained_rx,
    })
}

/// Tear down session parts that never made it into the controller.
fn dispose_parts(parts: SessionParts) {
    tokio::spawn(async move {
        let mut parts = parts;
        parts.source.stop();
        parts.scheduler.stop_all();
        parts.session.disconnect().await;
    });
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> T {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(value) => value,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn recv_opt_unbounded<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> T {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(value) => value,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
