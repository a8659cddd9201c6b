//! One live voice session over WebSocket.
//!
//! `LiveSession::connect` dials the endpoint, performs the setup
//! handshake, and spawns the stream loop that owns both halves of the
//! socket. Outbound audio goes through a bounded queue so a stalled
//! network never blocks the capture side, and every socket write carries
//! a deadline so a peer that stops reading cannot pin the loop. Inbound
//! frames are classified and surfaced as [`SessionEvent`]s on an
//! unbounded channel.
//!
//! The session is single-use. After `disconnect` (or a server close or
//! stream error) the phase is `Closed` and a new conversation needs a
//! fresh `connect`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use http::HeaderValue;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::pcm::{self, DecodedAudio};
use crate::audio::PLAYBACK_SAMPLE_RATE;
use crate::config::LiveConfig;
use crate::error::{Result, VoiceError};
use crate::live::protocol::{classify, ClientMessage, ServerEvent};
use crate::live::state::{SessionPhase, SessionPhaseMachine};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Outbound audio blocks buffered toward the socket before new ones are
/// dropped. Each block is ~256ms of capture audio.
const AUDIO_QUEUE_DEPTH: usize = 8;

/// Ceiling on any single socket write. A peer that stops draining its
/// side of the connection is treated as gone once this lapses.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// What a session reports back to its owner while streaming.
#[derive(Debug)]
pub enum SessionEvent {
    /// Decoded playback audio from a response turn.
    Audio(DecodedAudio),
    /// A transcription fragment for the user or the assistant.
    Transcript { text: String, is_user: bool },
    /// The server finished its current response turn.
    TurnComplete,
    /// The stream failed; the session is closed.
    Error(VoiceError),
    /// The server closed the stream normally.
    Closed,
}

/// Handle to an open session. Dropping it cancels the stream loop;
/// `disconnect` does the same but waits for the loop to finish.
pub struct LiveSession {
    id: Uuid,
    phase: Arc<SessionPhaseMachine>,
    audio_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Dial the endpoint, send the setup frame, and wait for the server's
    /// acknowledgment. Returns only once the session is fully open, so
    /// the caller can gate capture start on it.
    pub async fn connect(
        config: &LiveConfig,
        system_instruction: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let phase = SessionPhaseMachine::new();
        phase.begin_connect();

        let api_key = config.resolve_api_key()?;
        let endpoint = config.endpoint();
        let model = config.model();
        info!(session = %id, model = %model, "connecting live session");

        let mut request = endpoint
            .into_client_request()
            .map_err(|e| VoiceError::Connection(format!("invalid endpoint: {e}")))?;
        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| VoiceError::Config("API key contains invalid characters".to_string()))?;
        request.headers_mut().insert("x-goog-api-key", key_value);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| VoiceError::Connection(format!("websocket handshake failed: {e}")))?;
        let (mut write, mut read) = stream.split();

        let setup = ClientMessage::setup(model, config.voice(), system_instruction);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| VoiceError::Protocol(format!("failed to encode setup: {e}")))?;
        send_with_deadline(&mut write, Message::Text(setup_json)).await?;

        wait_for_setup_ack(&mut write, &mut read).await?;
        phase.mark_open();
        info!(session = %id, "live session open");

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_stream_loop(
            id,
            write,
            read,
            audio_rx,
            events,
            phase.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            id,
            phase,
            audio_tx,
            cancel,
            task: Some(task),
        })
    }

    /// Queue one base64 PCM block for the stream loop. Silently drops the
    /// block when the session is not open or the queue is full, so the
    /// capture path never observes network backpressure.
    pub fn send_audio(&self, base64_pcm: String) {
        if self.phase.current() != SessionPhase::Open {
            return;
        }
        match self.audio_tx.try_send(base64_pcm) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(session = %self.id, "outbound audio queue full, dropping block");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Stop the stream loop and close the socket. Safe to call more than
    /// once; later calls return immediately.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if task.await.is_err() {
                debug!(session = %self.id, "stream loop task did not exit cleanly");
            }
        }
        if self.phase.close() {
            info!(session = %self.id, "live session closed");
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Ensures the stream loop dies even if the owner never called
        // disconnect.
        self.cancel.cancel();
    }
}

/// Read frames until the server acknowledges the setup message. Anything
/// else arriving first is skipped; a close or transport error fails the
/// handshake.
async fn wait_for_setup_ack(write: &mut WsWriter, read: &mut WsReader) -> Result<()> {
    loop {
        let frame = match read.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                return Err(VoiceError::Connection(format!(
                    "websocket error during setup: {e}"
                )));
            }
            None => {
                return Err(VoiceError::Connection(
                    "connection closed during setup".to_string(),
                ));
            }
        };
        match frame {
            Message::Text(text) => {
                if acknowledges_setup(&text) {
                    return Ok(());
                }
            }
            Message::Binary(bytes) => {
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    if acknowledges_setup(text) {
                        return Ok(());
                    }
                }
            }
            Message::Ping(payload) => {
                let _ = send_with_deadline(write, Message::Pong(payload)).await;
            }
            Message::Close(_) => {
                return Err(VoiceError::Connection(
                    "server closed the connection during setup".to_string(),
                ));
            }
            _ => {}
        }
    }
}

fn acknowledges_setup(raw: &str) -> bool {
    match classify(raw) {
        Ok(events) => events.iter().any(|e| matches!(e, ServerEvent::SetupComplete)),
        Err(e) => {
            debug!("ignoring unparseable frame during setup: {e}");
            false
        }
    }
}

/// Write one frame, giving the transport [`SEND_TIMEOUT`] to accept it.
async fn send_with_deadline<W>(write: &mut W, message: Message) -> Result<()>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(SEND_TIMEOUT, write.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(VoiceError::Connection(e.to_string())),
        Err(_) => Err(VoiceError::Connection(format!(
            "websocket send stalled for over {}s",
            SEND_TIMEOUT.as_secs()
        ))),
    }
}

/// Owns both socket halves after the handshake. Exits on cancellation,
/// stream error, server close, a stalled write, or the owner dropping
/// the audio sender.
async fn run_stream_loop<W, R>(
    id: Uuid,
    mut write: W,
    mut read: R,
    mut audio_rx: mpsc::Receiver<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    phase: Arc<SessionPhaseMachine>,
    cancel: CancellationToken,
) where
    W: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send_with_deadline(&mut write, Message::Close(None)).await;
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(id, &text, &events);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch_frame(id, text, &events),
                        Err(_) => debug!(session = %id, "ignoring non-utf8 binary frame"),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = send_with_deadline(&mut write, Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    if phase.close() {
                        info!(session = %id, "server closed the stream");
                        let _ = events.send(SessionEvent::Closed);
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if phase.close() {
                        warn!(session = %id, "websocket stream error: {e}");
                        let _ = events.send(SessionEvent::Error(VoiceError::Connection(
                            e.to_string(),
                        )));
                    }
                    break;
                }
            },
            chunk = audio_rx.recv() => match chunk {
                Some(base64_pcm) => {
                    let msg = ClientMessage::realtime_audio(base64_pcm);
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            debug!(session = %id, "failed to encode audio frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = send_with_deadline(&mut write, Message::Text(json)).await {
                        if phase.close() {
                            warn!(session = %id, "failed to send audio: {e}");
                            let _ = events.send(SessionEvent::Error(e));
                        }
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!(session = %id, "stream loop exited");
}

/// Classify one inbound frame and forward its events. Malformed audio
/// payloads are dropped here so one bad block never ends the session.
fn dispatch_frame(id: Uuid, raw: &str, events: &mpsc::UnboundedSender<SessionEvent>) {
    let classified = match classify(raw) {
        Ok(classified) => classified,
        Err(e) => {
            debug!(session = %id, "ignoring unparseable frame: {e}");
            return;
        }
    };
    for event in classified {
        match event {
            ServerEvent::SetupComplete => {
                debug!(session = %id, "unexpected setupComplete after open");
            }
            ServerEvent::Audio { data } => match pcm::decode_base64(&data, PLAYBACK_SAMPLE_RATE) {
                Ok(decoded) => {
                    let _ = events.send(SessionEvent::Audio(decoded));
                }
                Err(e) => {
                    warn!(session = %id, "dropping malformed audio block: {e}");
                }
            },
            ServerEvent::Transcript { text, is_user } => {
                let _ = events.send(SessionEvent::Transcript { text, is_user });
            }
            ServerEvent::TurnComplete => {
                let _ = events.send(SessionEvent::TurnComplete);
            }
        }
    }
}
