//! End-to-end tests for the session pipeline against a local scripted
//! WebSocket server: setup handshake, capture-to-wire flow, response
//! playback and transcript events, and the teardown paths.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use skintracker_voice::audio::capture::SampleSource;
use skintracker_voice::audio::playback::SampleSink;
use skintracker_voice::audio::{AudioBackend, AudioBlock};
use skintracker_voice::controller::{ControllerCommand, SessionController};
use skintracker_voice::ipc::VoiceEvent;
use skintracker_voice::{LiveConfig, Result, VoiceError};

// ---------------------------------------------------------------------------
// Scripted audio backend
// ---------------------------------------------------------------------------

/// Records what was played instead of touching an output device.
#[derive(Default)]
struct RecordingSink {
    played: Mutex<Vec<usize>>,
    stopped: AtomicBool,
}

impl SampleSink for RecordingSink {
    fn play(&self, samples: Vec<f32>, _sample_rate: u32) -> Result<()> {
        self.played.lock().unwrap().push(samples.len());
        Ok(())
    }

    fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Feeds a fixed set of capture blocks once started.
struct ScriptedSource {
    blocks: Vec<Vec<f32>>,
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl SampleSource for ScriptedSource {
    fn start(&mut self, tx: mpsc::Sender<AudioBlock>) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        let blocks = self.blocks.clone();
        std::thread::spawn(move || {
            for samples in blocks {
                let block = AudioBlock {
                    samples,
                    sample_rate: 16_000,
                };
                if tx.blocking_send(block).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct ScriptedBackend {
    blocks: Vec<Vec<f32>>,
    source_started: Arc<AtomicBool>,
    source_stopped: Arc<AtomicBool>,
    sink: Arc<RecordingSink>,
}

impl ScriptedBackend {
    fn new() -> Self {
        // Three 100ms capture blocks.
        Self {
            blocks: vec![vec![0.25; 1600]; 3],
            source_started: Arc::new(AtomicBool::new(false)),
            source_stopped: Arc::new(AtomicBool::new(false)),
            sink: Arc::new(RecordingSink::default()),
        }
    }
}

impl AudioBackend for ScriptedBackend {
    fn open_source(&self, _device_name: Option<&str>) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(ScriptedSource {
            blocks: self.blocks.clone(),
            started: self.source_started.clone(),
            stopped: self.source_stopped.clone(),
        }))
    }

    fn open_sink(&self) -> Result<Arc<dyn SampleSink>> {
        Ok(self.sink.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Source whose open succeeds but whose stream setup fails.
struct BrokenStartSource;

impl SampleSource for BrokenStartSource {
    fn start(&mut self, _tx: mpsc::Sender<AudioBlock>) -> Result<()> {
        Err(VoiceError::DeviceUnavailable(
            "microphone vanished".to_string(),
        ))
    }

    fn stop(&mut self) {}
}

struct BrokenStartBackend {
    sink: Arc<RecordingSink>,
}

impl AudioBackend for BrokenStartBackend {
    fn open_source(&self, _device_name: Option<&str>) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(BrokenStartSource))
    }

    fn open_sink(&self) -> Result<Arc<dyn SampleSink>> {
        Ok(self.sink.clone())
    }

    fn name(&self) -> &str {
        "broken-start"
    }
}

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

/// What the server observed, shared with the test body.
#[derive(Default)]
struct ServerSeen {
    setup: Mutex<Option<serde_json::Value>>,
    audio_chunks: Mutex<Vec<String>>,
    connections: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Clone)]
struct ServerScript {
    /// Wait this long after the setup frame before acknowledging it.
    ack_delay: Duration,
    /// Frames to send right after the acknowledgment.
    frames: Vec<String>,
    /// Close the connection from the server side after the frames.
    close_after: bool,
}

impl ServerScript {
    fn ack_only() -> Self {
        Self {
            ack_delay: Duration::ZERO,
            frames: Vec::new(),
            close_after: false,
        }
    }

    fn with_frames(frames: Vec<String>) -> Self {
        Self {
            frames,
            ..Self::ack_only()
        }
    }

    fn delayed_ack(delay: Duration) -> Self {
        Self {
            ack_delay: delay,
            ..Self::ack_only()
        }
    }
}

async fn bind_server() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    (endpoint, listener)
}

/// Accept loop: the first connection runs the script, later ones are only
/// counted (the tests assert there are none).
async fn serve(listener: TcpListener, seen: Arc<ServerSeen>, script: ServerScript) {
    let mut first = true;
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                seen.connections.fetch_add(1, Ordering::SeqCst);
                if first {
                    first = false;
                    tokio::spawn(handle_connection(stream, seen.clone(), script.clone()));
                }
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(stream: TcpStream, seen: Arc<ServerSeen>, script: ServerScript) {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket accept failed");

    // First frame must be the setup message.
    let first = ws
        .next()
        .await
        .expect("no setup frame")
        .expect("setup frame read failed");
    let text = first.into_text().expect("setup frame was not text");
    *seen.setup.lock().unwrap() = Some(serde_json::from_str(&text).expect("setup was not json"));

    tokio::time::sleep(script.ack_delay).await;
    ws.send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
        .await
        .expect("ack send failed");

    for frame in script.frames {
        ws.send(Message::Text(frame)).await.expect("frame send failed");
    }

    if script.close_after {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = ws.close(None).await;
    }

    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    if let Some(data) = value
                        .pointer("/realtimeInput/mediaChunks/0/data")
                        .and_then(|d| d.as_str())
                    {
                        seen.audio_chunks.lock().unwrap().push(data.to_string());
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    seen.closed.store(true, Ordering::SeqCst);
}

fn audio_frame(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
        BASE64.encode(&bytes)
    )
}

fn output_transcription(text: &str) -> String {
    format!(r#"{{"serverContent":{{"outputTranscription":{{"text":"{}"}}}}}}"#, text)
}

fn input_transcription(text: &str) -> String {
    format!(r#"{{"serverContent":{{"inputTranscription":{{"text":"{}"}}}}}}"#, text)
}

fn turn_complete() -> String {
    r#"{"serverContent":{"turnComplete":true}}"#.to_string()
}

// ---------------------------------------------------------------------------
// Controller harness
// ---------------------------------------------------------------------------

struct Harness {
    commands: mpsc::UnboundedSender<ControllerCommand>,
    events: mpsc::UnboundedReceiver<VoiceEvent>,
    task: tokio::task::JoinHandle<()>,
}

fn test_config(endpoint: &str) -> LiveConfig {
    LiveConfig {
        api_key: Some("test-key".to_string()),
        model: Some("test-model".to_string()),
        voice: None,
        endpoint: Some(endpoint.to_string()),
        input_device: None,
    }
}

fn spawn_controller(
    config: LiveConfig,
    backend: Arc<dyn AudioBackend>,
    data_dir: PathBuf,
) -> Harness {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (commands, cmd_rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(config, data_dir, backend, event_tx);
    let task = tokio::spawn(controller.run(cmd_rx));
    Harness {
        commands,
        events,
        task,
    }
}

async fn shutdown(harness: Harness) {
    let _ = harness.commands.send(ControllerCommand::Shutdown);
    let _ = tokio::time::timeout(Duration::from_secs(5), harness.task).await;
}

/// Receive events until one matches `stop`, returning everything seen
/// including the match.
async fn events_until<F>(
    rx: &mut mpsc::UnboundedReceiver<VoiceEvent>,
    stop: F,
) -> Vec<VoiceEvent>
where
    F: Fn(&VoiceEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    loop {
        let event = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("event channel closed, saw: {:?}", seen),
            Err(_) => panic!("timed out waiting for event, saw: {:?}", seen),
        };
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn is_status(want: &'static str) -> impl Fn(&VoiceEvent) -> bool {
    move |e| matches!(e, VoiceEvent::Status { status } if status == want)
}

fn status_count(events: &[VoiceEvent], want: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, VoiceEvent::Status { status } if status == want))
        .count()
}

fn has_error(events: &[VoiceEvent]) -> bool {
    events.iter().any(|e| matches!(e, VoiceEvent::Error { .. }))
}

fn transcripts(events: &[VoiceEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            VoiceEvent::Transcript { text, is_user } => Some((text.clone(), *is_user)),
            _ => None,
        })
        .collect()
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..250 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_conversation_flow() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("profile.json"),
        r#"{"skinType": "Dry", "skinGoals": ["Anti-Aging"]}"#,
    )
    .unwrap();

    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    // One second of response audio so the speaking phase is observable.
    let script = ServerScript::with_frames(vec![
        audio_frame(&vec![1000i16; 24_000]),
        input_transcription("Did I finish my routine"),
        output_transcription("You have one step left."),
        turn_complete(),
    ]);
    tokio::spawn(serve(listener, seen.clone(), script));

    let backend = Arc::new(ScriptedBackend::new());
    let sink = backend.sink.clone();
    let source_started = backend.source_started.clone();
    let source_stopped = backend.source_stopped.clone();
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();

    let opening = events_until(&mut harness.events, is_status("listening")).await;
    assert_eq!(status_count(&opening, "connecting"), 1);
    assert!(source_started.load(Ordering::SeqCst));

    // The session setup carried the profile-derived instruction.
    let setup = seen.setup.lock().unwrap().clone().unwrap();
    assert_eq!(setup["setup"]["model"], "models/test-model");
    let instruction = setup["setup"]["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(instruction.contains("Skin Type: Dry"));
    assert!(setup["setup"]["inputAudioTranscription"].is_object());
    assert!(setup["setup"]["outputAudioTranscription"].is_object());

    // Response audio plays, transcripts arrive, then playback drains and
    // the controller goes back to listening.
    let talk = events_until(&mut harness.events, is_status("listening")).await;
    assert_eq!(status_count(&talk, "speaking"), 1);
    let lines = transcripts(&talk);
    assert!(lines.contains(&("Did I finish my routine".to_string(), true)));
    assert!(lines.contains(&("You have one step left.".to_string(), false)));
    assert!(!sink.played.lock().unwrap().is_empty());

    // Capture blocks reached the server as base64 PCM chunks.
    wait_until(
        || !seen.audio_chunks.lock().unwrap().is_empty(),
        "capture audio at the server",
    )
    .await;
    let chunk = seen.audio_chunks.lock().unwrap()[0].clone();
    let decoded = BASE64.decode(chunk).unwrap();
    assert_eq!(decoded.len() % 2, 0);
    assert!(!decoded.is_empty());

    // Toggle off: capture released, playback halted, socket closed.
    harness.commands.send(ControllerCommand::Toggle).unwrap();
    events_until(&mut harness.events, is_status("idle")).await;
    assert!(source_stopped.load(Ordering::SeqCst));
    assert!(sink.stopped.load(Ordering::SeqCst));
    wait_until(|| seen.closed.load(Ordering::SeqCst), "server side close").await;

    shutdown(harness).await;
}

#[tokio::test]
async fn rapid_double_toggle_opens_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    tokio::spawn(serve(
        listener,
        seen.clone(),
        ServerScript::delayed_ack(Duration::from_millis(300)),
    ));

    let backend = Arc::new(ScriptedBackend::new());
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Second press lands while the connect is still in flight.
    harness.commands.send(ControllerCommand::Toggle).unwrap();

    let opening = events_until(&mut harness.events, is_status("listening")).await;
    assert_eq!(status_count(&opening, "connecting"), 1);

    // Give a (wrong) second dial time to land before counting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.connections.load(Ordering::SeqCst), 1);

    shutdown(harness).await;
}

#[tokio::test]
async fn disconnect_mid_connect_discards_deferred_session() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    tokio::spawn(serve(
        listener,
        seen.clone(),
        ServerScript::delayed_ack(Duration::from_millis(400)),
    ));

    let backend = Arc::new(ScriptedBackend::new());
    let source_started = backend.source_started.clone();
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.commands.send(ControllerCommand::Disconnect).unwrap();

    let events = events_until(&mut harness.events, is_status("idle")).await;
    assert_eq!(status_count(&events, "listening"), 0);

    // The connect completes on the server side later; the session must be
    // disposed without capture ever starting.
    wait_until(|| seen.closed.load(Ordering::SeqCst), "stale session disposal").await;
    assert!(!source_started.load(Ordering::SeqCst));
    assert!(seen.audio_chunks.lock().unwrap().is_empty());

    // No stray events after the disposal.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.events.try_recv().is_err());

    shutdown(harness).await;
}

#[tokio::test]
async fn server_close_returns_controller_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    let script = ServerScript {
        close_after: true,
        ..ServerScript::ack_only()
    };
    tokio::spawn(serve(listener, seen.clone(), script));

    let backend = Arc::new(ScriptedBackend::new());
    let source_stopped = backend.source_stopped.clone();
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    let events = events_until(&mut harness.events, is_status("idle")).await;
    assert_eq!(status_count(&events, "listening"), 1);
    assert!(source_stopped.load(Ordering::SeqCst));

    shutdown(harness).await;
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    let script = ServerScript::with_frames(vec![
        "this is not json".to_string(),
        // Well-formed message with a payload that is not valid base64.
        r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"!!!"}}]}}}"#.to_string(),
        output_transcription("Still here."),
    ]);
    tokio::spawn(serve(listener, seen.clone(), script));

    let backend = Arc::new(ScriptedBackend::new());
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    let events = events_until(&mut harness.events, |e| {
        matches!(e, VoiceEvent::Transcript { text, .. } if text == "Still here.")
    })
    .await;
    assert!(!has_error(&events));

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    events_until(&mut harness.events, is_status("idle")).await;

    shutdown(harness).await;
}

#[tokio::test]
async fn streamed_fragments_merge_into_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    let script = ServerScript::with_frames(vec![
        output_transcription("Hi"),
        output_transcription(" there"),
    ]);
    tokio::spawn(serve(listener, seen.clone(), script));

    let backend = Arc::new(ScriptedBackend::new());
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    let events = events_until(&mut harness.events, |e| {
        matches!(e, VoiceEvent::Transcript { text, .. } if text == "Hi there")
    })
    .await;

    // Each fragment re-emits the merged logical line.
    let lines = transcripts(&events);
    assert_eq!(lines, vec![
        ("Hi".to_string(), false),
        ("Hi there".to_string(), false),
    ]);

    shutdown(harness).await;
}

#[tokio::test]
async fn connection_refused_surfaces_error_and_idles() {
    let dir = tempfile::tempdir().unwrap();
    // Bind and immediately drop so the port refuses connections.
    let (endpoint, listener) = bind_server().await;
    drop(listener);

    let backend = Arc::new(ScriptedBackend::new());
    let source_started = backend.source_started.clone();
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    let events = events_until(&mut harness.events, is_status("idle")).await;
    assert_eq!(status_count(&events, "connecting"), 1);
    assert!(has_error(&events));
    assert!(!source_started.load(Ordering::SeqCst));

    shutdown(harness).await;
}

#[tokio::test]
async fn capture_start_failure_closes_the_opened_session() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, listener) = bind_server().await;
    let seen = Arc::new(ServerSeen::default());
    tokio::spawn(serve(listener, seen.clone(), ServerScript::ack_only()));

    let sink = Arc::new(RecordingSink::default());
    let backend = Arc::new(BrokenStartBackend { sink: sink.clone() });
    let mut harness = spawn_controller(
        test_config(&endpoint),
        backend,
        dir.path().to_path_buf(),
    );

    harness.commands.send(ControllerCommand::Toggle).unwrap();
    let events = events_until(&mut harness.events, is_status("idle")).await;
    assert_eq!(status_count(&events, "listening"), 0);
    assert!(events.iter().any(
        |e| matches!(e, VoiceEvent::Error { message } if message.contains("microphone vanished"))
    ));

    // The session had already opened; it must be closed, not leaked, and
    // playback must be halted with it.
    wait_until(|| seen.closed.load(Ordering::SeqCst), "server side close").await;
    assert!(sink.stopped.load(Ordering::SeqCst));
    assert!(seen.audio_chunks.lock().unwrap().is_empty());

    shutdown(harness).await;
}
