//! Response audio output: rodio sink behind the sample-sink seam, and the
//! gapless playback scheduler.
//!
//! Response audio arrives as a stream of decoded units, bursty and not in
//! real time. The scheduler keeps a `next_start` cursor on one output
//! timeline: each unit starts at `max(next_start, now)` and advances the
//! cursor by its duration, so units play back-to-back with no gap and no
//! overlap regardless of arrival timing. A completion watcher per unit
//! maintains the in-flight set and fires a drained signal when the last
//! unit ends (the controller flips status back to listening on it).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::pcm::DecodedAudio;
use crate::error::{Result, VoiceError};

/// Push seam for response audio: something that plays enqueued buffers
/// back-to-back. The real implementation is [`SpeakerSink`]; tests
/// substitute recording sinks.
pub trait SampleSink: Send + Sync {
    /// Enqueue a buffer for output. Buffers play sequentially in the order
    /// they are handed over.
    fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()>;

    /// Halt everything queued or playing.
    fn stop_all(&self);
}

// ---------------------------------------------------------------------------
// SpeakerSink (rodio)
// ---------------------------------------------------------------------------

/// Real output device. The rodio `OutputStream` is not `Send`, so it lives
/// on a dedicated thread that parks until the sink is dropped; dropping the
/// stream releases the output device.
pub struct SpeakerSink {
    sink: Sink,
    shutdown_tx: std::sync::mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Open the default audio output device.
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<Sink>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                            "failed to open audio output: {e}"
                        ))));
                        return;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                            "failed to create audio sink: {e}"
                        ))));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sink));

                // Park holding the OutputStream until shutdown.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Output thread exiting");
            })
            .map_err(|e| {
                VoiceError::DeviceUnavailable(format!("failed to spawn output thread: {e}"))
            })?;

        let sink = match ready_rx.recv() {
            Ok(Ok(sink)) => sink,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(VoiceError::DeviceUnavailable(
                    "output thread died during startup".to_string(),
                ))
            }
        };

        debug!("Audio output opened");
        Ok(Self {
            sink,
            shutdown_tx,
            thread: Some(thread),
        })
    }
}

impl SampleSink for SpeakerSink {
    fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        self.sink.append(SamplesBuffer::new(1, sample_rate, samples));
        Ok(())
    }

    fn stop_all(&self) {
        self.sink.stop();
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Output thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

struct SchedulerState {
    /// Where the next unit lands on the output timeline.
    next_start: Instant,
    /// Units scheduled but not yet finished.
    in_flight: HashSet<u64>,
    next_id: u64,
    /// Set by stop_all; suppresses late completions and new units.
    stopped: bool,
}

/// Orders decoded response audio onto one gapless output timeline.
pub struct PlaybackScheduler {
    state: Arc<Mutex<SchedulerState>>,
    sink: Arc<dyn SampleSink>,
    drained_tx: mpsc::Sender<()>,
}

impl PlaybackScheduler {
    /// Create a scheduler whose timeline starts now. `drained_tx` receives
    /// a signal whenever the in-flight set becomes empty.
    pub fn new(sink: Arc<dyn SampleSink>, drained_tx: mpsc::Sender<()>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                next_start: Instant::now(),
                in_flight: HashSet::new(),
                next_id: 0,
                stopped: false,
            })),
            sink,
            drained_tx,
        }
    }

    /// Schedule one decoded unit. Returns the computed start time, or
    /// `None` when the unit was discarded (empty, or scheduler stopped).
    pub fn schedule(&self, audio: DecodedAudio) -> Result<Option<Instant>> {
        if audio.samples.is_empty() {
            return Ok(None);
        }
        let duration = audio.duration();

        let (id, start, end) = {
            let mut st = self.state.lock().unwrap();
            if st.stopped {
                return Ok(None);
            }
            let now = Instant::now();
            let start = if st.next_start > now { st.next_start } else { now };
            st.next_start = start + duration;
            let id = st.next_id;
            st.next_id += 1;
            st.in_flight.insert(id);
            (id, start, start + duration)
        };

        self.sink.play(audio.samples, audio.sample_rate)?;
        debug!(unit = id, ?duration, "Scheduled playback unit");

        // Completion watcher. A unit cleared by stop_all is a no-op here:
        // the id is already gone and no drained signal fires.
        let state = Arc::clone(&self.state);
        let drained_tx = self.drained_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(end).await;
            let became_empty = {
                let mut st = state.lock().unwrap();
                st.in_flight.remove(&id) && st.in_flight.is_empty() && !st.stopped
            };
            if became_empty {
                let _ = drained_tx.try_send(());
            }
        });

        Ok(Some(start))
    }

    /// Number of units scheduled but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    /// Current timeline cursor: when the next unit would start at the
    /// earliest.
    pub fn next_start(&self) -> Instant {
        self.state.lock().unwrap().next_start
    }

    /// Forcibly halt every in-flight unit and clear the set. Used during
    /// teardown; tolerates units completing concurrently.
    pub fn stop_all(&self) {
        {
            let mut st = self.state.lock().unwrap();
            st.stopped = true;
            st.in_flight.clear();
        }
        self.sink.stop_all();
        debug!("Playback stopped");
    }
}
