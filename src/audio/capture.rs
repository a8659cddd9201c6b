//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device, captures at its native rate,
//! down-mixes and resamples to 16 kHz mono, and delivers fixed 4096-sample
//! blocks over a bounded channel. The cpal stream lives on a dedicated
//! thread (streams are not `Send`); the callback pushes into a lock-free
//! ring buffer and the same thread slices it into blocks.
//!
//! Delivery uses `try_send` on a capacity-1 channel: at most one block is
//! in flight, and a block that arrives while the previous one is still
//! being encoded/sent is dropped. Voice loss is tolerable; stale audio
//! piling up is not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ring_buffer::{sample_ring_buffer, DEFAULT_CAPACITY};
use super::{AudioBlock, BLOCK_SAMPLES, CAPTURE_SAMPLE_RATE};
use crate::error::{Result, VoiceError};

/// How long the block pump sleeps when the ring buffer has no full block.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pull seam for captured audio: something that delivers fixed-size f32
/// blocks into a channel. The real implementation is [`MicSource`]; tests
/// substitute scripted sources.
pub trait SampleSource: Send {
    /// Begin delivering blocks into `tx`. Called at most once per source,
    /// only after the session channel is open.
    fn start(&mut self, tx: mpsc::Sender<AudioBlock>) -> Result<()>;

    /// Detach the tap and release the device. Idempotent; safe to call
    /// before `start` and safe to call repeatedly.
    fn stop(&mut self);
}

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| {
                VoiceError::DeviceUnavailable(format!("failed to enumerate input devices: {e}"))
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                VoiceError::DeviceUnavailable(format!("input device not found: {name}"))
            })?
    } else {
        host.default_input_device().ok_or_else(|| {
            VoiceError::DeviceUnavailable("no default input device".to_string())
        })?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device.default_input_config().map_err(|e| {
        VoiceError::DeviceUnavailable(format!("failed to get default input config: {e}"))
    })?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    // Always request f32 at the native rate; we resample ourselves.
    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {} Hz mono if needed)",
        CAPTURE_SAMPLE_RATE,
    );

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler from `from_rate` to `to_rate`.
/// Operates on mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// The real microphone source.
pub struct MicSource {
    device_name: Option<String>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MicSource {
    /// Resolve the capture device up front so a missing/denied microphone
    /// fails the connect before any network work happens.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        resolve_device(device_name)?;
        Ok(Self {
            device_name: device_name.map(|s| s.to_string()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }
}

impl SampleSource for MicSource {
    fn start(&mut self, tx: mpsc::Sender<AudioBlock>) -> Result<()> {
        if self.thread.is_some() {
            return Err(VoiceError::DeviceUnavailable(
                "capture already started".to_string(),
            ));
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        let device_name = self.device_name.clone();

        // The thread reports stream construction success/failure back so
        // device errors propagate synchronously out of start().
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let handle = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let cfg = match resolve_device(device_name.as_deref()) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let (mut producer, mut consumer) = sample_ring_buffer(DEFAULT_CAPACITY);
                let native_rate = cfg.native_rate;
                let channels = cfg.stream_config.channels;
                let needs_resample = native_rate != CAPTURE_SAMPLE_RATE;
                let needs_downmix = channels > 1;

                let stream = match cfg.device.build_input_stream(
                    &cfg.stream_config,
                    move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                        let mono = if needs_downmix {
                            to_mono(data, channels)
                        } else {
                            data.to_vec()
                        };
                        let resampled = if needs_resample {
                            resample_linear(&mono, native_rate, CAPTURE_SAMPLE_RATE)
                        } else {
                            mono
                        };
                        // A full ring buffer rejects the excess; the pump
                        // will catch up on the next wake.
                        producer.push_slice(&resampled);
                    },
                    move |err| {
                        error!("Audio input stream error: {}", err);
                    },
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                            "failed to build input stream: {e}"
                        ))));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                        "failed to start input stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                info!("Microphone capture started");

                // Block pump: slice the ring buffer into fixed-size blocks
                // and forward them. Runs until stop() flips the flag or the
                // session side drops its receiver.
                let mut block = vec![0.0f32; BLOCK_SAMPLES];
                while !stop_flag.load(Ordering::SeqCst) {
                    if consumer.available() >= BLOCK_SAMPLES {
                        let read = consumer.pop_slice(&mut block);
                        let samples = block[..read].to_vec();
                        match tx.try_send(AudioBlock {
                            samples,
                            sample_rate: CAPTURE_SAMPLE_RATE,
                        }) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                debug!("block channel full, dropping block");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!("block channel closed, stopping pump");
                                break;
                            }
                        }
                    } else {
                        std::thread::sleep(PUMP_POLL_INTERVAL);
                    }
                }

                // Dropping the stream releases the microphone.
                drop(stream);
                debug!("Capture thread exiting");
            })
            .map_err(|e| {
                VoiceError::DeviceUnavailable(format!("failed to spawn capture thread: {e}"))
            })?;

        self.thread = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                // Thread has already exited after reporting the failure.
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                Err(e)
            }
            Err(_) => {
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                Err(VoiceError::DeviceUnavailable(
                    "capture thread died during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
            info!("Microphone released");
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.stop();
    }
}
