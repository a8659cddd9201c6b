//! Audio capture, playback scheduling, and the PCM wire codec.

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod ring_buffer;

use std::sync::Arc;

use crate::error::Result;

pub use capture::{MicSource, SampleSource};
pub use pcm::{decode_base64, encode_base64, DecodedAudio};
pub use playback::{PlaybackScheduler, SampleSink, SpeakerSink};

/// Microphone capture rate expected by the live endpoint.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Response audio rate produced by the live endpoint.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Capture block size in samples (~256 ms at 16 kHz). One block is the
/// unit of encoding and transmission.
pub const BLOCK_SAMPLES: usize = 4096;

/// One fixed-size captured block, ready for encoding.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Factory for the two device seams. The controller opens a fresh
/// source/sink pair per session so no two sessions ever share a device.
/// Tests substitute synthetic backends.
pub trait AudioBackend: Send + Sync {
    fn open_source(&self, device_name: Option<&str>) -> Result<Box<dyn SampleSource>>;
    fn open_sink(&self) -> Result<Arc<dyn SampleSink>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Real system devices: cpal microphone in, rodio speaker out.
pub struct DeviceBackend;

impl AudioBackend for DeviceBackend {
    fn open_source(&self, device_name: Option<&str>) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(MicSource::open(device_name)?))
    }

    fn open_sink(&self) -> Result<Arc<dyn SampleSink>> {
        Ok(Arc::new(SpeakerSink::open()?))
    }

    fn name(&self) -> &str {
        "cpal/rodio"
    }
}
