//! Lock-free SPSC ring buffer for audio samples.
//!
//! Uses the `ringbuf` crate to pass f32 samples from the cpal callback to
//! the block pump on the capture thread without locks. Sized for several
//! seconds of audio so a briefly stalled pump loses nothing.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: ~10 seconds of 16 kHz mono audio.
pub const DEFAULT_CAPACITY: usize = 160_000;

/// Producer half — lives in the cpal audio callback.
pub struct SampleProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half — lives in the block pump loop.
pub struct SampleConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair backed by a lock-free ring buffer.
pub fn sample_ring_buffer(capacity: usize) -> (SampleProducer, SampleConsumer) {
    let rb = HeapRb::<f32>::new(capacity);
    let (prod, cons) = rb.split();
    (
        SampleProducer { inner: prod },
        SampleConsumer { inner: cons },
    )
}

impl SampleProducer {
    /// Push a slice of samples into the ring buffer.
    /// Returns the number of samples actually written (may be less than
    /// `samples.len()` if the buffer is full; existing data wins).
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

// Safety: the ringbuf producer is designed to be used from a single thread.
// cpal callbacks run on a dedicated audio thread, so this is fine.
unsafe impl Send for SampleProducer {}

impl SampleConsumer {
    /// Pop up to `buf.len()` samples from the ring buffer into `buf`.
    /// Returns the number of samples actually read.
    pub fn pop_slice(&mut self, buf: &mut [f32]) -> usize {
        self.inner.pop_slice(buf)
    }

    /// Number of samples currently available for reading.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }
}

unsafe impl Send for SampleConsumer {}
