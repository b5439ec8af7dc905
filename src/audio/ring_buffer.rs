//! Lock-free SPSC ring buffer for audio samples.
//!
//! Uses the `ringbuf` crate to pass f32 samples from the cpal callback
//! thread to the frame-assembly thread without locks. The consumer side
//! pops fixed-size frames so downstream code only ever sees whole frames.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Producer half — lives in the cpal audio callback.
pub struct AudioProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half — lives in the frame-assembly thread.
pub struct AudioConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair backed by a lock-free ring buffer.
pub fn audio_ring_buffer(capacity: usize) -> (AudioProducer, AudioConsumer) {
    let rb = HeapRb::<f32>::new(capacity);
    let (prod, cons) = rb.split();
    (AudioProducer { inner: prod }, AudioConsumer { inner: cons })
}

impl AudioProducer {
    /// Push a slice of samples. Returns the number actually written; when
    /// the buffer is full the remainder is dropped and the consumer will
    /// catch up.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

// Safety: the ringbuf producer is designed to be used from a single thread.
// cpal callbacks run on a dedicated audio thread, so this is fine.
unsafe impl Send for AudioProducer {}

impl AudioConsumer {
    /// Pop exactly `frame_len` samples if that many are available.
    pub fn pop_frame(&mut self, frame_len: usize) -> Option<Vec<f32>> {
        if self.available() < frame_len {
            return None;
        }
        let mut buf = vec![0.0f32; frame_len];
        let read = self.inner.pop_slice(&mut buf);
        buf.truncate(read);
        Some(buf)
    }

    /// Number of samples currently available for reading.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }
}

unsafe impl Send for AudioConsumer {}
