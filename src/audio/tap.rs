//! Analysis tap on the final output mix.
//!
//! The output callback pushes every rendered block into an [`AudioTap`]; the
//! level analyser reads the most recent window.  Pushing never alters the
//! signal, it only copies a mono downmix into a fixed-capacity ring.
//!
//! ```rust
//! use prompt_dj::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]); // oldest sample dropped
//! assert_eq!(buf.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity circular buffer that keeps the newest `capacity` samples.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    /// Index of the next write position.
    write_pos: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![T::default(); capacity.max(1)],
            write_pos: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        let cap = self.buf.len();
        self.buf[self.write_pos] = item;
        self.write_pos = (self.write_pos + 1) % cap;
        self.len = (self.len + 1).min(cap);
    }

    pub fn push_slice(&mut self, data: &[T]) {
        data.iter().for_each(|&item| self.push(item));
    }

    /// Stored samples, oldest first.  The buffer is left untouched.
    pub fn snapshot(&self) -> Vec<T> {
        let cap = self.buf.len();
        let start = (self.write_pos + cap - self.len) % cap;
        (0..self.len).map(|i| self.buf[(start + i) % cap]).collect()
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// AudioTap
// ---------------------------------------------------------------------------

/// Shared handle to the analysis window.  Cloning shares the same ring.
#[derive(Clone)]
pub struct AudioTap {
    ring: Arc<Mutex<RingBuffer<f32>>>,
}

impl AudioTap {
    /// A tap holding `window_ms` of mono audio at `sample_rate`.
    pub fn new(sample_rate: u32, window_ms: u32) -> Self {
        let capacity = (u64::from(sample_rate) * u64::from(window_ms) / 1000) as usize;
        Self {
            ring: Arc::new(Mutex::new(RingBuffer::new(capacity))),
        }
    }

    /// Copy an interleaved block into the window, averaging channels.
    pub fn push(&self, interleaved: &[f32], channels: u16) {
        let ch = channels.max(1) as usize;
        let mut ring = self.ring.lock();
        for frame in interleaved.chunks_exact(ch) {
            ring.push(frame.iter().sum::<f32>() / ch as f32);
        }
    }

    /// The current analysis window, oldest first.
    pub fn window(&self) -> Vec<f32> {
        self.ring.lock().snapshot()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
