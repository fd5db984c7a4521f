//! Bounded sample ring between [`super::OutputSink::write`] and the device callback.
//!
//! Stands in for the DMA buffer ring of a hardware peripheral:
//! - writer thread → [`SampleRing::write_bytes`] (blocks up to a deadline for space)
//! - device callback → [`SampleRing::pop_into`] (never waits)

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::codec::{BitDepth, sample_to_f32};

/// Interleaved `f32` samples with a fixed frame capacity.
pub struct SampleRing {
    channels: usize,
    capacity_frames: usize,
    inner: Mutex<VecDeque<f32>>,
    cv: Condvar,
}

impl SampleRing {
    /// Storage for `capacity_frames` frames is reserved up front.
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        let capacity_frames = capacity_frames.max(1);
        Self {
            channels,
            capacity_frames,
            inner: Mutex::new(VecDeque::with_capacity(capacity_frames * channels)),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().len() / self.channels
    }

    /// Fill level in percent.
    pub fn utilization_percent(&self) -> f32 {
        self.len_frames() as f32 * 100.0 / self.capacity_frames as f32
    }

    /// Decode whole frames from `bytes` into the ring, waiting until `deadline` for space.
    ///
    /// Returns the number of bytes accepted, always a multiple of the frame size. Fewer than
    /// `bytes.len()` means the deadline passed with the ring still full.
    pub fn write_bytes(&self, bytes: &[u8], depth: BitDepth, deadline: Instant) -> usize {
        let width = depth.bytes();
        let frame_bytes = width * self.channels;
        let total_frames = bytes.len() / frame_bytes;
        let cap_samples = self.capacity_frames * self.channels;
        let mut frames_done = 0usize;

        let mut g = self.lock();
        while frames_done < total_frames {
            let free_frames = (cap_samples - g.len().min(cap_samples)) / self.channels;
            if free_frames == 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (ng, _timeout) = self
                    .cv
                    .wait_timeout(g, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                g = ng;
                continue;
            }

            let take = free_frames.min(total_frames - frames_done);
            let start = frames_done * frame_bytes;
            let end = start + take * frame_bytes;
            g.extend(
                bytes[start..end]
                    .chunks_exact(width)
                    .map(|raw| sample_to_f32(raw, depth)),
            );
            frames_done += take;
        }
        frames_done * frame_bytes
    }

    /// Move up to `out.len()` samples into `out`. Never blocks on the condition variable.
    ///
    /// Returns the number of samples copied.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let mut g = self.lock();
        let n = out.len().min(g.len());
        for (dst, src) in out[..n].iter_mut().zip(g.drain(..n)) {
            *dst = src;
        }
        drop(g);
        if n > 0 {
            self.cv.notify_all();
        }
        n
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().clear();
        self.cv.notify_all();
    }

    /// Wait until the callback has drained the ring, or `timeout` passes.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while !g.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        true
    }
}
