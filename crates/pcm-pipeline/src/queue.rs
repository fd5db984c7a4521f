//! Bounded FIFO of [`AudioChunk`]s between the producer and consumer contexts.
//!
//! The queue is the only synchronized structure in the pipeline:
//! - producer → [`ChunkQueue::send`] (never blocks; full-queue handling is an [`OverflowPolicy`])
//! - consumer → [`ChunkQueue::receive`] (blocks up to a timeout)
//!
//! Every slot owns its own storage, preallocated at construction. Send and receive copy one whole
//! chunk under the lock, so the queue never holds a partial chunk and never allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::chunk::AudioChunk;
use crate::status::LogThrottle;

/// What a producer wants done when the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the incoming chunk; queued chunks are untouched.
    DropNewest,
    /// Discard the oldest queued chunk and append the incoming one.
    EvictOldest,
}

/// Result of [`ChunkQueue::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue was full; the new chunk was discarded.
    Dropped,
    /// Queue was full; the oldest chunk was discarded to make room.
    Evicted,
}

/// Thread-safe fixed-capacity chunk queue.
///
/// ## Design
/// - Ring of `depth` preallocated slots guarded by one mutex.
/// - A single [`Condvar`] signals "state changed" to both sides.
/// - Overflow counters are atomics so status reads never take the lock.
pub struct ChunkQueue {
    inner: Mutex<Ring>,
    cv: Condvar,
    depth: usize,
    chunk_capacity: usize,
    dropped: AtomicU64,
    evicted: AtomicU64,
    overflow_log: LogThrottle,
}

struct Ring {
    slots: Vec<AudioChunk>,
    head: usize,
    len: usize,
}

impl Ring {
    fn tail_index(&self) -> usize {
        (self.head + self.len) % self.slots.len()
    }

    fn pop_front_into(&mut self, out: &mut AudioChunk) {
        out.copy_from(&self.slots[self.head]);
        self.discard_front();
    }

    fn discard_front(&mut self) {
        self.slots[self.head].clear();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
    }

    fn push_back(&mut self, chunk: &AudioChunk) {
        let idx = self.tail_index();
        self.slots[idx].copy_from(chunk);
        self.len += 1;
    }
}

impl ChunkQueue {
    /// Create a queue of `depth` slots, each holding up to `chunk_capacity` samples.
    ///
    /// A depth of zero is bumped to one.
    pub fn new(depth: usize, chunk_capacity: usize) -> Self {
        let depth = depth.max(1);
        let slots = (0..depth)
            .map(|_| AudioChunk::with_capacity(chunk_capacity))
            .collect();
        Self {
            inner: Mutex::new(Ring {
                slots,
                head: 0,
                len: 0,
            }),
            cv: Condvar::new(),
            depth,
            chunk_capacity,
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            overflow_log: LogThrottle::new(Duration::from_secs(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.depth
    }

    /// Samples per slot.
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Current occupancy (best-effort snapshot).
    pub fn count(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.depth
    }

    pub fn free_slots(&self) -> usize {
        self.depth - self.count()
    }

    /// Chunks discarded by [`OverflowPolicy::DropNewest`].
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Chunks discarded by [`OverflowPolicy::EvictOldest`].
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Every send that found the queue full.
    pub fn overflow_count(&self) -> u64 {
        self.dropped_count() + self.evicted_count()
    }

    /// Enqueue a copy of `chunk` if a slot is free. Never blocks.
    pub fn try_send(&self, chunk: &AudioChunk) -> bool {
        let mut g = self.lock();
        if g.len >= self.depth {
            return false;
        }
        g.push_back(chunk);
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Enqueue a copy of `chunk`, resolving a full queue with `policy`. Never blocks.
    ///
    /// Eviction happens under the same lock as the push, so occupancy never exceeds capacity
    /// and no consumer can observe the intermediate state.
    pub fn send(&self, chunk: &AudioChunk, policy: OverflowPolicy) -> SendOutcome {
        let mut g = self.lock();
        let outcome = if g.len < self.depth {
            g.push_back(chunk);
            SendOutcome::Queued
        } else {
            match policy {
                OverflowPolicy::DropNewest => SendOutcome::Dropped,
                OverflowPolicy::EvictOldest => {
                    g.discard_front();
                    g.push_back(chunk);
                    SendOutcome::Evicted
                }
            }
        };
        drop(g);

        match outcome {
            SendOutcome::Queued => self.cv.notify_all(),
            SendOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.log_overflow(outcome);
            }
            SendOutcome::Evicted => {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                self.cv.notify_all();
                self.log_overflow(outcome);
            }
        }
        outcome
    }

    /// Move the oldest chunk into `out`, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `false` on timeout; `out` is left untouched in that case.
    pub fn receive(&self, out: &mut AudioChunk, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while g.len == 0 {
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
        g.pop_front_into(out);
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Wait up to `timeout` for a free slot. Returns `true` if one is available.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while g.len >= self.depth {
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

    /// Discard everything queued. Returns how many chunks were dropped.
    pub fn clear(&self) -> usize {
        let mut g = self.lock();
        let n = g.len;
        while g.len > 0 {
            g.discard_front();
        }
        g.head = 0;
        drop(g);
        self.cv.notify_all();
        n
    }

    fn log_overflow(&self, outcome: SendOutcome) {
        if self.overflow_log.ready() {
            tracing::warn!(
                ?outcome,
                capacity = self.depth,
                dropped = self.dropped_count(),
                evicted = self.evicted_count(),
                "audio queue overflow"
            );
        } else {
            tracing::debug!(?outcome, "audio queue overflow");
        }
    }
}
