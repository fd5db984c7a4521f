use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Steady-state counters updated by the producer and consumer loops.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    /// Consumer cycles that expected audio and found an empty queue.
    pub underruns: AtomicU64,
    /// Silence chunks written to the sink.
    pub silence_chunks: AtomicU64,
    /// Real audio chunks written to the sink.
    pub chunks_played: AtomicU64,
    /// Stream sessions that ended and were retried.
    pub reconnects: AtomicU64,
    pub connect_failures: AtomicU64,
    /// Sink writes that returned an error or accepted nothing.
    pub write_errors: AtomicU64,
}

impl PipelineCounters {
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Rate limiter for per-cycle warnings.
#[derive(Debug)]
pub struct LogThrottle {
    last_ms: AtomicU64,
    interval_ms: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_ms: AtomicU64::new(0),
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Returns `true` at most once per interval.
    pub fn ready(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let last = self.last_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.interval_ms {
            self.last_ms.store(now, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}
