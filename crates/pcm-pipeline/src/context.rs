//! Shared state between the control surface, the producer and the consumer.
//!
//! One [`PipelineContext`] owns the queue, the control flags and the configuration; both
//! worker threads get an `Arc` to it. Flags are independent scalars, so plain atomics are
//! enough: no invariant spans more than one of them.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use radio_types::{PipelineStatus, SinkStats, StreamPhase};

use crate::config::{ConfigError, PipelineConfig, ProducerMode};
use crate::generator::SignalMode;
use crate::queue::ChunkQueue;
use crate::status::PipelineCounters;

/// Longest uninterrupted sleep taken by [`PipelineContext::sleep_unless`].
const SLEEP_SLICE: Duration = Duration::from_millis(20);

pub struct PipelineContext {
    config: PipelineConfig,
    queue: ChunkQueue,
    requested: AtomicBool,
    active: AtomicBool,
    paused: AtomicBool,
    shutdown: AtomicBool,
    volume: AtomicU8,
    signal: Mutex<SignalMode>,
    phase: AtomicU8,
    prebuffering: AtomicBool,
    prebuffer_deadline: Mutex<Option<Instant>>,
    stats_reset: AtomicBool,
    counters: PipelineCounters,
    sink_stats: Mutex<Option<SinkStats>>,
}

impl PipelineContext {
    /// Validate `config` and allocate the queue.
    pub fn new(config: PipelineConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let queue = ChunkQueue::new(config.queue_depth, config.chunk_samples());
        tracing::info!(
            mode = ?config.mode,
            sample_rate = config.sample_rate,
            channels = config.channels,
            chunk_ms = config.chunk_duration.as_millis() as u64,
            queue_depth = config.queue_depth,
            "pipeline created"
        );
        Ok(Arc::new(Self {
            config,
            queue,
            requested: AtomicBool::new(false),
            active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            volume: AtomicU8::new(100),
            signal: Mutex::new(SignalMode::Idle),
            phase: AtomicU8::new(StreamPhase::Stopped.as_u8()),
            prebuffering: AtomicBool::new(false),
            prebuffer_deadline: Mutex::new(None),
            stats_reset: AtomicBool::new(false),
            counters: PipelineCounters::default(),
            sink_stats: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn queue(&self) -> &ChunkQueue {
        &self.queue
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    // Control surface.

    /// Ask the producer to start streaming.
    pub fn start_stream(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            tracing::info!("stream start requested");
        }
    }

    /// Ask the producer to stop. Already queued chunks are left for the consumer.
    pub fn stop_stream(&self) {
        if self.requested.swap(false, Ordering::SeqCst) {
            tracing::info!("stream stop requested");
        }
    }

    /// Hold playback without draining the queue.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("playback paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("playback resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Set the output volume percentage; values above 100 are clamped. Returns the stored value.
    pub fn set_volume(&self, volume: u8) -> u8 {
        let volume = volume.min(100);
        self.volume.store(volume, Ordering::Relaxed);
        tracing::info!(volume, "volume set");
        volume
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Select what the synthetic producer generates. `Idle` also clears the request flag.
    ///
    /// A tone must have a finite, positive frequency.
    pub fn set_signal(&self, mode: SignalMode) -> Result<(), ConfigError> {
        if let SignalMode::Tone(hz) = mode {
            if !(hz.is_finite() && hz > 0.0) {
                return Err(ConfigError::ToneFrequency(hz));
            }
        }
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        self.requested.store(mode != SignalMode::Idle, Ordering::SeqCst);
        tracing::info!(signal = %mode, "signal selected");
        Ok(())
    }

    pub fn signal(&self) -> SignalMode {
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the consumer to reset the output sink statistics on its next cycle.
    pub fn request_stats_reset(&self) {
        self.stats_reset.store(true, Ordering::SeqCst);
    }

    pub fn take_stats_reset(&self) -> bool {
        self.stats_reset.swap(false, Ordering::SeqCst)
    }

    /// Snapshot for the control surface.
    pub fn status(&self) -> PipelineStatus {
        let queue = &self.queue;
        let signal = match self.config.mode {
            ProducerMode::Synthetic => Some(self.signal().to_string()),
            ProducerMode::Network => None,
        };
        PipelineStatus {
            requested: self.is_requested(),
            active: self.is_active(),
            paused: self.is_paused(),
            phase: self.phase(),
            signal,
            volume: self.volume(),
            queue_count: queue.count(),
            queue_capacity: queue.capacity(),
            free_buffer_bytes: queue.free_slots() * queue.chunk_capacity() * 2,
            overflow_count: queue.overflow_count(),
            dropped_chunks: queue.dropped_count(),
            evicted_chunks: queue.evicted_count(),
            underrun_count: PipelineCounters::get(&self.counters.underruns),
            silence_chunks: PipelineCounters::get(&self.counters.silence_chunks),
            chunks_played: PipelineCounters::get(&self.counters.chunks_played),
            reconnects: PipelineCounters::get(&self.counters.reconnects),
            connect_failures: PipelineCounters::get(&self.counters.connect_failures),
            write_errors: PipelineCounters::get(&self.counters.write_errors),
            sink: self
                .sink_stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    // Producer / consumer side.

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// The producer is delivering real audio (pre-buffering finished).
    ///
    /// An expired pre-buffer deadline is applied here, so the gate opens on time even while
    /// the producer is blocked in a read.
    pub fn is_active(&self) -> bool {
        self.expire_prebuffer();
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn phase(&self) -> StreamPhase {
        self.expire_prebuffer();
        StreamPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_phase(&self, phase: StreamPhase) {
        let prev = StreamPhase::from_u8(self.phase.swap(phase.as_u8(), Ordering::Relaxed));
        if prev != phase {
            tracing::debug!(from = prev.label(), to = phase.label(), "stream phase");
        }
    }

    /// Enter `Buffering`; the gate opens on [`PipelineContext::finish_prebuffer`] or once
    /// `timeout` has passed, whichever comes first.
    pub fn begin_prebuffer(&self, timeout: Duration) {
        let mut deadline = self
            .prebuffer_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *deadline = Some(Instant::now() + timeout);
        self.active.store(false, Ordering::SeqCst);
        self.set_phase(StreamPhase::Buffering);
        self.prebuffering.store(true, Ordering::SeqCst);
    }

    /// Open the gate because the fill threshold was reached. Returns `false` if it was
    /// already open (timed out) or cancelled.
    pub fn finish_prebuffer(&self) -> bool {
        if !self.prebuffering.load(Ordering::SeqCst) {
            return false;
        }
        let mut deadline = self
            .prebuffer_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if deadline.take().is_none() {
            return false;
        }
        self.open_gate();
        true
    }

    /// Drop a pending pre-buffer gate without activating.
    pub fn cancel_prebuffer(&self) {
        let mut deadline = self
            .prebuffer_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *deadline = None;
        self.prebuffering.store(false, Ordering::SeqCst);
    }

    fn expire_prebuffer(&self) {
        if !self.prebuffering.load(Ordering::SeqCst) {
            return;
        }
        let mut deadline = self
            .prebuffer_deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(*deadline, Some(at) if Instant::now() >= at) {
            *deadline = None;
            self.open_gate();
            tracing::info!(queued = self.queue.count(), "pre-buffering timed out");
        }
    }

    // Caller holds the deadline lock.
    fn open_gate(&self) {
        self.prebuffering.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        self.set_phase(StreamPhase::Playing);
    }

    pub fn publish_sink_stats(&self, stats: SinkStats) {
        *self.sink_stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats);
    }

    /// Ask both worker loops to exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning early on shutdown or once `stop`
    /// holds. Returns `true` if the full duration elapsed.
    pub fn sleep_unless(&self, duration: Duration, stop: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_shutdown() || stop(self) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
