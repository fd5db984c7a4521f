//! Output sinks.
//!
//! An [`OutputSink`] owns the output format ([`AudioConfig`]) and exposes a timeout-bounded
//! byte-level write. Two implementations:
//! - [`hardware::CpalSink`]: a CPAL output stream fed through a bounded [`ring::SampleRing`]
//! - [`NullSink`]: discards audio at the real-time rate (headless runs, tests)

pub mod device;
pub mod hardware;
pub mod ring;

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use radio_types::{SinkState, SinkStats};
use thiserror::Error;

use crate::codec::{CodecError, check_alignment};
use crate::config::{AudioConfig, ConfigError};

pub use hardware::CpalSink;

/// Output sink failure.
///
/// Initialization failures are split by cause: bad values, bad signal lines, or the
/// backend refusing to open.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid audio configuration: {0}")]
    InvalidConfig(ConfigError),
    #[error("pin configuration failed: {0}")]
    PinConfig(String),
    #[error("driver install failed: {0}")]
    DriverInstall(String),
    #[error("write rejected: {0}")]
    Write(#[from] CodecError),
    #[error("sink is not ready (state: {})", .0.label())]
    NotReady(SinkState),
    #[error("output did not open within {0:?}")]
    OpenTimeout(Duration),
}

impl From<ConfigError> for SinkError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Pins(msg) => SinkError::PinConfig(msg),
            other => SinkError::InvalidConfig(other),
        }
    }
}

/// Hardware-style audio output.
pub trait OutputSink {
    fn config(&self) -> &AudioConfig;

    /// Write encoded interleaved frames, waiting at most `timeout` for buffer space.
    ///
    /// Returns the bytes actually accepted; callers must compare it with `bytes.len()`.
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, SinkError>;

    /// Wait (bounded) for pending buffered audio to play out.
    fn flush(&mut self) -> Result<(), SinkError>;

    /// Drop all buffered audio. Leaves the sink ready for new writes.
    fn clear_buffers(&mut self);

    fn stats(&self) -> SinkStats;

    fn reset_statistics(&mut self);
}

fn state_to_u8(state: SinkState) -> u8 {
    match state {
        SinkState::Stopped => 0,
        SinkState::Initializing => 1,
        SinkState::Ready => 2,
        SinkState::Streaming => 3,
        SinkState::InitFailed => 4,
        SinkState::PinConfigFailed => 5,
    }
}

fn state_from_u8(raw: u8) -> SinkState {
    match raw {
        1 => SinkState::Initializing,
        2 => SinkState::Ready,
        3 => SinkState::Streaming,
        4 => SinkState::InitFailed,
        5 => SinkState::PinConfigFailed,
        _ => SinkState::Stopped,
    }
}

/// Counters shared between a sink and its device callback.
#[derive(Debug)]
pub struct SinkCounters {
    state: AtomicU8,
    bytes_written: AtomicU64,
    packets_written: AtomicU64,
    overflows: AtomicU64,
    underruns: AtomicU64,
    write_errors: AtomicU64,
    /// Milliseconds after `epoch` of the last accepted write, plus one (0 = never).
    last_write_ms: AtomicU64,
    epoch: Instant,
}

impl Default for SinkCounters {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(state_to_u8(SinkState::Stopped)),
            bytes_written: AtomicU64::new(0),
            packets_written: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }
}

impl SinkCounters {
    pub fn state(&self) -> SinkState {
        state_from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: SinkState) {
        self.state.store(state_to_u8(state), Ordering::Relaxed);
    }

    /// Account for one write call that accepted `accepted` of `requested` bytes.
    pub fn record_write(&self, requested: usize, accepted: usize) {
        if accepted > 0 {
            self.bytes_written.fetch_add(accepted as u64, Ordering::Relaxed);
            self.packets_written.fetch_add(1, Ordering::Relaxed);
            let ms = self.epoch.elapsed().as_millis() as u64;
            self.last_write_ms.store(ms + 1, Ordering::Relaxed);
            self.set_state(SinkState::Streaming);
        }
        if accepted < requested {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.bytes_written.store(0, Ordering::Relaxed);
        self.packets_written.store(0, Ordering::Relaxed);
        self.overflows.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
        self.last_write_ms.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, utilization_percent: f32) -> SinkStats {
        let last = self.last_write_ms.load(Ordering::Relaxed);
        let ms_since_last_write = match last {
            0 => None,
            stamp => Some((self.epoch.elapsed().as_millis() as u64).saturating_sub(stamp - 1)),
        };
        SinkStats {
            state: self.state(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            utilization_percent,
            ms_since_last_write,
        }
    }
}

/// Sink that consumes audio at the configured rate and discards it.
///
/// Keeps a virtual playhead so writes block like a real device with `buffer_count`
/// buffers of `buffer_frames` each. With `realtime` off every write is accepted at once.
pub struct NullSink {
    config: AudioConfig,
    counters: SinkCounters,
    realtime: bool,
    buffered_frames: f64,
    last_drain: Instant,
}

impl NullSink {
    pub fn open(config: AudioConfig, realtime: bool) -> Result<Self, SinkError> {
        let counters = SinkCounters::default();
        counters.set_state(SinkState::Initializing);
        if let Err(err) = config.validate() {
            counters.set_state(SinkState::InitFailed);
            return Err(err.into());
        }
        counters.set_state(SinkState::Ready);
        tracing::info!(
            sample_rate = config.sample_rate,
            bits = config.bits_per_sample,
            channels = config.channels,
            realtime,
            "null output ready"
        );
        Ok(Self {
            config,
            counters,
            realtime,
            buffered_frames: 0.0,
            last_drain: Instant::now(),
        })
    }

    fn drain_playhead(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_drain).as_secs_f64();
        self.last_drain = now;
        self.buffered_frames =
            (self.buffered_frames - elapsed * self.config.sample_rate as f64).max(0.0);
    }

    fn free_frames(&self) -> usize {
        let cap = self.config.buffer_capacity_frames() as f64;
        (cap - self.buffered_frames).max(0.0) as usize
    }
}

impl OutputSink for NullSink {
    fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, SinkError> {
        let state = self.counters.state();
        if !state.is_ready() {
            return Err(SinkError::NotReady(state));
        }
        if let Err(err) = check_alignment(bytes.len(), self.config.bit_depth(), self.config.channels)
        {
            self.counters.record_write_error();
            return Err(err.into());
        }
        let wanted = self.config.bytes_to_frames(bytes.len());
        if !self.realtime {
            self.counters.record_write(bytes.len(), bytes.len());
            return Ok(bytes.len());
        }

        let deadline = Instant::now() + timeout;
        let mut accepted = 0usize;
        loop {
            self.drain_playhead();
            let take = self.free_frames().min(wanted - accepted);
            self.buffered_frames += take as f64;
            accepted += take;
            if accepted == wanted {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let missing = (wanted - accepted) as f64 / self.config.sample_rate as f64;
            thread::sleep(Duration::from_secs_f64(missing).min(deadline - now));
        }

        let accepted_bytes = self.config.frames_to_bytes(accepted);
        self.counters.record_write(bytes.len(), accepted_bytes);
        Ok(accepted_bytes)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.drain_playhead();
        if self.realtime && self.buffered_frames > 0.0 {
            let pending = self.buffered_frames / self.config.sample_rate as f64;
            thread::sleep(Duration::from_secs_f64(pending).min(Duration::from_secs(1)));
            self.drain_playhead();
        }
        Ok(())
    }

    fn clear_buffers(&mut self) {
        self.buffered_frames = 0.0;
        self.last_drain = Instant::now();
        if self.counters.state().is_ready() {
            self.counters.set_state(SinkState::Ready);
        }
    }

    fn stats(&self) -> SinkStats {
        let cap = self.config.buffer_capacity_frames() as f32;
        let elapsed = self.last_drain.elapsed().as_secs_f64();
        let pending = (self.buffered_frames - elapsed * self.config.sample_rate as f64).max(0.0);
        self.counters.snapshot((pending as f32 * 100.0 / cap).min(100.0))
    }

    fn reset_statistics(&mut self) {
        self.counters.reset();
    }
}
