//! Configuration for the output sink and the producer/consumer pipeline.
//!
//! Everything here is validated once, before any thread starts. Values that were tuned by ear
//! (silence streak, pre-buffer fill, backoff) are plain fields with preset defaults.

use std::time::Duration;

use thiserror::Error;

use crate::chunk::MAX_CHUNK_SAMPLES;
use crate::codec::BitDepth;

/// Rejected configuration value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid sample rate: {0} Hz (must be 8000-192000)")]
    SampleRate(u32),
    #[error("invalid bits per sample: {0} (must be 8, 16, 24 or 32)")]
    BitsPerSample(u8),
    #[error("invalid channel count: {0} (must be 1 or 2)")]
    Channels(u16),
    #[error("invalid buffer length: {0} frames (must be 64-4096)")]
    BufferFrames(u32),
    #[error("invalid buffer count: {0} (must be 2-32)")]
    BufferCount(u8),
    #[error("invalid pin assignment: {0}")]
    Pins(String),
    #[error("invalid tone frequency: {0} Hz (must be positive)")]
    ToneFrequency(f32),
    #[error("invalid pipeline setting: {0}")]
    Pipeline(String),
}

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

fn check_sample_rate(rate: u32) -> Result<(), ConfigError> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::SampleRate(rate))
    }
}

fn check_channels(channels: u16) -> Result<(), ConfigError> {
    if (1..=2).contains(&channels) {
        Ok(())
    } else {
        Err(ConfigError::Channels(channels))
    }
}

/// Output format and internal buffering of the audio sink.
///
/// Immutable once the sink is open.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub channels: u16,
    /// Length of one internal (DMA-style) buffer in frames.
    pub buffer_frames: u32,
    /// Number of internal buffers.
    pub buffer_count: u8,
    /// Request the high-precision audio clock when the backend offers one.
    pub use_apll: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bits_per_sample: 16,
            channels: 2,
            buffer_frames: 1024,
            buffer_count: 8,
            use_apll: false,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_sample_rate(self.sample_rate)?;
        if BitDepth::from_bits(self.bits_per_sample).is_none() {
            return Err(ConfigError::BitsPerSample(self.bits_per_sample));
        }
        check_channels(self.channels)?;
        if !(64..=4096).contains(&self.buffer_frames) {
            return Err(ConfigError::BufferFrames(self.buffer_frames));
        }
        if !(2..=32).contains(&self.buffer_count) {
            return Err(ConfigError::BufferCount(self.buffer_count));
        }
        Ok(())
    }

    /// Sample width. Falls back to 16 bit for an unvalidated config.
    pub fn bit_depth(&self) -> BitDepth {
        BitDepth::from_bits(self.bits_per_sample).unwrap_or(BitDepth::Sixteen)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bit_depth().bytes() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            bpf => bytes / bpf,
        }
    }

    /// Whether `bytes` holds a whole number of frames.
    pub fn is_aligned(&self, bytes: usize) -> bool {
        let bpf = self.bytes_per_frame();
        bpf > 0 && bytes % bpf == 0
    }

    /// Total internal buffering in frames.
    pub fn buffer_capacity_frames(&self) -> usize {
        self.buffer_frames as usize * self.buffer_count as usize
    }

    /// Playback time held by the internal buffers when full.
    pub fn buffer_duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.buffer_capacity_frames() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Physical signal lines of the output peripheral.
///
/// Only validated and reported; the pipeline never interprets them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinConfig {
    /// Bit clock.
    pub bclk: i32,
    /// Word select (left/right clock).
    pub lrck: i32,
    /// Serial data out.
    pub data: i32,
    /// Optional amplifier enable line.
    pub enable: Option<i32>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            bclk: 25,
            lrck: 26,
            data: 27,
            enable: None,
        }
    }
}

impl PinConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let roles = [("bclk", self.bclk), ("lrck", self.lrck), ("data", self.data)];
        for (name, pin) in roles {
            if pin < 0 {
                return Err(ConfigError::Pins(format!("{name} pin {pin} is negative")));
            }
        }
        if self.bclk == self.lrck || self.bclk == self.data || self.lrck == self.data {
            return Err(ConfigError::Pins(format!(
                "signal lines must be distinct (bclk={}, lrck={}, data={})",
                self.bclk, self.lrck, self.data
            )));
        }
        if let Some(enable) = self.enable {
            if enable < 0 {
                return Err(ConfigError::Pins(format!("enable pin {enable} is negative")));
            }
            if roles.iter().any(|(_, pin)| *pin == enable) {
                return Err(ConfigError::Pins(format!(
                    "enable pin {enable} collides with a signal line"
                )));
            }
        }
        Ok(())
    }
}

/// Which producer feeds the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerMode {
    /// Phase-continuous tone / noise generator.
    Synthetic,
    /// Raw PCM pulled from a remote stream.
    Network,
}

/// Synthetic generator tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct ToneConfig {
    /// Fraction of full scale used for tones.
    pub gain: f64,
    /// Fraction of full scale bounding noise samples.
    pub noise_amplitude: f64,
    /// Queue fill fraction above which the generator slows to real time.
    pub high_watermark: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            gain: 0.25,
            noise_amplitude: 0.1,
            high_watermark: 0.75,
        }
    }
}

/// Queue sizing, chunking and timing shared by the producer and consumer contexts.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub mode: ProducerMode,
    /// Sample rate of the chunks moving through the queue.
    pub sample_rate: u32,
    /// Interleaved channels per chunk.
    pub channels: u16,
    /// Playback time carried by one chunk.
    pub chunk_duration: Duration,
    /// Queue capacity in chunks.
    pub queue_depth: usize,
    /// Consecutive silence chunks written before the consumer mutes.
    pub silence_streak_limit: u32,
    /// Queue fill fraction required before a network stream goes active.
    pub prebuffer_fraction: f32,
    /// Upper bound on the pre-buffering wait.
    pub prebuffer_timeout: Duration,
    /// Silence chunks queued after a failed connection attempt.
    pub error_silence_chunks: usize,
    pub reconnect_backoff: Duration,
    /// How long the puller waits for a free slot before evicting the oldest chunk.
    pub space_wait: Duration,
    /// Poll interval while nothing is requested.
    pub idle_poll: Duration,
    /// How often the consumer clears sink buffering while idle.
    pub idle_clear_interval: Duration,
    pub tone: ToneConfig,
}

impl PipelineConfig {
    /// Defaults for the pull stream: 32 kHz mono s16le from the transcoder.
    pub fn network() -> Self {
        Self {
            mode: ProducerMode::Network,
            sample_rate: 32_000,
            channels: 1,
            chunk_duration: Duration::from_millis(50),
            queue_depth: 20,
            silence_streak_limit: 4,
            prebuffer_fraction: 0.75,
            prebuffer_timeout: Duration::from_secs(3),
            error_silence_chunks: 4,
            reconnect_backoff: Duration::from_secs(1),
            space_wait: Duration::from_millis(50),
            idle_poll: Duration::from_millis(100),
            idle_clear_interval: Duration::from_secs(1),
            tone: ToneConfig::default(),
        }
    }

    /// Defaults for the tone/noise generator.
    pub fn synthetic() -> Self {
        Self {
            mode: ProducerMode::Synthetic,
            sample_rate: 44_100,
            channels: 2,
            chunk_duration: Duration::from_millis(25),
            queue_depth: 8,
            ..Self::network()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_sample_rate(self.sample_rate)?;
        check_channels(self.channels)?;
        if self.queue_depth == 0 {
            return Err(ConfigError::Pipeline("queue depth must be at least 1".into()));
        }
        let samples = self.chunk_samples();
        if samples == 0 || samples > MAX_CHUNK_SAMPLES {
            return Err(ConfigError::Pipeline(format!(
                "chunk of {samples} samples is outside 1-{MAX_CHUNK_SAMPLES}"
            )));
        }
        if !(self.prebuffer_fraction > 0.0 && self.prebuffer_fraction <= 1.0) {
            return Err(ConfigError::Pipeline(format!(
                "prebuffer fraction {} is outside (0, 1]",
                self.prebuffer_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.tone.gain) || !(0.0..=1.0).contains(&self.tone.noise_amplitude)
        {
            return Err(ConfigError::Pipeline("tone gain and noise amplitude must be within 0-1".into()));
        }
        if !(self.tone.high_watermark > 0.0 && self.tone.high_watermark <= 1.0) {
            return Err(ConfigError::Pipeline(format!(
                "high watermark {} is outside (0, 1]",
                self.tone.high_watermark
            )));
        }
        Ok(())
    }

    /// Frames per chunk (rounded down).
    pub fn chunk_frames(&self) -> usize {
        (self.sample_rate as u128 * self.chunk_duration.as_micros() / 1_000_000) as usize
    }

    /// Interleaved samples per chunk.
    pub fn chunk_samples(&self) -> usize {
        self.chunk_frames() * self.channels as usize
    }

    /// Bytes of s16le input that make up one chunk.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * 2
    }

    /// Queue occupancy that ends pre-buffering.
    pub fn prebuffer_threshold(&self) -> usize {
        let wanted = (self.queue_depth as f32 * self.prebuffer_fraction).ceil() as usize;
        wanted.clamp(1, self.queue_depth.max(1))
    }

    /// Queue occupancy at which the generator stops producing ahead.
    pub fn high_watermark_chunks(&self) -> usize {
        let wanted = (self.queue_depth as f32 * self.tone.high_watermark).ceil() as usize;
        wanted.clamp(1, self.queue_depth.max(1))
    }
}
