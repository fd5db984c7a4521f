//! Synthetic producer: phase-continuous tones and bounded noise.
//!
//! The phase accumulator is advanced for every generated chunk whether or not the queue
//! accepts it, so a dropped chunk never shifts the waveform's time base.

use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use radio_types::StreamPhase;

use crate::chunk::AudioChunk;
use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::queue::{OverflowPolicy, SendOutcome};

/// What the synthetic producer should generate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SignalMode {
    #[default]
    Idle,
    /// Sine tone at the given frequency in Hz.
    Tone(f32),
    Noise,
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalMode::Idle => write!(f, "idle"),
            SignalMode::Tone(hz) => write!(f, "tone {hz} Hz"),
            SignalMode::Noise => write!(f, "noise"),
        }
    }
}

/// Running oscillator phase carried across chunk boundaries.
#[derive(Clone, Debug, Default)]
pub struct PhaseAccumulator {
    phase: f64,
    frequency: f64,
    sample_rate: u32,
}

impl PhaseAccumulator {
    /// Point the oscillator at `frequency` / `sample_rate`.
    ///
    /// Resets the phase to zero exactly when either value differs from the previous call
    /// and returns `true` in that case.
    pub fn retune(&mut self, frequency: f64, sample_rate: u32) -> bool {
        if frequency == self.frequency && sample_rate == self.sample_rate {
            return false;
        }
        self.phase = 0.0;
        self.frequency = frequency;
        self.sample_rate = sample_rate;
        true
    }

    /// Forget the last frequency so the next [`PhaseAccumulator::retune`] resets.
    pub fn invalidate(&mut self) {
        self.frequency = 0.0;
        self.sample_rate = 0;
        self.phase = 0.0;
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// `sin(phase)`, then advance by one sample.
    pub fn next_value(&mut self) -> f64 {
        let value = self.phase.sin();
        if self.sample_rate > 0 {
            self.phase += TAU * self.frequency / self.sample_rate as f64;
            if !(0.0..TAU).contains(&self.phase) {
                self.phase = self.phase.rem_euclid(TAU);
            }
        }
        value
    }
}

/// Fills chunks with interleaved tone or noise samples.
pub struct ToneGenerator {
    accumulator: PhaseAccumulator,
    rng: StdRng,
    sample_rate: u32,
    channels: usize,
    frames: usize,
    gain: f64,
    noise_amplitude: i16,
}

impl ToneGenerator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic noise for tests.
    pub fn with_seed(config: &PipelineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &PipelineConfig, rng: StdRng) -> Self {
        Self {
            accumulator: PhaseAccumulator::default(),
            rng,
            sample_rate: config.sample_rate,
            channels: config.channels.max(1) as usize,
            frames: config.chunk_frames(),
            gain: config.tone.gain,
            noise_amplitude: (config.tone.noise_amplitude * i16::MAX as f64) as i16,
        }
    }

    pub fn accumulator(&self) -> &PhaseAccumulator {
        &self.accumulator
    }

    /// Generate one chunk for `mode` into `chunk`. Returns `false` (chunk cleared) when idle.
    pub fn fill(&mut self, mode: SignalMode, chunk: &mut AudioChunk) -> bool {
        let frames = self.frames.min(chunk.capacity() / self.channels);
        let samples = frames * self.channels;
        match mode {
            SignalMode::Idle => {
                self.accumulator.invalidate();
                chunk.clear();
                false
            }
            SignalMode::Tone(hz) => {
                if self.accumulator.retune(hz as f64, self.sample_rate) {
                    tracing::debug!(frequency = hz, "phase reset");
                }
                let ceiling = i16::MAX as f64 * self.gain;
                let storage = chunk.storage_mut();
                for frame in storage[..samples].chunks_exact_mut(self.channels) {
                    let value = (ceiling * self.accumulator.next_value()) as i16;
                    frame.fill(value);
                }
                chunk.commit(samples, Some(hz));
                true
            }
            SignalMode::Noise => {
                self.accumulator.invalidate();
                let amp = self.noise_amplitude;
                let storage = chunk.storage_mut();
                for frame in storage[..samples].chunks_exact_mut(self.channels) {
                    let value = self.rng.gen_range(-amp..=amp);
                    frame.fill(value);
                }
                chunk.commit(samples, None);
                true
            }
        }
    }
}

/// Sleep before the next chunk: real time when the queue is near full, double speed otherwise.
pub fn pacing_delay(queued: usize, high_watermark: usize, chunk_duration: Duration) -> Duration {
    if queued >= high_watermark {
        chunk_duration
    } else {
        chunk_duration / 2
    }
}

/// Producer loop for [`crate::config::ProducerMode::Synthetic`]. Returns on shutdown.
pub fn run_generator(ctx: Arc<PipelineContext>) {
    let cfg = ctx.config();
    let high_watermark = cfg.high_watermark_chunks();
    let mut generator = ToneGenerator::new(cfg);
    let mut chunk = AudioChunk::with_capacity(cfg.chunk_samples());
    let mut generating = false;

    tracing::info!(
        chunk_frames = cfg.chunk_frames(),
        high_watermark,
        "generator started"
    );

    while !ctx.is_shutdown() {
        let mode = ctx.signal();
        if mode == SignalMode::Idle {
            if generating {
                generating = false;
                ctx.set_active(false);
                ctx.set_phase(StreamPhase::Stopped);
                generator.accumulator.invalidate();
                tracing::info!("generator idle");
            }
            ctx.sleep_unless(cfg.idle_poll, |c| c.signal() != SignalMode::Idle);
            continue;
        }

        if !generating {
            generating = true;
            let stale = ctx.queue().clear();
            ctx.set_active(true);
            ctx.set_phase(StreamPhase::Playing);
            tracing::info!(signal = %mode, stale, "generator active");
        }

        generator.fill(mode, &mut chunk);
        if ctx.queue().send(&chunk, OverflowPolicy::DropNewest) == SendOutcome::Dropped {
            tracing::trace!("generated chunk dropped");
        }

        let delay = pacing_delay(ctx.queue().count(), high_watermark, cfg.chunk_duration);
        ctx.sleep_unless(delay, |c| c.signal() != mode);
    }

    ctx.set_active(false);
    tracing::info!("generator stopped");
}
