//! The unit of transfer between producer and consumer.

/// Upper bound on samples per chunk accepted by [`crate::config::PipelineConfig::validate`].
pub const MAX_CHUNK_SAMPLES: usize = 32_768;

/// A fixed-capacity block of interleaved signed 16-bit samples.
///
/// Storage is allocated once in [`AudioChunk::with_capacity`] and reused: producers refill the
/// same chunk every cycle and the queue copies it into its own slot, so nothing is allocated
/// per chunk on the hot path.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    samples: Box<[i16]>,
    sample_count: usize,
    valid: bool,
    is_silence: bool,
    /// Tone frequency for diagnostics. Never affects queue semantics.
    frequency: Option<f32>,
}

impl AudioChunk {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity].into_boxed_slice(),
            sample_count: 0,
            valid: false,
            is_silence: false,
            frequency: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of populated samples.
    pub fn len(&self) -> usize {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Deliberately inserted gap filler (as opposed to "no data").
    pub fn is_silence(&self) -> bool {
        self.is_silence
    }

    pub fn frequency(&self) -> Option<f32> {
        self.frequency
    }

    /// The populated samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.sample_count]
    }

    /// Full backing storage for in-place filling; follow with [`AudioChunk::commit`].
    pub fn storage_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Mark the first `count` samples of storage as real audio.
    pub fn commit(&mut self, count: usize, frequency: Option<f32>) {
        self.sample_count = count.min(self.samples.len());
        self.valid = true;
        self.is_silence = false;
        self.frequency = frequency;
    }

    /// Turn this chunk into `count` samples of explicit silence.
    pub fn fill_silence(&mut self, count: usize) {
        let count = count.min(self.samples.len());
        self.samples[..count].fill(0);
        self.sample_count = count;
        self.valid = true;
        self.is_silence = true;
        self.frequency = None;
    }

    pub fn clear(&mut self) {
        self.sample_count = 0;
        self.valid = false;
        self.is_silence = false;
        self.frequency = None;
    }

    /// Copy `other` into this chunk's storage, truncating to capacity.
    pub fn copy_from(&mut self, other: &AudioChunk) {
        let count = other.sample_count.min(self.samples.len());
        debug_assert_eq!(count, other.sample_count, "chunk truncated on copy");
        self.samples[..count].copy_from_slice(&other.samples[..count]);
        self.sample_count = count;
        self.valid = other.valid;
        self.is_silence = other.is_silence;
        self.frequency = other.frequency;
    }
}
