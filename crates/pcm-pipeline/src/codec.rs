//! Sample codec and volume stage.
//!
//! Pure functions over interleaved PCM:
//! - volume scaling by an integer percentage (bit-identical at 100)
//! - 16-bit chunk → output byte layout (8/16/24/32 bit, mono↔stereo)
//! - little-endian decoding for the network input and the sink ring

use thiserror::Error;

/// Output sample width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Sixteen,
    TwentyFour,
    ThirtyTwo,
}

impl BitDepth {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            8 => Some(Self::Eight),
            16 => Some(Self::Sixteen),
            24 => Some(Self::TwentyFour),
            32 => Some(Self::ThirtyTwo),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
            Self::TwentyFour => 24,
            Self::ThirtyTwo => 32,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    fn full_scale(self) -> f32 {
        match self {
            Self::Eight => 128.0,
            Self::Sixteen => 32_768.0,
            Self::TwentyFour => 8_388_608.0,
            Self::ThirtyTwo => 2_147_483_648.0,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer of {len} bytes is not a multiple of the {frame}-byte frame size")]
    Misaligned { len: usize, frame: usize },
}

/// Check that `len` bytes hold whole frames.
pub fn check_alignment(len: usize, depth: BitDepth, channels: u16) -> Result<(), CodecError> {
    let frame = depth.bytes() * channels.max(1) as usize;
    if len % frame == 0 {
        Ok(())
    } else {
        Err(CodecError::Misaligned { len, frame })
    }
}

/// Scale one sample by `volume` percent. Values ≥ 100 are the identity.
#[inline]
pub fn scale_sample(sample: i16, volume: u8) -> i16 {
    if volume >= 100 {
        return sample;
    }
    ((sample as i32 * volume as i32) / 100) as i16
}

#[inline]
fn scale_wide(sample: i32, volume: u8) -> i32 {
    if volume >= 100 {
        return sample;
    }
    ((sample as i64 * volume as i64) / 100) as i32
}

/// Scale interleaved 16-bit samples in place.
pub fn apply_volume(samples: &mut [i16], volume: u8) {
    if volume >= 100 {
        return;
    }
    for s in samples.iter_mut() {
        *s = scale_sample(*s, volume);
    }
}

/// Scale an already-encoded little-endian buffer in place.
///
/// Rejects buffers that do not hold a whole number of frames.
pub fn apply_volume_bytes(
    bytes: &mut [u8],
    depth: BitDepth,
    channels: u16,
    volume: u8,
) -> Result<(), CodecError> {
    check_alignment(bytes.len(), depth, channels)?;
    if volume >= 100 {
        return Ok(());
    }
    for raw in bytes.chunks_exact_mut(depth.bytes()) {
        let scaled = scale_wide(read_sample(raw, depth), volume);
        write_sample(raw, depth, scaled);
    }
    Ok(())
}

/// Sign-extended integer value of one encoded sample.
fn read_sample(raw: &[u8], depth: BitDepth) -> i32 {
    match depth {
        BitDepth::Eight => raw[0] as i8 as i32,
        BitDepth::Sixteen => i16::from_le_bytes([raw[0], raw[1]]) as i32,
        BitDepth::TwentyFour => i32::from_le_bytes([0, raw[0], raw[1], raw[2]]) >> 8,
        BitDepth::ThirtyTwo => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
    }
}

fn write_sample(raw: &mut [u8], depth: BitDepth, value: i32) {
    match depth {
        BitDepth::Eight => raw[0] = value as i8 as u8,
        BitDepth::Sixteen => raw.copy_from_slice(&(value as i16).to_le_bytes()),
        BitDepth::TwentyFour => raw.copy_from_slice(&value.to_le_bytes()[..3]),
        BitDepth::ThirtyTwo => raw.copy_from_slice(&value.to_le_bytes()),
    }
}

/// Widen (or narrow) a 16-bit sample to the output depth.
#[inline]
fn widen(sample: i16, depth: BitDepth) -> i32 {
    match depth {
        BitDepth::Eight => (sample >> 8) as i32,
        BitDepth::Sixteen => sample as i32,
        BitDepth::TwentyFour => (sample as i32) << 8,
        BitDepth::ThirtyTwo => (sample as i32) << 16,
    }
}

/// Encode interleaved 16-bit samples into the sink's byte layout, applying volume.
///
/// `out` is cleared and refilled; its allocation is reused across calls.
/// Channel mapping: mono → stereo duplicates, stereo → mono averages.
/// Returns the number of bytes written to `out`.
pub fn encode_chunk(
    samples: &[i16],
    src_channels: u16,
    depth: BitDepth,
    out_channels: u16,
    volume: u8,
    out: &mut Vec<u8>,
) -> usize {
    out.clear();
    let src_channels = src_channels.max(1) as usize;
    let out_channels = out_channels.max(1) as usize;
    let width = depth.bytes();
    let mut scratch = [0u8; 4];

    for frame in samples.chunks_exact(src_channels) {
        for ch in 0..out_channels {
            let s = match (src_channels, out_channels) {
                (2, 1) => ((frame[0] as i32 + frame[1] as i32) / 2) as i16,
                _ => frame[ch.min(src_channels - 1)],
            };
            let s = scale_sample(s, volume);
            write_sample(&mut scratch[..width], depth, widen(s, depth));
            out.extend_from_slice(&scratch[..width]);
        }
    }
    out.len()
}

/// Decode one encoded sample to `f32` in `[-1.0, 1.0)`.
#[inline]
pub fn sample_to_f32(raw: &[u8], depth: BitDepth) -> f32 {
    read_sample(raw, depth) as f32 / depth.full_scale()
}

/// Decode little-endian 16-bit samples from `bytes` into `out`.
///
/// Decodes `min(bytes.len() / 2, out.len())` samples and returns that count; a trailing odd byte
/// is ignored.
pub fn read_i16_le(bytes: &[u8], out: &mut [i16]) -> usize {
    let n = (bytes.len() / 2).min(out.len());
    for (dst, pair) in out[..n].iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = i16::from_le_bytes([pair[0], pair[1]]);
    }
    n
}
