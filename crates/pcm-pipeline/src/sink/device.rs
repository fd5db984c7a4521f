//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config that plays the sink's [`AudioConfig`] without resampling

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::AudioConfig;

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config running at exactly `audio.sample_rate`.
///
/// Among ranges that contain the rate, prefer the configured channel count, then the
/// sample format with the most headroom.
pub fn pick_output_config(
    device: &cpal::Device,
    audio: &AudioConfig,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(bool, u8, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if !rate_in_range(range.min_sample_rate(), range.max_sample_rate(), audio.sample_rate) {
            continue;
        }
        let channels_match = range.channels() == audio.channels;
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_match, b_rank, _)) => {
                is_better_candidate(channels_match, rank, *b_match, *b_rank)
            }
        };
        if replace {
            best = Some((channels_match, rank, range));
        }
    }

    best.map(|(_, _, range)| range.with_sample_rate(audio.sample_rate))
        .ok_or_else(|| anyhow!("Device does not support {} Hz output", audio.sample_rate))
}

/// Request `wanted_frames` per device period, clamped to what the device advertises.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    wanted_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_frames(wanted_frames, *min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_frames(wanted: u32, min: u32, max: u32) -> u32 {
    if min > max {
        return min;
    }
    wanted.clamp(min, max)
}

fn rate_in_range(min: u32, max: u32, rate: u32) -> bool {
    rate >= min && rate <= max
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(channels_match: bool, rank: u8, best_match: bool, best_rank: u8) -> bool {
    if channels_match != best_match {
        channels_match
    } else {
        rank < best_rank
    }
}

/// Output device metadata for `list-devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub min_rate: u32,
    pub max_rate: u32,
    pub max_channels: u16,
}

/// Enumerate output devices with their supported rate span.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());
    let devices = host.output_devices().context("No output devices")?;

    let mut out = Vec::new();
    for d in devices {
        let name = d.description()?.name().to_string();
        let mut min_rate = u32::MAX;
        let mut max_rate = 0u32;
        let mut max_channels = 0u16;
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
                max_channels = max_channels.max(r.channels());
            }
        }
        if max_rate == 0 {
            tracing::warn!(device = %name, "skipping device without output configs");
            continue;
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
            max_channels,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
