//! CPAL-backed output sink.
//!
//! `write` decodes the encoded bytes into a bounded [`SampleRing`] sized like the
//! configured DMA buffer set (`buffer_frames × buffer_count`). The CPAL callback drains the
//! ring without waiting, maps channels to the device layout and outputs silence when the
//! ring runs dry.
//!
//! `cpal::Stream` is not `Send` on every host, so a `CpalSink` must be opened on the thread
//! that will write to it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use radio_types::{SinkState, SinkStats};

use super::device::{pick_buffer_size, pick_device, pick_output_config};
use super::ring::SampleRing;
use super::{OutputSink, SinkCounters, SinkError};
use crate::codec::check_alignment;
use crate::config::{AudioConfig, PinConfig};

/// Hardware output through the host audio API.
pub struct CpalSink {
    config: AudioConfig,
    pins: PinConfig,
    device_name: String,
    sample_format: cpal::SampleFormat,
    device_channels: u16,
    ring: Arc<SampleRing>,
    counters: Arc<SinkCounters>,
    stream: Option<cpal::Stream>,
}

impl CpalSink {
    /// Validate `config` and `pins`, open the output device and start the stream.
    ///
    /// Fails with [`SinkError::InvalidConfig`], [`SinkError::PinConfig`] or
    /// [`SinkError::DriverInstall`] depending on which step was rejected.
    pub fn open(
        config: AudioConfig,
        pins: PinConfig,
        device: Option<&str>,
    ) -> Result<Self, SinkError> {
        let counters = Arc::new(SinkCounters::default());
        counters.set_state(SinkState::Initializing);

        if let Err(err) = config.validate() {
            counters.set_state(SinkState::InitFailed);
            tracing::error!(state = counters.state().label(), "{err}");
            return Err(err.into());
        }
        if let Err(err) = pins.validate() {
            counters.set_state(SinkState::PinConfigFailed);
            tracing::error!(state = counters.state().label(), "{err}");
            return Err(err.into());
        }
        tracing::info!(
            bclk = pins.bclk,
            lrck = pins.lrck,
            data = pins.data,
            enable = ?pins.enable,
            "output signal lines assigned"
        );
        if config.use_apll {
            tracing::info!("high-precision clock requested; host audio clock is used");
        }

        let ring = Arc::new(SampleRing::new(
            config.channels as usize,
            config.buffer_capacity_frames(),
        ));

        let installed = install_stream(&config, device, &ring, &counters);
        let (stream, device_name, sample_format, device_channels) = match installed {
            Ok(parts) => parts,
            Err(err) => {
                counters.set_state(SinkState::InitFailed);
                tracing::error!(state = counters.state().label(), "output open failed: {err:#}");
                return Err(SinkError::DriverInstall(format!("{err:#}")));
            }
        };

        counters.set_state(SinkState::Ready);
        tracing::info!(
            device = %device_name,
            sample_rate = config.sample_rate,
            bits = config.bits_per_sample,
            channels = config.channels,
            device_channels,
            sample_format = ?sample_format,
            buffer_ms = config.buffer_duration_ms(),
            "output ready"
        );

        Ok(Self {
            config,
            pins,
            device_name,
            sample_format,
            device_channels,
            ring,
            counters,
            stream: Some(stream),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Flush pending audio and stop the stream.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = self.flush();
            if let Err(err) = stream.pause() {
                tracing::debug!("stream pause on close failed: {err}");
            }
            self.ring.clear();
            self.counters.set_state(SinkState::Stopped);
            tracing::info!(device = %self.device_name, "output closed");
        }
    }

    /// Log configuration, buffer state and statistics as one event.
    pub fn log_diagnostics(&self) {
        let stats = self.stats();
        tracing::info!(
            device = %self.device_name,
            state = stats.state.label(),
            sample_rate = self.config.sample_rate,
            bits = self.config.bits_per_sample,
            channels = self.config.channels,
            device_channels = self.device_channels,
            sample_format = ?self.sample_format,
            buffer_frames = self.config.buffer_frames,
            buffer_count = self.config.buffer_count,
            buffer_ms = self.config.buffer_duration_ms(),
            bytes_per_second = self.config.bytes_per_second(),
            apll = self.config.use_apll,
            bclk = self.pins.bclk,
            lrck = self.pins.lrck,
            data = self.pins.data,
            buffered_frames = self.ring.len_frames(),
            utilization = stats.utilization_percent,
            nearly_full = stats.is_nearly_full(),
            nearly_empty = stats.is_nearly_empty(),
            bytes_written = stats.bytes_written,
            packets_written = stats.packets_written,
            overflows = stats.overflows,
            underruns = stats.underruns,
            write_errors = stats.write_errors,
            ms_since_last_write = ?stats.ms_since_last_write,
            "output diagnostics"
        );
    }
}

type Installed = (cpal::Stream, String, cpal::SampleFormat, u16);

fn install_stream(
    config: &AudioConfig,
    device: Option<&str>,
    ring: &Arc<SampleRing>,
    counters: &Arc<SinkCounters>,
) -> Result<Installed> {
    let host = cpal::default_host();
    let device = pick_device(&host, device)?;
    let device_name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    let supported = pick_output_config(&device, config)?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(size) = pick_buffer_size(&supported, config.buffer_frames) {
        stream_config.buffer_size = size;
    }
    let sample_format = supported.sample_format();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, ring, counters),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, ring, counters),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, ring, counters),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, ring, counters),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play()?;
    Ok((stream, device_name, sample_format, stream_config.channels))
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// The callback pulls one period's worth of source samples from the ring, maps them to the
/// device channel layout and pads any shortfall with silence. A shortfall while the sink is
/// streaming counts as an underrun.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: &Arc<SampleRing>,
    counters: &Arc<SinkCounters>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels.max(1) as usize;
    let src_channels = ring.channels();
    let ring_cb = ring.clone();
    let counters_cb = counters.clone();
    let mut scratch: Vec<f32> = Vec::with_capacity(4096 * src_channels);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / dst_channels;
            let wanted = frames * src_channels;
            if scratch.len() < wanted {
                scratch.resize(wanted, 0.0);
            }
            let got = ring_cb.pop_into(&mut scratch[..wanted]);
            if got < wanted {
                scratch[got..wanted].fill(0.0);
                if counters_cb.state() == SinkState::Streaming {
                    counters_cb.record_underrun();
                }
            }

            for frame in 0..frames {
                let src = &scratch[frame * src_channels..(frame + 1) * src_channels];
                for ch in 0..dst_channels {
                    data[frame * dst_channels + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(map_channel(src, dst_channels, ch));
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Output sample for `dst_ch` from one source frame.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - otherwise clamp to the available channels
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (2, 1) => 0.5 * (src[0] + src[1]),
        (0, _) => 0.0,
        (n, _) => src[dst_ch.min(n - 1)],
    }
}

impl OutputSink for CpalSink {
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
            tracing::warn!("{err}");
            self.counters.record_write_error();
            return Err(err.into());
        }

        let accepted =
            self.ring
                .write_bytes(bytes, self.config.bit_depth(), Instant::now() + timeout);
        self.counters.record_write(bytes.len(), accepted);
        if accepted < bytes.len() {
            tracing::debug!(
                requested = bytes.len(),
                accepted,
                "output write timed out with buffers full"
            );
        }
        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let limit = Duration::from_millis(self.config.buffer_duration_ms() + 100);
        if !self.ring.wait_until_empty(limit) {
            tracing::warn!(
                buffered_frames = self.ring.len_frames(),
                "output flush timed out"
            );
        }
        Ok(())
    }

    fn clear_buffers(&mut self) {
        self.ring.clear();
        if self.counters.state().is_ready() {
            self.counters.set_state(SinkState::Ready);
        }
    }

    fn stats(&self) -> SinkStats {
        self.counters.snapshot(self.ring.utilization_percent())
    }

    fn reset_statistics(&mut self) {
        self.counters.reset();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}
