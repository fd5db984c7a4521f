use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use crate::cli::{Args, Command};
use pcm_pipeline::{AudioConfig, PinConfig, PipelineConfig, SignalMode};

/// Where audio comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceConfig {
    Stream {
        url: String,
        connect_timeout: Duration,
        read_timeout: Duration,
    },
    Signal(SignalMode),
}

/// Everything the runtime needs, resolved from the command line.
#[derive(Clone, Debug)]
pub struct RadioConfig {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub audio: AudioConfig,
    pub pins: PinConfig,
    pub device: Option<String>,
    pub volume: u8,
    pub null_output: bool,
    pub status_interval: Option<Duration>,
    pub stdin_control: bool,
}

impl RadioConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let (source, mut pipeline) = match &args.cmd {
            Command::Stream {
                url,
                rate,
                channels,
                connect_timeout_secs,
                read_timeout_secs,
            } => {
                if let Some(out_rate) = args.out_rate {
                    if out_rate != *rate {
                        bail!("output rate {out_rate} Hz differs from stream rate {rate} Hz");
                    }
                }
                let pipeline = PipelineConfig {
                    sample_rate: *rate,
                    channels: *channels,
                    ..PipelineConfig::network()
                };
                let source = SourceConfig::Stream {
                    url: url.clone(),
                    connect_timeout: Duration::from_secs(*connect_timeout_secs),
                    read_timeout: Duration::from_secs((*read_timeout_secs).max(1)),
                };
                (source, pipeline)
            }
            Command::Tone { hz } => {
                if !(hz.is_finite() && *hz > 0.0) {
                    bail!("tone frequency must be positive, got {hz}");
                }
                (SourceConfig::Signal(SignalMode::Tone(*hz)), synthetic(args))
            }
            Command::Noise => (SourceConfig::Signal(SignalMode::Noise), synthetic(args)),
            Command::ListDevices => return Err(anyhow!("list-devices has no runtime config")),
        };

        if let Some(depth) = args.queue_depth {
            pipeline.queue_depth = depth;
        }
        if let Some(ms) = args.chunk_ms {
            pipeline.chunk_duration = Duration::from_millis(ms);
        }
        if let Some(streak) = args.silence_streak {
            pipeline.silence_streak_limit = streak;
        }
        if let Some(percent) = args.prebuffer_percent {
            pipeline.prebuffer_fraction = percent as f32 / 100.0;
        }
        pipeline.validate()?;

        let audio = AudioConfig {
            sample_rate: pipeline.sample_rate,
            bits_per_sample: args.out_bits,
            channels: args.out_channels,
            buffer_frames: args.buffer_frames,
            buffer_count: args.buffer_count,
            use_apll: args.apll,
        };
        audio.validate()?;

        let pins = PinConfig {
            bclk: args.bclk,
            lrck: args.lrck,
            data: args.data,
            enable: args.enable_pin,
        };

        Ok(Self {
            source,
            pipeline,
            audio,
            pins,
            device: normalize_device_name(args.device.clone()),
            volume: args.volume,
            null_output: args.null_output,
            status_interval: match args.status_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            stdin_control: !args.no_stdin,
        })
    }
}

fn synthetic(args: &Args) -> PipelineConfig {
    let mut pipeline = PipelineConfig::synthetic();
    if let Some(rate) = args.out_rate {
        pipeline.sample_rate = rate;
    }
    pipeline
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
