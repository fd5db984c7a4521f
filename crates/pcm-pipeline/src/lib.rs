//! Real-time PCM pipeline: a bounded chunk queue between a producer (tone generator or
//! network puller) and a playback loop that feeds an output sink.

pub mod chunk;
pub mod codec;
pub mod config;
pub mod context;
pub mod generator;
pub mod playback;
pub mod puller;
pub mod queue;
pub mod sink;
pub mod status;

pub use chunk::AudioChunk;
pub use config::{AudioConfig, ConfigError, PinConfig, PipelineConfig, ProducerMode};
pub use context::PipelineContext;
pub use generator::SignalMode;
pub use playback::{PlaybackLoop, spawn_playback, spawn_playback_within};
pub use puller::{ConnectError, StreamConnector, StreamPuller};
pub use sink::{CpalSink, NullSink, OutputSink, SinkError};
