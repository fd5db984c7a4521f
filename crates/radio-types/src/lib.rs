use serde::{Deserialize, Serialize};

/// Lifecycle phase of the audio producer as seen from the control surface.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    /// Nothing requested; the producer is idle.
    #[default]
    Stopped,
    /// Opening the pull connection to the PCM source.
    Connecting,
    /// Connected and filling the queue before playback is allowed.
    Buffering,
    /// Producer is delivering real audio.
    Playing,
    /// Last connection attempt failed; waiting out the backoff.
    Error,
}

impl StreamPhase {
    /// Decode a phase stored as a raw `u8` (see [`StreamPhase::as_u8`]).
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Buffering,
            3 => Self::Playing,
            4 => Self::Error,
            _ => Self::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Connecting => 1,
            Self::Buffering => 2,
            Self::Playing => 3,
            Self::Error => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Connecting => "Connecting",
            Self::Buffering => "Buffering",
            Self::Playing => "Playing",
            Self::Error => "Error",
        }
    }
}

/// Lifecycle state of an output sink.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkState {
    #[default]
    Stopped,
    Initializing,
    /// Initialized, nothing written since the last buffer clear.
    Ready,
    /// At least one write accepted since the last buffer clear.
    Streaming,
    /// Configuration validation or driver install failed.
    InitFailed,
    /// Signal line assignment was rejected.
    PinConfigFailed,
}

impl SinkState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Streaming => "Streaming",
            Self::InitFailed => "Error: Initialization Failed",
            Self::PinConfigFailed => "Error: Pin Configuration Failed",
        }
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Streaming)
    }
}

/// Cumulative output sink statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SinkStats {
    pub state: SinkState,
    /// Bytes accepted by the sink since the last reset.
    pub bytes_written: u64,
    /// Number of write calls that accepted data.
    pub packets_written: u64,
    /// Writes that were only partially accepted before their timeout.
    pub overflows: u64,
    /// Device periods that found no buffered audio while streaming.
    pub underruns: u64,
    /// Writes rejected outright.
    pub write_errors: u64,
    /// Internal buffer fill level, 0..=100.
    pub utilization_percent: f32,
    /// Milliseconds since the last accepted write, when any write happened.
    pub ms_since_last_write: Option<u64>,
}

impl SinkStats {
    /// Buffer more than 80% full.
    pub fn is_nearly_full(&self) -> bool {
        self.utilization_percent > 80.0
    }

    /// Buffer less than 20% full.
    pub fn is_nearly_empty(&self) -> bool {
        self.utilization_percent < 20.0
    }
}

/// Pipeline status exposed to the control surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineStatus {
    /// Streaming (or generation) has been requested.
    pub requested: bool,
    /// The producer is delivering real audio.
    pub active: bool,
    pub paused: bool,
    pub phase: StreamPhase,
    /// Signal selection in synthetic mode (`idle`, `tone 440`, `noise`).
    pub signal: Option<String>,
    /// User-facing volume, 0..=100.
    pub volume: u8,
    /// Chunks currently queued.
    pub queue_count: usize,
    pub queue_capacity: usize,
    /// Unused queue storage in bytes.
    pub free_buffer_bytes: usize,
    /// Sends that found the queue full (dropped or evicted).
    pub overflow_count: u64,
    /// Chunks discarded by the drop-new policy.
    pub dropped_chunks: u64,
    /// Chunks discarded by the evict-oldest policy.
    pub evicted_chunks: u64,
    /// Cycles where the consumer expected audio and found none.
    pub underrun_count: u64,
    /// Silence chunks written to the sink.
    pub silence_chunks: u64,
    /// Real audio chunks written to the sink.
    pub chunks_played: u64,
    pub reconnects: u64,
    pub connect_failures: u64,
    /// Sink writes that were rejected or only partially accepted.
    pub write_errors: u64,
    pub sink: Option<SinkStats>,
}
