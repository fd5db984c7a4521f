use clap::{Parser, Subcommand};

/// Raw PCM feed served by the transcoder.
pub const DEFAULT_STREAM_URL: &str = "http://127.0.0.1:8080/stream";

#[derive(Parser, Debug)]
#[command(name = "radio", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Initial volume in percent
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: u8,

    /// Queue depth in chunks (default: 20 for stream, 8 for tone/noise)
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Chunk length in milliseconds (default: 50 for stream, 25 for tone/noise)
    #[arg(long)]
    pub chunk_ms: Option<u64>,

    /// Consecutive silence chunks written before muting
    #[arg(long)]
    pub silence_streak: Option<u32>,

    /// Queue fill (percent) required before a stream starts playing
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub prebuffer_percent: Option<u8>,

    /// Output sample rate. Must match the stream rate; sets the generator rate for tone/noise.
    #[arg(long)]
    pub out_rate: Option<u32>,

    /// Output bits per sample (8, 16, 24 or 32)
    #[arg(long, default_value_t = 16)]
    pub out_bits: u8,

    /// Output channels (1 or 2)
    #[arg(long, default_value_t = 2)]
    pub out_channels: u16,

    /// Output buffer length in frames (64-4096)
    #[arg(long, default_value_t = 1024)]
    pub buffer_frames: u32,

    /// Number of output buffers (2-32)
    #[arg(long, default_value_t = 8)]
    pub buffer_count: u8,

    /// Request the high-precision audio clock
    #[arg(long)]
    pub apll: bool,

    /// Bit clock line
    #[arg(long, default_value_t = 25, allow_negative_numbers = true)]
    pub bclk: i32,

    /// Word select line
    #[arg(long, default_value_t = 26, allow_negative_numbers = true)]
    pub lrck: i32,

    /// Serial data line
    #[arg(long, default_value_t = 27, allow_negative_numbers = true)]
    pub data: i32,

    /// Optional amplifier enable line
    #[arg(long, allow_negative_numbers = true)]
    pub enable_pin: Option<i32>,

    /// Discard audio at the real-time rate instead of opening a device
    #[arg(long)]
    pub null_output: bool,

    /// Print a JSON status line every N seconds (0 disables)
    #[arg(long, default_value_t = 10)]
    pub status_interval_secs: u64,

    /// Do not read control commands from stdin
    #[arg(long)]
    pub no_stdin: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a raw s16le PCM stream pulled over HTTP
    Stream {
        /// Stream URL
        #[arg(default_value = DEFAULT_STREAM_URL)]
        url: String,

        /// Sample rate of the stream
        #[arg(long, default_value_t = 32_000)]
        rate: u32,

        /// Channel count of the stream
        #[arg(long, default_value_t = 1)]
        channels: u16,

        /// Connect timeout in seconds
        #[arg(long, default_value_t = 5)]
        connect_timeout_secs: u64,

        /// Per-read timeout in seconds
        #[arg(long, default_value_t = 5)]
        read_timeout_secs: u64,
    },

    /// Play a sine tone
    Tone {
        /// Frequency in Hz
        hz: f32,
    },

    /// Play low-level white noise
    Noise,

    /// List output devices and exit
    ListDevices,
}
