//! `radio` plays a raw PCM internet radio feed (or a test signal) through a bounded
//! producer/consumer pipeline.
//!
//! ## Threads
//! 1. **Producer**: either pulls s16le PCM over HTTP and re-chunks it, or generates a
//!    phase-continuous tone / noise.
//! 2. **Playback**: drains the chunk queue once per chunk duration and writes to the output.
//! 3. **Control**: the main thread applies stdin / Ctrl-C commands and prints status.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use radio::cli::{Args, Command};
use radio::config::RadioConfig;
use radio::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,radio=info,pcm_pipeline=info")
        }))
        .init();

    match &args.cmd {
        Command::ListDevices => runtime::list_devices(),
        _ => runtime::run(RadioConfig::from_args(&args)?),
    }
}
