//! Runtime wiring.
//!
//! Builds the pipeline context, opens the output on the playback thread, starts the producer
//! and runs the control loop on the calling thread until asked to quit.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::{RadioConfig, SourceConfig};
use crate::control::{self, Applied, ControlCommand};
use crate::http_source::HttpPcmConnector;
use crate::status;
use pcm_pipeline::generator::run_generator;
use pcm_pipeline::sink::device;
use pcm_pipeline::{CpalSink, NullSink, PipelineContext, StreamPuller, spawn_playback};

/// Control loop wake-up when no status interval is configured.
const CONTROL_TICK: Duration = Duration::from_millis(500);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = device::list_devices(&host).context("failed to enumerate output devices")?;
    for (i, d) in devices.iter().enumerate() {
        let marker = if d.is_default { " (default)" } else { "" };
        println!(
            "#{i}: {}{marker} [{}-{} Hz, up to {} ch]",
            d.name, d.min_rate, d.max_rate, d.max_channels
        );
    }
    Ok(())
}

/// Run until Ctrl-C or a `quit` command.
pub fn run(config: RadioConfig) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    {
        let tx = tx.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            let _ = tx.send(ControlCommand::Quit);
        }) {
            tracing::warn!("ctrl-c handler not installed: {err}");
        }
    }
    if config.stdin_control {
        control::spawn_stdin_reader(tx.clone()).context("failed to start stdin reader")?;
        tracing::info!(
            "commands: start, stop, pause, resume, vol N, tone HZ, noise, idle, status, diag, reset, quit"
        );
    }
    let result = run_session(config, rx);
    drop(tx);
    result
}

/// Run the pipeline, applying commands from `commands` until `Quit` arrives or every
/// sender is gone.
pub fn run_session(config: RadioConfig, commands: Receiver<ControlCommand>) -> Result<()> {
    let ctx = PipelineContext::new(config.pipeline.clone()).context("invalid pipeline config")?;
    ctx.set_volume(config.volume);
    match &config.source {
        SourceConfig::Stream { .. } => ctx.start_stream(),
        SourceConfig::Signal(mode) => ctx.set_signal(*mode).context("invalid signal")?,
    }

    let playback = open_output(&ctx, &config).context("failed to open audio output")?;
    let producer = match spawn_producer(&ctx, &config.source) {
        Ok(handle) => handle,
        Err(err) => {
            ctx.request_shutdown();
            let _ = playback.join();
            return Err(err);
        }
    };

    let result = control_loop(&ctx, &config, &commands, &playback);

    ctx.stop_stream();
    ctx.request_shutdown();
    if producer.join().is_err() {
        tracing::error!("producer thread panicked");
    }
    if playback.join().is_err() {
        tracing::error!("playback thread panicked");
    }
    match status::status_line(&ctx) {
        Ok(line) => tracing::info!(status = %line, "final status"),
        Err(err) => tracing::warn!("status encode failed: {err}"),
    }
    result
}

fn open_output(ctx: &Arc<PipelineContext>, config: &RadioConfig) -> Result<JoinHandle<()>> {
    let audio = config.audio.clone();
    if config.null_output {
        tracing::info!("output: null (real-time pacing)");
        return spawn_playback(ctx.clone(), move || NullSink::open(audio, true));
    }
    let pins = config.pins.clone();
    let device = config.device.clone();
    spawn_playback(ctx.clone(), move || {
        CpalSink::open(audio, pins, device.as_deref())
    })
}

fn spawn_producer(ctx: &Arc<PipelineContext>, source: &SourceConfig) -> Result<JoinHandle<()>> {
    let ctx = ctx.clone();
    let handle = match source {
        SourceConfig::Stream {
            url,
            connect_timeout,
            read_timeout,
        } => {
            tracing::info!(url = %url, "source: http stream");
            let connector = HttpPcmConnector::new(url.clone(), *connect_timeout, *read_timeout);
            thread::Builder::new()
                .name("stream-puller".into())
                .spawn(move || {
                    let mut puller = StreamPuller::new(connector, ctx.config());
                    puller.run(&ctx);
                })?
        }
        SourceConfig::Signal(mode) => {
            tracing::info!(signal = %mode, "source: generator");
            thread::Builder::new()
                .name("generator".into())
                .spawn(move || run_generator(ctx))?
        }
    };
    Ok(handle)
}

fn control_loop(
    ctx: &PipelineContext,
    config: &RadioConfig,
    commands: &Receiver<ControlCommand>,
    playback: &JoinHandle<()>,
) -> Result<()> {
    let mut next_report = config.status_interval.map(|every| Instant::now() + every);
    loop {
        let wait = next_report
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(CONTROL_TICK)
            .min(CONTROL_TICK);
        match commands.recv_timeout(wait) {
            Ok(cmd) => match control::apply(ctx, cmd) {
                Applied::Continue => {}
                Applied::PrintStatus => status::print_status(ctx),
                Applied::PrintDiagnostics => status::log_diagnostics(ctx),
                Applied::Quit => {
                    tracing::info!("quit requested");
                    return Ok(());
                }
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if playback.is_finished() {
            return Err(anyhow!("playback thread exited unexpectedly"));
        }
        if let (Some(at), Some(every)) = (next_report, config.status_interval) {
            if Instant::now() >= at {
                status::print_status(ctx);
                next_report = Some(at + every);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;

    fn config(argv: &[&str]) -> RadioConfig {
        RadioConfig::from_args(&Args::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn noise_session_runs_until_quit() {
        let cfg = config(&[
            "radio",
            "--null-output",
            "--no-stdin",
            "--status-interval-secs",
            "0",
            "noise",
        ]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            tx.send(ControlCommand::SetVolume(30)).unwrap();
            tx.send(ControlCommand::Status).unwrap();
            tx.send(ControlCommand::Quit).unwrap();
        });
        let start = Instant::now();
        run_session(cfg, rx).unwrap();
        sender.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stream_session_survives_unreachable_source() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/stream", listener.local_addr().unwrap());
        drop(listener);
        let cfg = config(&[
            "radio",
            "--null-output",
            "--no-stdin",
            "--status-interval-secs",
            "0",
            "stream",
            url.as_str(),
            "--connect-timeout-secs",
            "1",
        ]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            drop(tx);
        });
        run_session(cfg, rx).unwrap();
        sender.join().unwrap();
    }

    #[test]
    fn invalid_output_config_fails_before_running() {
        let mut cfg = config(&["radio", "--null-output", "--no-stdin", "noise"]);
        cfg.audio.buffer_count = 0;
        let (_tx, rx) = crossbeam_channel::unbounded();
        assert!(run_session(cfg, rx).is_err());
    }
}
