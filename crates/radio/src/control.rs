//! Control surface.
//!
//! Commands arrive over a crossbeam channel (stdin reader, Ctrl-C handler) and are applied to
//! the pipeline context on the main thread.

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam_channel::Sender;

use pcm_pipeline::{PipelineContext, ProducerMode, SignalMode};

/// Tone used when `start` is issued in synthetic mode with nothing selected.
pub const DEFAULT_TONE_HZ: f32 = 440.0;

/// Commands accepted by the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Pause,
    Resume,
    SetVolume(u8),
    Signal(SignalMode),
    Status,
    Diagnostics,
    ResetStats,
    Quit,
}

/// Parse one line of user input.
pub fn parse_command(line: &str) -> Result<ControlCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Err("empty command".into());
    };
    let arg = parts.next();
    let cmd = match (word.to_ascii_lowercase().as_str(), arg) {
        ("start" | "play", None) => ControlCommand::Start,
        ("stop", None) => ControlCommand::Stop,
        ("pause", None) => ControlCommand::Pause,
        ("resume", None) => ControlCommand::Resume,
        ("vol" | "volume", Some(v)) => {
            let value: u8 = v.parse().map_err(|_| format!("invalid volume: {v}"))?;
            if value > 100 {
                return Err(format!("volume out of range: {value}"));
            }
            ControlCommand::SetVolume(value)
        }
        ("tone", Some(hz)) => {
            let hz: f32 = hz.parse().map_err(|_| format!("invalid frequency: {hz}"))?;
            if !(hz.is_finite() && hz > 0.0) {
                return Err(format!("frequency must be positive: {hz}"));
            }
            ControlCommand::Signal(SignalMode::Tone(hz))
        }
        ("noise", None) => ControlCommand::Signal(SignalMode::Noise),
        ("idle", None) => ControlCommand::Signal(SignalMode::Idle),
        ("status", None) => ControlCommand::Status,
        ("diag" | "diagnostics", None) => ControlCommand::Diagnostics,
        ("reset", None) => ControlCommand::ResetStats,
        ("quit" | "exit", None) => ControlCommand::Quit,
        (other, _) => return Err(format!("unknown command: {other}")),
    };
    if parts.next().is_some() {
        return Err(format!("too many arguments for {word}"));
    }
    Ok(cmd)
}

/// Read commands from stdin until EOF. EOF does not quit the program.
pub fn spawn_stdin_reader(tx: Sender<ControlCommand>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("stdin-control".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!("stdin read failed: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(msg) => tracing::warn!("{msg}"),
                }
            }
            tracing::debug!("stdin closed");
        })?;
    Ok(handle)
}

/// What the control loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Continue,
    PrintStatus,
    PrintDiagnostics,
    Quit,
}

/// Apply a command to the pipeline.
pub fn apply(ctx: &PipelineContext, cmd: ControlCommand) -> Applied {
    let mode = ctx.config().mode;
    match cmd {
        ControlCommand::Start => match mode {
            ProducerMode::Network => ctx.start_stream(),
            ProducerMode::Synthetic => {
                if ctx.signal() == SignalMode::Idle {
                    select_signal(ctx, SignalMode::Tone(DEFAULT_TONE_HZ));
                }
            }
        },
        ControlCommand::Stop => match mode {
            ProducerMode::Network => ctx.stop_stream(),
            ProducerMode::Synthetic => select_signal(ctx, SignalMode::Idle),
        },
        ControlCommand::Pause => ctx.pause(),
        ControlCommand::Resume => ctx.resume(),
        ControlCommand::SetVolume(v) => {
            ctx.set_volume(v);
        }
        ControlCommand::Signal(signal) => match mode {
            ProducerMode::Synthetic => select_signal(ctx, signal),
            ProducerMode::Network => {
                tracing::warn!(%signal, "signal selection needs tone or noise mode");
            }
        },
        ControlCommand::ResetStats => ctx.request_stats_reset(),
        ControlCommand::Status => return Applied::PrintStatus,
        ControlCommand::Diagnostics => return Applied::PrintDiagnostics,
        ControlCommand::Quit => return Applied::Quit,
    }
    Applied::Continue
}

fn select_signal(ctx: &PipelineContext, signal: SignalMode) {
    if let Err(err) = ctx.set_signal(signal) {
        tracing::warn!("{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_pipeline::PipelineConfig;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("start"), Ok(ControlCommand::Start));
        assert_eq!(parse_command("  STOP "), Ok(ControlCommand::Stop));
        assert_eq!(parse_command("pause"), Ok(ControlCommand::Pause));
        assert_eq!(parse_command("resume"), Ok(ControlCommand::Resume));
        assert_eq!(parse_command("status"), Ok(ControlCommand::Status));
        assert_eq!(parse_command("quit"), Ok(ControlCommand::Quit));
        assert_eq!(parse_command("reset"), Ok(ControlCommand::ResetStats));
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(parse_command("vol 35"), Ok(ControlCommand::SetVolume(35)));
        assert_eq!(
            parse_command("tone 880"),
            Ok(ControlCommand::Signal(SignalMode::Tone(880.0)))
        );
        assert_eq!(
            parse_command("noise"),
            Ok(ControlCommand::Signal(SignalMode::Noise))
        );
        assert_eq!(
            parse_command("idle"),
            Ok(ControlCommand::Signal(SignalMode::Idle))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("vol").is_err());
        assert!(parse_command("vol 101").is_err());
        assert!(parse_command("vol loud").is_err());
        assert!(parse_command("tone -5").is_err());
        assert!(parse_command("start now").is_err());
        assert!(parse_command("rewind").is_err());
    }

    #[test]
    fn network_start_stop_toggle_request() {
        let ctx = PipelineContext::new(PipelineConfig::network()).unwrap();
        assert_eq!(apply(&ctx, ControlCommand::Start), Applied::Continue);
        assert!(ctx.is_requested());
        apply(&ctx, ControlCommand::Signal(SignalMode::Noise));
        assert_eq!(ctx.signal(), SignalMode::Idle);
        apply(&ctx, ControlCommand::Stop);
        assert!(!ctx.is_requested());
    }

    #[test]
    fn synthetic_start_picks_default_tone() {
        let ctx = PipelineContext::new(PipelineConfig::synthetic()).unwrap();
        apply(&ctx, ControlCommand::Start);
        assert_eq!(ctx.signal(), SignalMode::Tone(DEFAULT_TONE_HZ));
        apply(&ctx, ControlCommand::Signal(SignalMode::Noise));
        apply(&ctx, ControlCommand::Start);
        assert_eq!(ctx.signal(), SignalMode::Noise);
        apply(&ctx, ControlCommand::Stop);
        assert!(!ctx.is_requested());
    }

    #[test]
    fn volume_and_pause_apply() {
        let ctx = PipelineContext::new(PipelineConfig::network()).unwrap();
        apply(&ctx, ControlCommand::SetVolume(20));
        assert_eq!(ctx.volume(), 20);
        apply(&ctx, ControlCommand::Pause);
        assert!(ctx.is_paused());
        apply(&ctx, ControlCommand::Resume);
        assert!(!ctx.is_paused());
        assert_eq!(apply(&ctx, ControlCommand::Quit), Applied::Quit);
        assert_eq!(apply(&ctx, ControlCommand::Status), Applied::PrintStatus);
        apply(&ctx, ControlCommand::ResetStats);
        assert!(ctx.take_stats_reset());
    }
}
