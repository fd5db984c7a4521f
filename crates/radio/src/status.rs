use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::Serialize;

use pcm_pipeline::PipelineContext;
use radio_types::PipelineStatus;

/// One line of status output.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub status: PipelineStatus,
}

impl StatusReport {
    pub fn capture(ctx: &PipelineContext) -> Self {
        Self {
            timestamp_ms: now_ms(),
            status: ctx.status(),
        }
    }
}

/// Current status as a single JSON line.
pub fn status_line(ctx: &PipelineContext) -> Result<String> {
    Ok(serde_json::to_string(&StatusReport::capture(ctx))?)
}

/// Print the status line to stdout.
pub fn print_status(ctx: &PipelineContext) {
    match status_line(ctx) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!("status encode failed: {err}"),
    }
}

/// Log everything the pipeline knows about itself.
pub fn log_diagnostics(ctx: &PipelineContext) {
    let status = ctx.status();
    let cfg = ctx.config();
    tracing::info!(
        mode = ?cfg.mode,
        sample_rate = cfg.sample_rate,
        channels = cfg.channels,
        chunk_ms = cfg.chunk_duration.as_millis() as u64,
        prebuffer_chunks = cfg.prebuffer_threshold(),
        phase = status.phase.label(),
        queue = status.queue_count,
        capacity = status.queue_capacity,
        overflows = status.overflow_count,
        underruns = status.underrun_count,
        silence = status.silence_chunks,
        played = status.chunks_played,
        write_errors = status.write_errors,
        "pipeline diagnostics"
    );
    match status.sink {
        Some(sink) => {
            if sink.is_nearly_full() {
                tracing::info!(utilization = sink.utilization_percent, "output buffer nearly full");
            } else if sink.is_nearly_empty() {
                tracing::info!(utilization = sink.utilization_percent, "output buffer nearly empty");
            }
            tracing::info!(
                state = sink.state.label(),
                bytes = sink.bytes_written,
                packets = sink.packets_written,
                overflows = sink.overflows,
                underruns = sink.underruns,
                write_errors = sink.write_errors,
                ms_since_last_write = ?sink.ms_since_last_write,
                "output diagnostics"
            );
        }
        None => tracing::info!("output has not reported yet"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
