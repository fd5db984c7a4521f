//! Consumer context: drains the queue at the sink's pace.
//!
//! One [`PlaybackLoop::cycle`] per chunk duration:
//! - real chunk → volume + encode → sink write, silence streak reset
//! - silence chunk, or empty queue while active → silence until the streak limit, then mute
//! - nothing requested → periodic sink buffer clear and a long poll

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use crossbeam_channel::RecvTimeoutError;
use radio_types::StreamPhase;

use crate::chunk::AudioChunk;
use crate::codec::encode_chunk;
use crate::context::PipelineContext;
use crate::sink::{OutputSink, SinkError};
use crate::status::{LogThrottle, PipelineCounters};

const STATS_PUBLISH_INTERVAL: Duration = Duration::from_millis(250);

/// How long [`spawn_playback`] waits for the output to open.
pub const OUTPUT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// What one consumer cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Paused: nothing written, queue untouched.
    Paused,
    /// Producer is pre-buffering: queue untouched.
    Buffering,
    /// Nothing requested.
    Idle,
    Played,
    SilenceWritten,
    /// Silence streak exceeded its limit; nothing written.
    Muted,
    /// Queue empty and the producer is not active; nothing written.
    Waiting,
}

pub struct PlaybackLoop<S> {
    ctx: Arc<PipelineContext>,
    sink: S,
    chunk: AudioChunk,
    encoded: Vec<u8>,
    silence_streak: u32,
    last_idle_clear: Option<Instant>,
    last_stats: Option<Instant>,
    underrun_log: LogThrottle,
    write_log: LogThrottle,
}

impl<S: OutputSink> PlaybackLoop<S> {
    pub fn new(ctx: Arc<PipelineContext>, sink: S) -> Self {
        let cfg = ctx.config();
        let chunk = AudioChunk::with_capacity(cfg.chunk_samples());
        // Worst case: 32-bit stereo output of a mono source.
        let encoded = Vec::with_capacity(cfg.chunk_frames() * 2 * 4);
        Self {
            ctx,
            sink,
            chunk,
            encoded,
            silence_streak: 0,
            last_idle_clear: None,
            last_stats: None,
            underrun_log: LogThrottle::new(Duration::from_secs(1)),
            write_log: LogThrottle::new(Duration::from_secs(1)),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn silence_streak(&self) -> u32 {
        self.silence_streak
    }

    /// Run one consumer cycle.
    pub fn cycle(&mut self) -> CycleOutcome {
        if self.ctx.take_stats_reset() {
            self.sink.reset_statistics();
            self.publish_stats(true);
            tracing::info!("output statistics reset");
        }
        let outcome = self.step();
        self.publish_stats(false);
        outcome
    }

    fn step(&mut self) -> CycleOutcome {
        let ctx = self.ctx.clone();
        let cfg = ctx.config();

        if ctx.is_paused() {
            ctx.sleep_unless(cfg.chunk_duration, |c| !c.is_paused());
            return CycleOutcome::Paused;
        }
        if ctx.is_requested() && ctx.phase() == StreamPhase::Buffering {
            ctx.sleep_unless(cfg.chunk_duration, |c| c.phase() != StreamPhase::Buffering);
            return CycleOutcome::Buffering;
        }
        if !ctx.is_requested() && !ctx.is_active() {
            self.idle();
            return CycleOutcome::Idle;
        }
        self.last_idle_clear = None;

        if ctx.queue().receive(&mut self.chunk, cfg.chunk_duration) {
            if self.chunk.is_silence() {
                return self.silence_step();
            }
            self.silence_streak = 0;
            self.write_current();
            PipelineCounters::bump(&ctx.counters().chunks_played);
            return CycleOutcome::Played;
        }

        if ctx.is_active() {
            let n = PipelineCounters::bump(&ctx.counters().underruns);
            if self.underrun_log.ready() {
                tracing::warn!(underruns = n, "queue empty while streaming");
            }
            return self.silence_step();
        }
        CycleOutcome::Waiting
    }

    fn idle(&mut self) {
        let cfg = self.ctx.config();
        let due = self
            .last_idle_clear
            .map(|t| t.elapsed() >= cfg.idle_clear_interval)
            .unwrap_or(true);
        if due {
            self.sink.clear_buffers();
            self.last_idle_clear = Some(Instant::now());
        }
        self.silence_streak = 0;
        self.ctx
            .sleep_unless(cfg.idle_poll, |c| c.is_requested() || c.is_active());
    }

    fn silence_step(&mut self) -> CycleOutcome {
        let cfg = self.ctx.config();
        self.silence_streak = self.silence_streak.saturating_add(1);
        if self.silence_streak > cfg.silence_streak_limit {
            if self.silence_streak == cfg.silence_streak_limit + 1 {
                tracing::info!(streak = self.silence_streak, "output muted");
            }
            return CycleOutcome::Muted;
        }
        self.chunk.fill_silence(cfg.chunk_samples());
        self.write_current();
        PipelineCounters::bump(&self.ctx.counters().silence_chunks);
        CycleOutcome::SilenceWritten
    }

    /// Encode the current chunk and hand it to the sink. Failures are counted, never raised.
    fn write_current(&mut self) {
        let cfg = self.ctx.config();
        let out = self.sink.config();
        let len = encode_chunk(
            self.chunk.samples(),
            cfg.channels,
            out.bit_depth(),
            out.channels,
            self.ctx.volume(),
            &mut self.encoded,
        );
        match self.sink.write(&self.encoded, cfg.chunk_duration * 2) {
            Ok(written) if written == len => {}
            Ok(0) => self.write_failed("output accepted nothing"),
            Ok(written) => {
                tracing::debug!(written, requested = len, "short output write");
                self.write_failed("output accepted a partial chunk");
            }
            Err(err) => self.write_failed(&err.to_string()),
        }
    }

    fn write_failed(&mut self, reason: &str) {
        let n = PipelineCounters::bump(&self.ctx.counters().write_errors);
        if self.write_log.ready() {
            tracing::warn!(write_errors = n, "output write failed: {reason}");
        }
    }

    fn publish_stats(&mut self, force: bool) {
        let due = self
            .last_stats
            .map(|t| t.elapsed() >= STATS_PUBLISH_INTERVAL)
            .unwrap_or(true);
        if force || due {
            self.ctx.publish_sink_stats(self.sink.stats());
            self.last_stats = Some(Instant::now());
        }
    }

    /// Cycle until shutdown, then flush the sink.
    pub fn run(mut self) {
        tracing::info!(
            silence_streak_limit = self.ctx.config().silence_streak_limit,
            "playback started"
        );
        while !self.ctx.is_shutdown() {
            self.cycle();
        }
        if let Err(err) = self.sink.flush() {
            tracing::warn!("output flush failed: {err}");
        }
        self.publish_stats(true);
        tracing::info!("playback stopped");
    }
}

/// Open a sink on a dedicated thread and run the playback loop there.
///
/// The sink is built inside the thread because some backends cannot move between threads.
/// Returns once the sink opened; an open failure is returned instead of a handle.
pub fn spawn_playback<S, F>(ctx: Arc<PipelineContext>, open_sink: F) -> Result<JoinHandle<()>>
where
    S: OutputSink + 'static,
    F: FnOnce() -> Result<S, SinkError> + Send + 'static,
{
    spawn_playback_within(ctx, open_sink, OUTPUT_OPEN_TIMEOUT)
}

/// [`spawn_playback`] with an explicit bound on the open. A sink that opens after the
/// caller gave up is dropped without playing.
pub fn spawn_playback_within<S, F>(
    ctx: Arc<PipelineContext>,
    open_sink: F,
    open_timeout: Duration,
) -> Result<JoinHandle<()>>
where
    S: OutputSink + 'static,
    F: FnOnce() -> Result<S, SinkError> + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), SinkError>>(1);
    let handle = thread::Builder::new()
        .name("playback".into())
        .spawn(move || {
            let sink = match open_sink() {
                Ok(sink) => sink,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                tracing::warn!("output opened after the open timeout; closing it");
                return;
            }
            PlaybackLoop::new(ctx, sink).run();
        })?;

    match ready_rx.recv_timeout(open_timeout) {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err.into())
        }
        Err(RecvTimeoutError::Timeout) => Err(SinkError::OpenTimeout(open_timeout).into()),
        Err(RecvTimeoutError::Disconnected) => {
            Err(anyhow!("playback thread exited before the output opened"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_i16_le;
    use crate::config::{AudioConfig, PipelineConfig};
    use crate::puller::{ConnectError, StreamConnector, StreamPuller};
    use crate::queue::OverflowPolicy;
    use crate::sink::NullSink;
    use radio_types::{SinkState, SinkStats};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct RecordingSink {
        config: AudioConfig,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        clears: usize,
        resets: usize,
    }

    impl RecordingSink {
        fn new(channels: u16) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let sink = Self {
                config: AudioConfig {
                    sample_rate: 32_000,
                    channels,
                    ..AudioConfig::default()
                },
                writes: writes.clone(),
                clears: 0,
                resets: 0,
            };
            (sink, writes)
        }
    }

    impl OutputSink for RecordingSink {
        fn config(&self) -> &AudioConfig {
            &self.config
        }

        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, SinkError> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn clear_buffers(&mut self) {
            self.clears += 1;
        }

        fn stats(&self) -> SinkStats {
            SinkStats::default()
        }

        fn reset_statistics(&mut self) {
            self.resets += 1;
        }
    }

    /// Rejects the first write and half-accepts the second.
    struct FlakySink {
        config: AudioConfig,
        calls: usize,
    }

    impl OutputSink for FlakySink {
        fn config(&self) -> &AudioConfig {
            &self.config
        }

        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, SinkError> {
            self.calls += 1;
            match self.calls {
                1 => Err(SinkError::NotReady(SinkState::Stopped)),
                2 => Ok(bytes.len() / 2),
                _ => Ok(bytes.len()),
            }
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn clear_buffers(&mut self) {}

        fn stats(&self) -> SinkStats {
            SinkStats::default()
        }

        fn reset_statistics(&mut self) {}
    }

    struct NoConnector;

    impl StreamConnector for NoConnector {
        type Stream = Cursor<Vec<u8>>;

        fn connect(&mut self) -> Result<Self::Stream, ConnectError> {
            Err(ConnectError::Transport("unused".into()))
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            chunk_duration: Duration::from_millis(5),
            idle_poll: Duration::from_millis(5),
            queue_depth: 16,
            ..PipelineConfig::network()
        }
    }

    fn decode(bytes: &[u8]) -> Vec<i16> {
        let mut out = vec![0i16; bytes.len() / 2];
        read_i16_le(bytes, &mut out);
        out
    }

    fn real_chunk(cfg: &PipelineConfig, value: i16) -> AudioChunk {
        let mut chunk = AudioChunk::with_capacity(cfg.chunk_samples());
        chunk.storage_mut().fill(value);
        chunk.commit(cfg.chunk_samples(), None);
        chunk
    }

    #[test]
    fn silence_streak_is_bounded_then_mutes() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        ctx.set_active(true);
        let (sink, writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);

        let outcomes: Vec<_> = (0..5).map(|_| playback.cycle()).collect();
        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::SilenceWritten,
                CycleOutcome::SilenceWritten,
                CycleOutcome::SilenceWritten,
                CycleOutcome::SilenceWritten,
                CycleOutcome::Muted,
            ]
        );
        {
            let writes = writes.lock().unwrap();
            assert_eq!(writes.len(), 4);
            assert!(writes.iter().all(|w| w.iter().all(|b| *b == 0)));
        }
        assert_eq!(PipelineCounters::get(&ctx.counters().underruns), 5);
        assert_eq!(PipelineCounters::get(&ctx.counters().silence_chunks), 4);

        ctx.queue().send(&real_chunk(&cfg, 7), OverflowPolicy::EvictOldest);
        assert_eq!(playback.cycle(), CycleOutcome::Played);
        assert_eq!(playback.silence_streak(), 0);
        assert_eq!(playback.cycle(), CycleOutcome::SilenceWritten);
        assert_eq!(writes.lock().unwrap().len(), 6);
    }

    #[test]
    fn queued_silence_counts_toward_streak() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        let mut silence = AudioChunk::with_capacity(cfg.chunk_samples());
        silence.fill_silence(cfg.chunk_samples());
        for _ in 0..6 {
            ctx.queue().send(&silence, OverflowPolicy::EvictOldest);
        }
        let (sink, writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);

        let outcomes: Vec<_> = (0..6).map(|_| playback.cycle()).collect();
        assert_eq!(
            outcomes.iter().filter(|o| **o == CycleOutcome::SilenceWritten).count(),
            4
        );
        assert_eq!(outcomes[4], CycleOutcome::Muted);
        assert_eq!(writes.lock().unwrap().len(), 4);
        assert_eq!(PipelineCounters::get(&ctx.counters().underruns), 0);
    }

    #[test]
    fn end_to_end_stream_plays_every_chunk_in_order() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();

        let mut bytes = Vec::new();
        for i in 1..=10i16 {
            for _ in 0..cfg.chunk_samples() {
                bytes.extend_from_slice(&(i * 100).to_le_bytes());
            }
        }
        let mut puller = StreamPuller::new(NoConnector, &cfg);
        puller.stream_session(&ctx, Cursor::new(bytes));
        assert_eq!(ctx.queue().count(), 10);

        let (sink, writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);
        let mut played = 0;
        for _ in 0..20 {
            match playback.cycle() {
                CycleOutcome::Played => played += 1,
                CycleOutcome::Waiting => break,
                other => panic!("unexpected cycle outcome {other:?}"),
            }
        }
        assert_eq!(played, 10);

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 10);
        for (i, w) in writes.iter().enumerate() {
            let samples = decode(w);
            assert_eq!(samples.len(), cfg.chunk_samples());
            assert!(samples.iter().all(|s| *s == (i as i16 + 1) * 100));
        }
        assert_eq!(ctx.queue().overflow_count(), 0);
        assert_eq!(PipelineCounters::get(&ctx.counters().underruns), 0);
        assert_eq!(PipelineCounters::get(&ctx.counters().silence_chunks), 0);
    }

    #[test]
    fn volume_is_applied_on_write() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        ctx.set_volume(50);
        ctx.queue().send(&real_chunk(&cfg, 1000), OverflowPolicy::EvictOldest);

        let (sink, writes) = RecordingSink::new(2);
        let mut playback = PlaybackLoop::new(ctx, sink);
        assert_eq!(playback.cycle(), CycleOutcome::Played);

        let samples = decode(&writes.lock().unwrap()[0]);
        assert_eq!(samples.len(), cfg.chunk_samples() * 2);
        assert!(samples.iter().all(|s| *s == 500));
    }

    #[test]
    fn pause_holds_queue() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        ctx.set_active(true);
        ctx.queue().send(&real_chunk(&cfg, 1), OverflowPolicy::EvictOldest);
        ctx.pause();

        let (sink, writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);
        assert_eq!(playback.cycle(), CycleOutcome::Paused);
        assert_eq!(ctx.queue().count(), 1);
        assert!(writes.lock().unwrap().is_empty());

        ctx.resume();
        assert_eq!(playback.cycle(), CycleOutcome::Played);
    }

    #[test]
    fn buffering_phase_holds_queue() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        ctx.set_phase(StreamPhase::Buffering);
        ctx.queue().send(&real_chunk(&cfg, 1), OverflowPolicy::EvictOldest);

        let (sink, _writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);
        assert_eq!(playback.cycle(), CycleOutcome::Buffering);
        assert_eq!(ctx.queue().count(), 1);
    }

    #[test]
    fn idle_clears_sink_periodically() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg).unwrap();
        let (sink, writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx, sink);

        assert_eq!(playback.cycle(), CycleOutcome::Idle);
        assert_eq!(playback.cycle(), CycleOutcome::Idle);
        assert_eq!(playback.sink().clears, 1);
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn spawn_reports_sink_open_failure() {
        let ctx = PipelineContext::new(fast_config()).unwrap();
        let result = spawn_playback(ctx, || {
            NullSink::open(
                AudioConfig {
                    bits_per_sample: 12,
                    ..AudioConfig::default()
                },
                false,
            )
        });
        assert!(result.is_err());
    }

    #[test]
    fn spawned_loop_exits_on_shutdown() {
        let ctx = PipelineContext::new(fast_config()).unwrap();
        let handle = spawn_playback(ctx.clone(), || NullSink::open(AudioConfig::default(), false))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        ctx.request_shutdown();
        handle.join().unwrap();
        assert!(ctx.status().sink.is_some());
    }

    #[test]
    fn failed_and_short_writes_show_in_status() {
        let cfg = fast_config();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        for value in [1, 2, 3] {
            ctx.queue().send(&real_chunk(&cfg, value), OverflowPolicy::EvictOldest);
        }
        let sink = FlakySink {
            config: AudioConfig {
                sample_rate: 32_000,
                channels: 1,
                ..AudioConfig::default()
            },
            calls: 0,
        };
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);
        for _ in 0..3 {
            assert_eq!(playback.cycle(), CycleOutcome::Played);
        }
        let status = ctx.status();
        assert_eq!(status.write_errors, 2);
        assert_eq!(status.chunks_played, 3);
    }

    #[test]
    fn stats_reset_request_reaches_sink_once() {
        let ctx = PipelineContext::new(fast_config()).unwrap();
        let (sink, _writes) = RecordingSink::new(1);
        let mut playback = PlaybackLoop::new(ctx.clone(), sink);

        ctx.request_stats_reset();
        playback.cycle();
        assert_eq!(playback.sink().resets, 1);
        playback.cycle();
        assert_eq!(playback.sink().resets, 1);
    }

    #[test]
    fn spawn_gives_up_on_slow_open() {
        let ctx = PipelineContext::new(fast_config()).unwrap();
        let start = Instant::now();
        let result = spawn_playback_within(
            ctx,
            || {
                std::thread::sleep(Duration::from_millis(300));
                NullSink::open(AudioConfig::default(), false)
            },
            Duration::from_millis(50),
        );
        let err = result.err().expect("slow open must fail");
        assert!(matches!(
            err.downcast_ref::<SinkError>(),
            Some(SinkError::OpenTimeout(_))
        ));
        assert!(start.elapsed() < Duration::from_millis(250));
    }
}
