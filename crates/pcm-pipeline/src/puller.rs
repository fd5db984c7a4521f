//! Network producer: pulls raw s16le PCM from a long-lived connection and re-chunks it.
//!
//! Session lifecycle while streaming is requested:
//! - connect (failures queue a few silence chunks, then back off)
//! - pre-buffer until the queue reaches the threshold or the timeout passes
//! - stream; a full queue evicts its oldest chunk
//! - on EOF or read error, drop the partial chunk, back off and reconnect

use std::io::{self, Read};

use radio_types::StreamPhase;
use thiserror::Error;

use crate::chunk::AudioChunk;
use crate::codec::read_i16_le;
use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::queue::{OverflowPolicy, SendOutcome};
use crate::status::{LogThrottle, PipelineCounters};

/// Why a connection attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("server answered HTTP {0}")]
    Status(u16),
    #[error("connection failed: {0}")]
    Transport(String),
}

/// Opens the pull connection to the PCM source.
///
/// The returned reader must have a bounded read timeout so a stop request is observed.
pub trait StreamConnector {
    type Stream: Read;

    fn connect(&mut self) -> Result<Self::Stream, ConnectError>;
}

/// How a streaming session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    StopRequested,
    Eof,
    ReadError,
}

/// Splits an arbitrary byte stream into fixed-size, sample-aligned chunks.
///
/// Bytes that do not complete a chunk are kept and prefixed to the next push.
#[derive(Debug)]
pub struct ChunkAssembler {
    pending: Vec<u8>,
    chunk_bytes: usize,
}

impl ChunkAssembler {
    /// `chunk_bytes` is rounded down to an even size (minimum one sample).
    pub fn new(chunk_bytes: usize) -> Self {
        let chunk_bytes = (chunk_bytes & !1).max(2);
        Self {
            pending: Vec::with_capacity(chunk_bytes),
            chunk_bytes,
        }
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Bytes held back waiting for the rest of a chunk.
    pub fn leftover(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Feed `data`, calling `emit` once per completed chunk. Returns the number emitted.
    pub fn push(&mut self, mut data: &[u8], mut emit: impl FnMut(&[u8])) -> usize {
        let mut emitted = 0;
        loop {
            let need = self.chunk_bytes - self.pending.len();
            if data.len() < need {
                self.pending.extend_from_slice(data);
                return emitted;
            }
            if self.pending.is_empty() {
                emit(&data[..need]);
            } else {
                self.pending.extend_from_slice(&data[..need]);
                emit(&self.pending);
                self.pending.clear();
            }
            data = &data[need..];
            emitted += 1;
        }
    }
}

/// Producer loop for [`crate::config::ProducerMode::Network`].
pub struct StreamPuller<C> {
    connector: C,
    assembler: ChunkAssembler,
    chunk: AudioChunk,
    read_buf: Vec<u8>,
    evict_log: LogThrottle,
}

impl<C: StreamConnector> StreamPuller<C> {
    pub fn new(connector: C, config: &PipelineConfig) -> Self {
        let chunk_bytes = config.chunk_bytes();
        Self {
            connector,
            assembler: ChunkAssembler::new(chunk_bytes),
            chunk: AudioChunk::with_capacity(config.chunk_samples()),
            read_buf: vec![0; chunk_bytes],
            evict_log: LogThrottle::new(std::time::Duration::from_secs(1)),
        }
    }

    /// Run until shutdown, connecting whenever streaming is requested.
    pub fn run(&mut self, ctx: &PipelineContext) {
        let cfg = ctx.config();
        let mut was_requested = false;
        tracing::info!(
            chunk_bytes = self.assembler.chunk_bytes(),
            prebuffer_chunks = cfg.prebuffer_threshold(),
            "stream puller started"
        );

        while !ctx.is_shutdown() {
            if !ctx.is_requested() {
                if was_requested {
                    was_requested = false;
                    ctx.set_active(false);
                    ctx.set_phase(StreamPhase::Stopped);
                    tracing::info!("stream stopped");
                }
                ctx.sleep_unless(cfg.idle_poll, |c| c.is_requested());
                continue;
            }

            if !was_requested {
                was_requested = true;
                let stale = ctx.queue().clear();
                if stale > 0 {
                    tracing::debug!(stale, "cleared stale chunks before connecting");
                }
            }

            ctx.set_phase(StreamPhase::Connecting);
            match self.connector.connect() {
                Ok(reader) => {
                    tracing::info!("stream connected");
                    match self.stream_session(ctx, reader) {
                        SessionEnd::StopRequested => {}
                        end => {
                            let n = PipelineCounters::bump(&ctx.counters().reconnects);
                            tracing::warn!(?end, reconnects = n, "stream ended; reconnecting");
                            ctx.sleep_unless(cfg.reconnect_backoff, |c| !c.is_requested());
                        }
                    }
                }
                Err(err) => {
                    let n = PipelineCounters::bump(&ctx.counters().connect_failures);
                    ctx.set_phase(StreamPhase::Error);
                    tracing::warn!(failures = n, "stream connect failed: {err}");
                    self.queue_error_silence(ctx);
                    ctx.sleep_unless(cfg.reconnect_backoff, |c| !c.is_requested());
                }
            }
        }

        ctx.set_active(false);
        ctx.set_phase(StreamPhase::Stopped);
        tracing::info!("stream puller stopped");
    }

    /// Keep the consumer fed with explicit silence while the source is unreachable.
    fn queue_error_silence(&mut self, ctx: &PipelineContext) {
        let cfg = ctx.config();
        self.chunk.fill_silence(cfg.chunk_samples());
        for _ in 0..cfg.error_silence_chunks {
            ctx.queue().send(&self.chunk, OverflowPolicy::EvictOldest);
        }
    }

    /// Pump one connection until it ends or streaming is no longer requested.
    ///
    /// Queued chunks are left in place when the session ends; the partial chunk is dropped.
    pub fn stream_session<R: Read>(&mut self, ctx: &PipelineContext, mut reader: R) -> SessionEnd {
        let cfg = ctx.config();
        let threshold = cfg.prebuffer_threshold();

        ctx.begin_prebuffer(cfg.prebuffer_timeout);
        self.assembler.reset();

        let Self {
            assembler,
            chunk,
            read_buf,
            evict_log,
            ..
        } = self;

        let end = loop {
            if ctx.is_shutdown() || !ctx.is_requested() {
                break SessionEnd::StopRequested;
            }
            let read = reader.read(read_buf);
            // A stop that lands during a blocking read is not a connection failure.
            if ctx.is_shutdown() || !ctx.is_requested() {
                break SessionEnd::StopRequested;
            }
            let n = match read {
                Ok(0) => break SessionEnd::Eof,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!("stream read failed: {err}");
                    break SessionEnd::ReadError;
                }
            };

            assembler.push(&read_buf[..n], |bytes| {
                enqueue_chunk(ctx, chunk, bytes, evict_log);
            });

            let queued = ctx.queue().count();
            if queued >= threshold && ctx.finish_prebuffer() {
                tracing::info!(queued, threshold, "pre-buffering complete");
            }
        };

        let leftover = assembler.leftover();
        if leftover > 0 {
            tracing::debug!(leftover, "discarding partial chunk");
        }
        assembler.reset();
        ctx.cancel_prebuffer();
        ctx.set_active(false);
        ctx.set_phase(if ctx.is_requested() {
            StreamPhase::Connecting
        } else {
            StreamPhase::Stopped
        });
        end
    }
}

fn enqueue_chunk(ctx: &PipelineContext, chunk: &mut AudioChunk, bytes: &[u8], log: &LogThrottle) {
    let n = read_i16_le(bytes, chunk.storage_mut());
    chunk.commit(n, None);

    let queue = ctx.queue();
    if !queue.wait_for_space(ctx.config().space_wait) && log.ready() {
        tracing::debug!(queued = queue.count(), "queue full; evicting oldest chunk");
    }
    if queue.send(chunk, OverflowPolicy::EvictOldest) == SendOutcome::Evicted {
        tracing::trace!(evicted = queue.evicted_count(), "oldest chunk evicted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn test_config(depth: usize) -> PipelineConfig {
        PipelineConfig {
            queue_depth: depth,
            space_wait: Duration::from_millis(1),
            reconnect_backoff: Duration::from_millis(20),
            idle_poll: Duration::from_millis(5),
            ..PipelineConfig::network()
        }
    }

    /// `chunks` chunk-equivalents of s16le where every sample of chunk `i` equals `i`.
    fn tagged_stream(cfg: &PipelineConfig, chunks: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for i in 0..chunks {
            for _ in 0..cfg.chunk_samples() {
                bytes.extend_from_slice(&(i as i16).to_le_bytes());
            }
        }
        bytes
    }

    fn queued_tags(ctx: &PipelineContext) -> Vec<i16> {
        let mut out = AudioChunk::with_capacity(ctx.config().chunk_samples());
        let mut tags = Vec::new();
        while ctx.queue().receive(&mut out, Duration::ZERO) {
            tags.push(out.samples()[0]);
        }
        tags
    }

    struct NoConnector;

    impl StreamConnector for NoConnector {
        type Stream = Cursor<Vec<u8>>;

        fn connect(&mut self) -> Result<Self::Stream, ConnectError> {
            Err(ConnectError::Status(503))
        }
    }

    /// Delivers at most `max_read` bytes per call and remembers whether the stream was
    /// active at each call.
    struct TrickleReader<'a> {
        inner: Cursor<Vec<u8>>,
        max_read: usize,
        ctx: &'a PipelineContext,
        active_seen: Vec<bool>,
    }

    impl Read for TrickleReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.active_seen.push(self.ctx.is_active());
            let n = buf.len().min(self.max_read);
            self.inner.read(&mut buf[..n])
        }
    }

    /// Hands out `first` on the first read, then blocks for `stall` and ends with `last`.
    struct StallingReader {
        first: Option<Vec<u8>>,
        stall: Duration,
        last: io::ErrorKind,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(data) = self.first.take() {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok(n);
            }
            std::thread::sleep(self.stall);
            match self.last {
                io::ErrorKind::UnexpectedEof => Ok(0),
                kind => Err(io::Error::new(kind, "stalled")),
            }
        }
    }

    #[test]
    fn assembler_accounts_for_every_byte() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let mut asm = ChunkAssembler::new(64);
            let total: usize = rng.gen_range(0..2000);
            let data = vec![0xABu8; total];
            let mut emitted = 0usize;
            let mut offset = 0usize;
            while offset < total {
                let step = rng.gen_range(1..=97).min(total - offset);
                asm.push(&data[offset..offset + step], |bytes| {
                    assert_eq!(bytes.len() % 2, 0);
                    assert_eq!(bytes.len(), 64);
                    emitted += bytes.len();
                });
                offset += step;
            }
            assert_eq!(emitted + asm.leftover(), total);
        }
    }

    #[test]
    fn assembler_rounds_chunk_size_to_whole_samples() {
        let asm = ChunkAssembler::new(33);
        assert_eq!(asm.chunk_bytes(), 32);
        assert_eq!(ChunkAssembler::new(1).chunk_bytes(), 2);
    }

    #[test]
    fn assembler_joins_split_samples() {
        let mut asm = ChunkAssembler::new(4);
        let mut chunks = Vec::new();
        asm.push(&[1], |b| chunks.push(b.to_vec()));
        asm.push(&[2, 3], |b| chunks.push(b.to_vec()));
        asm.push(&[4, 5, 6, 7, 8, 9], |b| chunks.push(b.to_vec()));
        assert_eq!(chunks, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(asm.leftover(), 1);
    }

    #[test]
    fn session_queues_chunks_in_order() {
        let cfg = test_config(16);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        let mut puller = StreamPuller::new(NoConnector, &cfg);

        let end = puller.stream_session(&ctx, Cursor::new(tagged_stream(&cfg, 10)));
        assert_eq!(end, SessionEnd::Eof);
        assert!(!ctx.is_active());
        assert_eq!(ctx.phase(), StreamPhase::Connecting);
        assert_eq!(queued_tags(&ctx), (0..10).collect::<Vec<i16>>());
        assert_eq!(ctx.queue().overflow_count(), 0);
    }

    #[test]
    fn session_goes_active_once_prebuffer_threshold_reached() {
        let cfg = test_config(8);
        let threshold = cfg.prebuffer_threshold();
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        let mut puller = StreamPuller::new(NoConnector, &cfg);

        let mut reader = TrickleReader {
            inner: Cursor::new(tagged_stream(&cfg, 8)),
            max_read: cfg.chunk_bytes(),
            ctx: &ctx,
            active_seen: Vec::new(),
        };
        puller.stream_session(&ctx, &mut reader);

        // Read call k happens with k chunks queued.
        let first_active = reader.active_seen.iter().position(|a| *a).unwrap();
        assert_eq!(first_active, threshold);
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let cfg = test_config(4);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        let mut puller = StreamPuller::new(NoConnector, &cfg);

        puller.stream_session(&ctx, Cursor::new(tagged_stream(&cfg, 6)));
        assert_eq!(ctx.queue().evicted_count(), 2);
        assert_eq!(queued_tags(&ctx), vec![2, 3, 4, 5]);
    }

    #[test]
    fn partial_chunk_is_discarded_at_disconnect() {
        let cfg = test_config(8);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        let mut puller = StreamPuller::new(NoConnector, &cfg);

        let mut bytes = tagged_stream(&cfg, 3);
        bytes.truncate(bytes.len() - cfg.chunk_bytes() / 2);
        puller.stream_session(&ctx, Cursor::new(bytes));
        assert_eq!(ctx.queue().count(), 2);
        assert_eq!(puller.assembler.leftover(), 0);
    }

    #[test]
    fn session_stops_when_request_cleared() {
        let cfg = test_config(8);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        let mut puller = StreamPuller::new(NoConnector, &cfg);

        let end = puller.stream_session(&ctx, Cursor::new(tagged_stream(&cfg, 3)));
        assert_eq!(end, SessionEnd::StopRequested);
        assert_eq!(ctx.phase(), StreamPhase::Stopped);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn connect_failure_queues_silence_and_retries() {
        let cfg = test_config(8);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();

        let worker = ctx.clone();
        let handle = std::thread::spawn(move || {
            let mut puller = StreamPuller::new(NoConnector, worker.config());
            puller.run(&worker);
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while PipelineCounters::get(&ctx.counters().connect_failures) < 2
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(PipelineCounters::get(&ctx.counters().connect_failures) >= 2);
        assert!(!ctx.is_active());

        let mut out = AudioChunk::with_capacity(cfg.chunk_samples());
        assert!(ctx.queue().receive(&mut out, Duration::ZERO));
        assert!(out.is_silence());
        assert_eq!(out.len(), cfg.chunk_samples());

        ctx.request_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn ended_sessions_count_reconnects() {
        struct OneShot(Arc<Vec<u8>>);

        impl StreamConnector for OneShot {
            type Stream = Cursor<Vec<u8>>;

            fn connect(&mut self) -> Result<Self::Stream, ConnectError> {
                Ok(Cursor::new(self.0.as_ref().clone()))
            }
        }

        let cfg = test_config(8);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();
        let data = Arc::new(tagged_stream(&cfg, 1));

        let worker = ctx.clone();
        let handle = std::thread::spawn(move || {
            let mut puller = StreamPuller::new(OneShot(data), worker.config());
            puller.run(&worker);
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while PipelineCounters::get(&ctx.counters().reconnects) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(PipelineCounters::get(&ctx.counters().reconnects) >= 2);

        ctx.stop_stream();
        ctx.request_shutdown();
        handle.join().unwrap();
        assert_eq!(ctx.phase(), StreamPhase::Stopped);
    }

    #[test]
    fn prebuffer_timeout_opens_gate_while_read_stalls() {
        let cfg = PipelineConfig {
            prebuffer_timeout: Duration::from_millis(50),
            ..test_config(20)
        };
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();

        let worker = ctx.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            let mut puller = StreamPuller::new(NoConnector, worker.config());
            let reader = StallingReader {
                first: Some(tagged_stream(worker.config(), 1)),
                stall: Duration::from_millis(400),
                last: io::ErrorKind::UnexpectedEof,
            };
            puller.stream_session(&worker, reader)
        });

        let mut opened_at = None;
        while start.elapsed() < Duration::from_secs(1) {
            if ctx.is_active() {
                opened_at = Some(start.elapsed());
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        let opened_at = opened_at.expect("gate never opened");
        assert!(opened_at >= Duration::from_millis(50));
        assert!(opened_at < Duration::from_millis(250), "opened after {opened_at:?}");
        assert_eq!(ctx.phase(), StreamPhase::Playing);
        assert_eq!(ctx.queue().count(), 1);

        assert_eq!(handle.join().unwrap(), SessionEnd::Eof);
        assert!(!ctx.is_active());
        assert_eq!(ctx.phase(), StreamPhase::Connecting);
    }

    #[test]
    fn stop_during_read_timeout_is_not_a_reconnect() {
        struct Stalled;

        impl StreamConnector for Stalled {
            type Stream = StallingReader;

            fn connect(&mut self) -> Result<Self::Stream, ConnectError> {
                Ok(StallingReader {
                    first: None,
                    stall: Duration::from_millis(100),
                    last: io::ErrorKind::TimedOut,
                })
            }
        }

        let cfg = test_config(8);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();

        let worker = ctx.clone();
        let handle = std::thread::spawn(move || {
            let mut puller = StreamPuller::new(Stalled, worker.config());
            puller.run(&worker);
        });

        std::thread::sleep(Duration::from_millis(30));
        ctx.stop_stream();
        std::thread::sleep(Duration::from_millis(150));
        ctx.request_shutdown();
        handle.join().unwrap();

        assert_eq!(PipelineCounters::get(&ctx.counters().reconnects), 0);
        assert_eq!(ctx.phase(), StreamPhase::Stopped);
    }

    #[test]
    fn stop_during_stalled_read_ends_session_as_requested() {
        let cfg = test_config(8);
        let ctx = PipelineContext::new(cfg.clone()).unwrap();
        ctx.start_stream();

        let stopper = ctx.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stopper.stop_stream();
        });
        let mut puller = StreamPuller::new(NoConnector, &cfg);
        let reader = StallingReader {
            first: None,
            stall: Duration::from_millis(80),
            last: io::ErrorKind::TimedOut,
        };
        assert_eq!(puller.stream_session(&ctx, reader), SessionEnd::StopRequested);
        handle.join().unwrap();
    }
}
