//! The capture loop: source records in, frames and stream chunks out.
//!
//! Reading happens on a blocking thread because sources block on the OS. The
//! async side decodes each record, feeds TCP segments to the assembler, and
//! forwards every frame. Completed streams are classified on the blocking
//! pool. A flush tick completes idle streams; when the source ends, whatever
//! is still buffered is completed too.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::classify::{ContentChunk, classify};
use crate::config::EngineConfig;
use crate::dispatch::{ErrorSink, Forward, forward};
use crate::error::EngineError;
use crate::frame::{Frame, decode_frame};
use crate::reassembly::{AssemblerLimits, CompletedStream, StreamAssembler};
use crate::source::{FrameSource, PacketEvent, SourceError, apply_snapshot_length};

type RawRecord = Result<PacketEvent, SourceError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CaptureCounters {
    pub frames_read: u64,
    pub frames_sent: u64,
    pub streams_completed: u64,
    pub chunks_emitted: u64,
    pub chunks_sent: u64,
    pub flows_evicted: u64,
}

pub(crate) struct CaptureLoop {
    source: Box<dyn FrameSource>,
    config: EngineConfig,
    /// Packet filter input, or the caller's queue when nothing filters packets.
    packets: mpsc::Sender<Arc<Frame>>,
    /// Stream filter input, or the caller's queue when nothing filters chunks.
    chunks: mpsc::Sender<ContentChunk>,
    errors: ErrorSink,
    cancel: CancellationToken,
    counters: CaptureCounters,
}

enum Outcome {
    Continue,
    Stop,
}

impl CaptureLoop {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        config: EngineConfig,
        packets: mpsc::Sender<Arc<Frame>>,
        chunks: mpsc::Sender<ContentChunk>,
        errors: ErrorSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            config,
            packets,
            chunks,
            errors,
            cancel,
            counters: CaptureCounters::default(),
        }
    }

    pub(crate) async fn run(self) -> CaptureCounters {
        let Self {
            source,
            config,
            packets,
            chunks,
            errors,
            cancel,
            counters,
        } = self;

        let (raw_tx, mut raw_rx) = mpsc::channel::<RawRecord>(config.queue_capacity);
        let reader_cancel = cancel.clone();
        let snapshot_length = config.snapshot_length;
        let reader =
            task::spawn_blocking(move || read_records(source, raw_tx, reader_cancel, snapshot_length));

        let mut state = LoopState {
            assembler: StreamAssembler::new(AssemblerLimits {
                max_pages_per_flow: config.max_buffered_pages_per_flow,
                max_pages_total: config.max_buffered_pages_total,
            }),
            config,
            packets,
            chunks,
            cancel: cancel.clone(),
            counters,
        };

        let period = state.config.flush_interval();
        let mut flush = time::interval_at(Instant::now() + period, period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("capture loop started");

        let drain_remaining = loop {
            tokio::select! {
                _ = cancel.cancelled() => break false,
                _ = flush.tick() => {
                    let Some(cutoff) = Instant::now().checked_sub(state.config.flow_idle_timeout()) else {
                        continue;
                    };
                    let idle = state.assembler.flush_older_than(cutoff.into_std());
                    if !idle.is_empty() {
                        debug!(streams = idle.len(), "flushing idle streams");
                    }
                    if let Outcome::Stop = state.emit(idle).await {
                        break false;
                    }
                }
                record = raw_rx.recv() => match record {
                    Some(Ok(event)) => {
                        if let Outcome::Stop = state.handle(event).await {
                            break false;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "capture source failed");
                        errors.report(EngineError::Source(err));
                        break true;
                    }
                    None => {
                        info!(frames = state.counters.frames_read, "capture source exhausted");
                        break true;
                    }
                },
            }
        };

        if drain_remaining {
            let remaining = state.assembler.flush_all();
            if !remaining.is_empty() {
                debug!(streams = remaining.len(), "completing buffered streams");
            }
            state.emit(remaining).await;
        }

        drop(raw_rx);
        if let Err(err) = reader.await {
            errors.report(EngineError::Runtime(format!("capture reader: {err}")));
        }

        state.counters.flows_evicted = state.assembler.evicted();
        let counters = state.counters;
        info!(
            frames = counters.frames_read,
            streams = counters.streams_completed,
            chunks = counters.chunks_emitted,
            evicted = counters.flows_evicted,
            "capture loop stopped"
        );
        counters
    }
}

struct LoopState {
    assembler: StreamAssembler,
    config: EngineConfig,
    packets: mpsc::Sender<Arc<Frame>>,
    chunks: mpsc::Sender<ContentChunk>,
    cancel: CancellationToken,
    counters: CaptureCounters,
}

impl LoopState {
    async fn handle(&mut self, event: PacketEvent) -> Outcome {
        self.counters.frames_read += 1;
        let frame = Arc::new(decode_frame(event));
        trace!(summary = %frame.summary(), "frame");

        if let Some(segment) = frame.tcp.as_ref() {
            let completed =
                self.assembler
                    .assemble(segment, frame.payload(), Instant::now().into_std());
            if let Outcome::Stop = self.emit(completed).await {
                return Outcome::Stop;
            }
        }

        match forward(&self.packets, frame, &self.cancel).await {
            Forward::Sent => self.counters.frames_sent += 1,
            Forward::Dropped => {}
            Forward::Cancelled => return Outcome::Stop,
        }
        Outcome::Continue
    }

    /// Classify completed streams and queue their chunks. A stream that fails
    /// classification is dropped on its own. Classification may inflate large
    /// bodies, so it runs on the blocking pool.
    async fn emit(&mut self, completed: Vec<CompletedStream>) -> Outcome {
        for stream in completed {
            self.counters.streams_completed += 1;
            let CompletedStream { id, data, reason } = stream;
            let bytes = data.len();
            let classifier = self.config.classifier.clone();
            let classification =
                task::spawn_blocking(move || classify(&data, None, None, &classifier));
            let classified = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Stop,
                joined = classification => joined,
            };
            let chunks = match classified {
                Ok(Ok(chunks)) => chunks,
                Ok(Err(err)) => {
                    debug!(stream = %id, error = %err, "classification failed, dropping stream");
                    continue;
                }
                Err(err) => {
                    warn!(stream = %id, error = %err, "classification task failed, dropping stream");
                    continue;
                }
            };
            debug!(
                stream = %id,
                reason = ?reason,
                bytes,
                chunks = chunks.len(),
                "stream classified"
            );
            for chunk in chunks {
                self.counters.chunks_emitted += 1;
                match forward(&self.chunks, chunk, &self.cancel).await {
                    Forward::Sent => self.counters.chunks_sent += 1,
                    Forward::Dropped => {}
                    Forward::Cancelled => return Outcome::Stop,
                }
            }
        }
        Outcome::Continue
    }
}

/// Blocking reader: pulls records until the source ends, fails, the engine is
/// cancelled, or nobody is listening anymore. Read timeouts only serve to
/// observe cancellation.
fn read_records(
    mut source: Box<dyn FrameSource>,
    tx: mpsc::Sender<RawRecord>,
    cancel: CancellationToken,
    snapshot_length: usize,
) {
    while !cancel.is_cancelled() {
        match source.next_packet() {
            Ok(Some(mut event)) => {
                apply_snapshot_length(&mut event, snapshot_length);
                if tx.blocking_send(Ok(event)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                break;
            }
        }
    }
    debug!("capture reader finished");
}
