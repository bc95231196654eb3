//! Engine lifecycle: build with predicates and config, start, consume the
//! output queues, close.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{CaptureCounters, CaptureLoop};
use crate::classify::ContentChunk;
use crate::config::EngineConfig;
use crate::dispatch::{
    DispatchSettings, DispatchStats, ErrorSink, FilterDispatcher, PacketPredicate, Stage,
    StreamPredicate,
};
use crate::error::{EngineError, PredicateStage};
use crate::frame::Frame;
use crate::source::CaptureSource;

/// Totals for one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub frames_read: u64,
    /// Frames handed to the caller's packet queue.
    pub packets_delivered: u64,
    pub streams_completed: u64,
    /// Chunks produced by classifying completed streams.
    pub chunks_emitted: u64,
    /// Chunks handed to the caller's chunk queue.
    pub chunks_delivered: u64,
    /// Streams forced out by the global page ceiling.
    pub flows_evicted: u64,
}

/// Queues the caller reads from.
///
/// `packets` and `chunks` close when the engine stops. `errors` holds at most
/// one error and closes with them; a run that ends with no error ended cleanly.
#[derive(Debug)]
pub struct EngineOutputs {
    pub packets: mpsc::Receiver<Arc<Frame>>,
    pub chunks: mpsc::Receiver<ContentChunk>,
    pub errors: mpsc::Receiver<EngineError>,
}

pub struct EngineBuilder {
    source: CaptureSource,
    config: EngineConfig,
    packet_predicate: Option<Box<dyn PacketPredicate>>,
    stream_predicate: Option<Box<dyn StreamPredicate>>,
}

impl EngineBuilder {
    pub fn new(source: CaptureSource) -> Self {
        Self {
            source,
            config: EngineConfig::default(),
            packet_predicate: None,
            stream_predicate: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Only frames this predicate accepts reach the packet queue.
    pub fn packet_predicate(mut self, predicate: impl PacketPredicate) -> Self {
        self.packet_predicate = Some(Box::new(predicate));
        self
    }

    /// Only chunks this predicate accepts reach the chunk queue.
    pub fn stream_predicate(mut self, predicate: impl StreamPredicate) -> Self {
        self.stream_predicate = Some(Box::new(predicate));
        self
    }

    /// Open the source and spawn the capture loop and, when a predicate is
    /// set, the filter dispatcher. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Invalid configuration or a source that cannot be opened; nothing is
    /// spawned in that case.
    pub fn start(self) -> Result<(EngineHandle, EngineOutputs), EngineError> {
        let Self {
            source,
            config,
            packet_predicate,
            stream_predicate,
        } = self;
        config.validate()?;

        info!(source = ?source, "opening capture source");
        let source = source.open(config.snapshot_length, config.read_timeout())?;

        let capacity = config.queue_capacity;
        let (packets_tx, packets_rx) = mpsc::channel(capacity);
        let (chunks_tx, chunks_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let errors = ErrorSink::new(errors_tx);
        let cancel = CancellationToken::new();

        let (capture_packets, packet_stage) = match packet_predicate {
            Some(mut predicate) => {
                let (filter_tx, filter_rx) = mpsc::channel(capacity);
                let stage = Stage::new(
                    PredicateStage::Packet,
                    filter_rx,
                    packets_tx,
                    move |frame: &Arc<Frame>| predicate.accept(frame),
                );
                (filter_tx, Some(stage))
            }
            None => (packets_tx, None),
        };
        let (capture_chunks, chunk_stage) = match stream_predicate {
            Some(mut predicate) => {
                let (filter_tx, filter_rx) = mpsc::channel(capacity);
                let stage = Stage::new(
                    PredicateStage::Stream,
                    filter_rx,
                    chunks_tx,
                    move |chunk: &ContentChunk| predicate.accept(chunk),
                );
                (filter_tx, Some(stage))
            }
            None => (chunks_tx, None),
        };

        let filters_packets = packet_stage.is_some();
        let filters_chunks = chunk_stage.is_some();
        let dispatcher = (filters_packets || filters_chunks).then(|| {
            let dispatcher = FilterDispatcher::new(
                packet_stage,
                chunk_stage,
                DispatchSettings {
                    interval: config.dispatch_interval(),
                    burst: config.dispatch_burst,
                    policy: config.on_predicate_error,
                },
                errors.clone(),
                cancel.clone(),
            );
            tokio::spawn(dispatcher.run())
        });

        let capture = CaptureLoop::new(
            source,
            config,
            capture_packets,
            capture_chunks,
            errors,
            cancel.clone(),
        );
        let capture = tokio::spawn(capture.run());

        let handle = EngineHandle {
            cancel,
            capture,
            dispatcher,
            filters_packets,
            filters_chunks,
        };
        let outputs = EngineOutputs {
            packets: packets_rx,
            chunks: chunks_rx,
            errors: errors_rx,
        };
        Ok((handle, outputs))
    }
}

/// Control side of a running engine.
#[derive(Debug)]
pub struct EngineHandle {
    cancel: CancellationToken,
    capture: JoinHandle<CaptureCounters>,
    dispatcher: Option<JoinHandle<DispatchStats>>,
    filters_packets: bool,
    filters_chunks: bool,
}

impl EngineHandle {
    /// Stop capturing now and wait for both loops to finish. Buffered streams
    /// are discarded; the source is released before this returns.
    pub async fn close(self) -> Result<CaptureStats, EngineError> {
        info!("closing engine");
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the run to end on its own (source exhausted, failure, or a
    /// fail-stop predicate). The output queues must keep being drained while
    /// waiting, or a full queue will hold the run up.
    pub async fn wait(self) -> Result<CaptureStats, EngineError> {
        let counters = self.capture.await.map_err(|err| {
            warn!(error = %err, "capture task failed");
            EngineError::Runtime(format!("capture loop: {err}"))
        })?;
        let dispatched = match self.dispatcher {
            Some(task) => task.await.map_err(|err| {
                warn!(error = %err, "dispatcher task failed");
                EngineError::Runtime(format!("filter dispatcher: {err}"))
            })?,
            None => DispatchStats::default(),
        };

        Ok(CaptureStats {
            frames_read: counters.frames_read,
            packets_delivered: if self.filters_packets {
                dispatched.packets_forwarded
            } else {
                counters.frames_sent
            },
            streams_completed: counters.streams_completed,
            chunks_emitted: counters.chunks_emitted,
            chunks_delivered: if self.filters_chunks {
                dispatched.chunks_forwarded
            } else {
                counters.chunks_sent
            },
            flows_evicted: counters.flows_evicted,
        })
    }

    /// Cancelling this token stops the engine, like [`EngineHandle::close`]
    /// without waiting.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.capture.is_finished() && self.dispatcher.as_ref().is_none_or(|d| d.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredicateErrorPolicy;
    use crate::dispatch::PredicateError;
    use crate::source::{FrameSource, PacketEvent, SourceError};
    use etherparse::PacketBuilder;
    use pcap_parser::Linktype;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Replay(Vec<PacketEvent>);

    impl FrameSource for Replay {
        fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
            if self.0.is_empty() {
                return Ok(None);
            }
            Ok(Some(self.0.remove(0)))
        }
    }

    fn udp(n: u8) -> PacketEvent {
        let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64).udp(1000, 2000);
        let mut data = Vec::new();
        builder.write(&mut data, &[n]).unwrap();
        PacketEvent {
            ts: None,
            linktype: Linktype::RAW,
            orig_len: data.len() as u32,
            data,
            interface_index: 0,
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            dispatch_interval_ms: 5,
            flush_interval_ms: 5,
            ..EngineConfig::default()
        }
    }

    async fn drain(outputs: &mut EngineOutputs) -> (Vec<Arc<Frame>>, Vec<ContentChunk>, Vec<EngineError>) {
        let mut packets = Vec::new();
        while let Some(frame) = outputs.packets.recv().await {
            packets.push(frame);
        }
        let mut chunks = Vec::new();
        while let Some(chunk) = outputs.chunks.recv().await {
            chunks.push(chunk);
        }
        let mut errors = Vec::new();
        while let Some(err) = outputs.errors.recv().await {
            errors.push(err);
        }
        (packets, chunks, errors)
    }

    #[tokio::test]
    async fn without_predicates_everything_reaches_the_caller() {
        let source = CaptureSource::Custom(Box::new(Replay((0..3).map(udp).collect())));
        let (handle, mut outputs) = EngineBuilder::new(source).config(fast_config()).start().unwrap();
        let (packets, chunks, errors) = drain(&mut outputs).await;
        let stats = handle.wait().await.unwrap();

        assert_eq!(packets.len(), 3);
        assert!(chunks.is_empty());
        assert!(errors.is_empty());
        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.packets_delivered, 3);
    }

    #[tokio::test]
    async fn packet_predicate_filters_frames() {
        let source = CaptureSource::Custom(Box::new(Replay((0..6).map(udp).collect())));
        let (handle, mut outputs) = EngineBuilder::new(source)
            .config(fast_config())
            .packet_predicate(|frame: &Frame| -> Result<bool, PredicateError> {
                Ok(frame.payload()[0] % 2 == 0)
            })
            .start()
            .unwrap();
        let (packets, _, errors) = drain(&mut outputs).await;
        let stats = handle.wait().await.unwrap();

        let payloads: Vec<u8> = packets.iter().map(|f| f.payload()[0]).collect();
        assert_eq!(payloads, vec![0, 2, 4]);
        assert!(errors.is_empty());
        assert_eq!(stats.packets_delivered, 3);
    }

    #[tokio::test]
    async fn failing_predicate_stops_the_run() {
        let source = CaptureSource::Custom(Box::new(Replay((0..4).map(udp).collect())));
        let (handle, mut outputs) = EngineBuilder::new(source)
            .config(fast_config())
            .packet_predicate(|_: &Frame| -> Result<bool, PredicateError> {
                Err(PredicateError::new("script error"))
            })
            .start()
            .unwrap();
        let (packets, _, errors) = drain(&mut outputs).await;
        handle.wait().await.unwrap();

        assert!(packets.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            EngineError::Predicate { stage: PredicateStage::Packet, .. }
        ));
    }

    #[tokio::test]
    async fn keep_capturing_policy_lets_chunks_through() {
        let config = EngineConfig {
            on_predicate_error: PredicateErrorPolicy::KeepCapturing,
            ..fast_config()
        };
        let source = CaptureSource::Custom(Box::new(Replay((0..4).map(udp).collect())));
        let (handle, mut outputs) = EngineBuilder::new(source)
            .config(config)
            .packet_predicate(|_: &Frame| -> Result<bool, PredicateError> {
                Err(PredicateError::new("script error"))
            })
            .start()
            .unwrap();
        let (_, _, errors) = drain(&mut outputs).await;
        let stats = handle.wait().await.unwrap();

        assert_eq!(errors.len(), 1);
        assert_eq!(stats.frames_read, 4);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_start() {
        let source = CaptureSource::Custom(Box::new(Replay(Vec::new())));
        let config = EngineConfig {
            dispatch_burst: 0,
            ..EngineConfig::default()
        };
        let err = EngineBuilder::new(source).config(config).start().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn missing_file_is_a_setup_error() {
        let err = EngineBuilder::new(CaptureSource::file("/definitely/not/here.pcap"))
            .start()
            .unwrap_err();
        assert!(matches!(err, EngineError::Source(_)));
    }

    struct Endless;

    impl FrameSource for Endless {
        fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
            Ok(Some(udp(7)))
        }
    }

    #[tokio::test]
    async fn blocking_predicate_does_not_hold_up_close() {
        let started = std::time::Instant::now();
        let deadline = started + Duration::from_secs(5);
        let released = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&released);

        let (handle, outputs) = EngineBuilder::new(CaptureSource::Custom(Box::new(Endless)))
            .config(fast_config())
            .packet_predicate(move |_: &Frame| -> Result<bool, PredicateError> {
                while !gate.load(Ordering::Acquire) && std::time::Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(true)
            })
            .start()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let closed = tokio::time::timeout(Duration::from_secs(2), handle.close()).await;
        released.store(true, Ordering::Release);
        let stats = closed.expect("close timed out").unwrap();
        assert!(stats.frames_read >= 1);
        assert!(started.elapsed() < Duration::from_secs(4));
        drop(outputs);
    }

    #[tokio::test]
    async fn close_stops_an_endless_source() {
        let (handle, mut outputs) = EngineBuilder::new(CaptureSource::Custom(Box::new(Endless)))
            .config(fast_config())
            .start()
            .unwrap();
        assert!(outputs.packets.recv().await.is_some());
        let stats = handle.close().await.unwrap();
        assert!(stats.frames_read >= 1);
    }
}
