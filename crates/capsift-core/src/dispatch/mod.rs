//! Predicate filtering between the capture loop and the caller.
//!
//! Input queues are drained in bounded bursts once per tick, so a slow
//! predicate costs at most `burst` invocations per queue per tick while the
//! capture side keeps writing into bounded queues. Bursts are evaluated on the
//! blocking pool; the dispatcher itself keeps answering cancellation.
//!
//! ```text
//! capture loop --frames--> [packet predicate] --accepted--> caller
//!              --chunks--> [stream predicate] --accepted--> caller
//! ```
//!
//! A stage without a predicate does not exist: the capture loop writes straight
//! to the caller's queue instead.

mod predicate;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::ContentChunk;
use crate::config::PredicateErrorPolicy;
use crate::error::{EngineError, PredicateStage};
use crate::frame::Frame;

pub use predicate::{PacketPredicate, PredicateError, StreamPredicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    PacketsOnly,
    StreamsOnly,
    Both,
}

/// Outcome of handing one item to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Forward {
    Sent,
    /// The receiving side is gone; the item was discarded.
    Dropped,
    Cancelled,
}

/// Send `item`, waiting for queue space unless the engine is cancelled first.
pub(crate) async fn forward<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> Forward {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Forward::Cancelled,
        sent = tx.send(item) => match sent {
            Ok(()) => Forward::Sent,
            Err(_) => Forward::Dropped,
        },
    }
}

/// Single-slot error channel: the first error wins, later ones are logged.
#[derive(Debug, Clone)]
pub(crate) struct ErrorSink {
    tx: mpsc::Sender<EngineError>,
}

impl ErrorSink {
    pub(crate) fn new(tx: mpsc::Sender<EngineError>) -> Self {
        Self { tx }
    }

    pub(crate) fn report(&self, err: EngineError) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err) | TrySendError::Closed(err)) => {
                warn!(error = %err, "dropping secondary engine error");
            }
        }
    }
}

type BoxedPredicate<T> = Box<dyn FnMut(&T) -> Result<bool, PredicateError> + Send>;

/// What a predicate made of one drained burst.
struct Verdict<T> {
    predicate: BoxedPredicate<T>,
    accepted: Vec<T>,
    failure: Option<PredicateError>,
}

/// One filtered queue pair.
pub(crate) struct Stage<T> {
    kind: PredicateStage,
    input: mpsc::Receiver<T>,
    output: mpsc::Sender<T>,
    /// Lent to the blocking pool while a burst is evaluated.
    predicate: Option<BoxedPredicate<T>>,
    done: bool,
    forwarded: u64,
}

impl<T: Send + 'static> Stage<T> {
    pub(crate) fn new(
        kind: PredicateStage,
        input: mpsc::Receiver<T>,
        output: mpsc::Sender<T>,
        predicate: impl FnMut(&T) -> Result<bool, PredicateError> + Send + 'static,
    ) -> Self {
        Self {
            kind,
            input,
            output,
            predicate: Some(Box::new(predicate)),
            done: false,
            forwarded: 0,
        }
    }

    /// Take up to `burst` queued items without waiting for more, and forward
    /// the accepted ones. Predicates may block, so a burst is evaluated on the
    /// blocking pool.
    async fn drain(&mut self, burst: usize, cancel: &CancellationToken) -> Result<(), PredicateError> {
        if self.done {
            return Ok(());
        }
        let mut batch = Vec::new();
        while batch.len() < burst {
            match self.input.try_recv() {
                Ok(item) => batch.push(item),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        let Some(predicate) = self.predicate.take() else {
            self.done = true;
            return Ok(());
        };

        let drained = batch.len();
        let evaluation = task::spawn_blocking(move || evaluate(predicate, batch));
        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.done = true;
                return Ok(());
            }
            joined = evaluation => match joined {
                Ok(verdict) => verdict,
                Err(err) => {
                    self.done = true;
                    return Err(PredicateError::new(format!("predicate panicked: {err}")));
                }
            },
        };
        self.predicate = Some(verdict.predicate);

        let before = self.forwarded;
        for item in verdict.accepted {
            match forward(&self.output, item, cancel).await {
                Forward::Sent => self.forwarded += 1,
                Forward::Dropped => {}
                Forward::Cancelled => {
                    self.done = true;
                    break;
                }
            }
        }
        debug!(
            stage = %self.kind,
            drained,
            forwarded = self.forwarded - before,
            "dispatch burst"
        );
        match verdict.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run `predicate` over `batch` in order, stopping at the first failure.
fn evaluate<T>(mut predicate: BoxedPredicate<T>, batch: Vec<T>) -> Verdict<T> {
    let mut accepted = Vec::with_capacity(batch.len());
    let mut failure = None;
    for item in batch {
        match predicate(&item) {
            Ok(true) => accepted.push(item),
            Ok(false) => {}
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    Verdict {
        predicate,
        accepted,
        failure,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchSettings {
    pub interval: Duration,
    pub burst: usize,
    pub policy: PredicateErrorPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DispatchStats {
    pub packets_forwarded: u64,
    pub chunks_forwarded: u64,
}

pub(crate) struct FilterDispatcher {
    packets: Option<Stage<Arc<Frame>>>,
    chunks: Option<Stage<ContentChunk>>,
    settings: DispatchSettings,
    errors: ErrorSink,
    cancel: CancellationToken,
}

impl FilterDispatcher {
    pub(crate) fn new(
        packets: Option<Stage<Arc<Frame>>>,
        chunks: Option<Stage<ContentChunk>>,
        settings: DispatchSettings,
        errors: ErrorSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            packets,
            chunks,
            settings,
            errors,
            cancel,
        }
    }

    pub(crate) fn mode(&self) -> Option<DispatchMode> {
        match (&self.packets, &self.chunks) {
            (Some(_), Some(_)) => Some(DispatchMode::Both),
            (Some(_), None) => Some(DispatchMode::PacketsOnly),
            (None, Some(_)) => Some(DispatchMode::StreamsOnly),
            (None, None) => None,
        }
    }

    /// Run until every input queue is closed and drained, the engine is
    /// cancelled, or a predicate fails. Output queues close when this returns.
    pub(crate) async fn run(mut self) -> DispatchStats {
        let mut tick = time::interval(self.settings.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(mode = ?self.mode(), "filter dispatcher started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            if let Err((stage, source)) = self.burst().await {
                warn!(%stage, error = %source, "predicate failed, dispatcher stopping");
                self.errors.report(EngineError::Predicate { stage, source });
                if self.settings.policy == PredicateErrorPolicy::StopCapture {
                    self.cancel.cancel();
                }
                break;
            }
            if self.finished() {
                break;
            }
        }

        let stats = DispatchStats {
            packets_forwarded: self.packets.as_ref().map_or(0, |s| s.forwarded),
            chunks_forwarded: self.chunks.as_ref().map_or(0, |s| s.forwarded),
        };
        info!(
            packets = stats.packets_forwarded,
            chunks = stats.chunks_forwarded,
            "filter dispatcher stopped"
        );
        stats
    }

    async fn burst(&mut self) -> Result<(), (PredicateStage, PredicateError)> {
        let burst = self.settings.burst;
        if let Some(stage) = self.packets.as_mut() {
            stage
                .drain(burst, &self.cancel)
                .await
                .map_err(|err| (stage.kind, err))?;
        }
        if let Some(stage) = self.chunks.as_mut() {
            stage
                .drain(burst, &self.cancel)
                .await
                .map_err(|err| (stage.kind, err))?;
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.packets.as_ref().is_none_or(|s| s.done) && self.chunks.as_ref().is_none_or(|s| s.done)
    }
}
