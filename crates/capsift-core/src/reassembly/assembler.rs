use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::flow::StreamId;
use super::stream::StreamBuffer;
use crate::frame::TcpSegment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Fin,
    Reset,
    Idle,
    /// Forced out by the global page ceiling.
    Evicted,
    EndOfCapture,
}

/// The in-order bytes of one finished stream direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedStream {
    pub id: StreamId,
    pub data: Vec<u8>,
    pub reason: CompletionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerLimits {
    pub max_pages_per_flow: usize,
    pub max_pages_total: usize,
}

/// TCP reassembly over every observed stream direction.
///
/// Owned by a single task; nothing here is shared.
#[derive(Debug)]
pub struct StreamAssembler {
    limits: AssemblerLimits,
    streams: HashMap<StreamId, StreamBuffer>,
    total_pages: usize,
    evicted: u64,
}

impl StreamAssembler {
    pub fn new(limits: AssemblerLimits) -> Self {
        Self {
            limits,
            streams: HashMap::new(),
            total_pages: 0,
            evicted: 0,
        }
    }

    /// Feed one segment. Returns the streams this segment completed, including
    /// any forced out to respect the global page ceiling.
    pub fn assemble(
        &mut self,
        segment: &TcpSegment,
        payload: &[u8],
        now: Instant,
    ) -> Vec<CompletedStream> {
        let mut completed = Vec::new();
        let id = StreamId::new(segment.src, segment.dst);
        // SYN consumes one sequence number.
        let seq = if segment.syn {
            segment.seq.wrapping_add(1)
        } else {
            segment.seq
        };

        let stream = match self.streams.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if payload.is_empty() && !segment.syn {
                    return completed;
                }
                trace!(stream = %id, "stream opened");
                entry.insert(StreamBuffer::new(seq, now))
            }
        };

        let before = stream.pending_pages();
        stream.insert(seq, payload, segment.fin, now);
        while stream.pending_pages() > self.limits.max_pages_per_flow && stream.skip_gap() {
            debug!(stream = %id, pages = stream.pending_pages(), "per-flow page cap hit, skipping gap");
        }
        let after = stream.pending_pages();
        self.total_pages = self.total_pages - before + after;

        let reason = if segment.rst {
            Some(CompletionReason::Reset)
        } else if stream.is_finished() {
            Some(CompletionReason::Fin)
        } else {
            None
        };
        if let Some(reason) = reason {
            completed.extend(self.complete(id, reason));
        }

        self.enforce_total(&mut completed);
        completed
    }

    /// Complete every stream idle since before `cutoff`, oldest first.
    pub fn flush_older_than(&mut self, cutoff: Instant) -> Vec<CompletedStream> {
        let mut idle: Vec<(Instant, StreamId)> = self
            .streams
            .iter()
            .filter(|(_, stream)| stream.last_seen < cutoff)
            .map(|(id, stream)| (stream.last_seen, *id))
            .collect();
        idle.sort_by_key(|(seen, _)| *seen);
        idle.into_iter()
            .filter_map(|(_, id)| self.complete(id, CompletionReason::Idle))
            .collect()
    }

    /// Complete every remaining stream.
    pub fn flush_all(&mut self) -> Vec<CompletedStream> {
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.complete(id, CompletionReason::EndOfCapture))
            .collect()
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn buffered_pages(&self) -> usize {
        self.total_pages
    }

    /// Streams forced out by the global page ceiling so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn complete(&mut self, id: StreamId, reason: CompletionReason) -> Option<CompletedStream> {
        let stream = self.streams.remove(&id)?;
        self.total_pages -= stream.pending_pages();
        let data = stream.finish();
        debug!(stream = %id, ?reason, bytes = data.len(), "stream completed");
        if data.is_empty() {
            return None;
        }
        Some(CompletedStream { id, data, reason })
    }

    fn enforce_total(&mut self, completed: &mut Vec<CompletedStream>) {
        while self.total_pages > self.limits.max_pages_total {
            let victim = self
                .streams
                .iter()
                .filter(|(_, stream)| stream.pending_pages() > 0)
                .min_by_key(|(_, stream)| stream.last_seen)
                .map(|(id, _)| *id);
            let Some(victim) = victim else {
                break;
            };
            warn!(
                stream = %victim,
                total_pages = self.total_pages,
                limit = self.limits.max_pages_total,
                "buffer pool full, evicting least recently active stream"
            );
            self.evicted += 1;
            completed.extend(self.complete(victim, CompletionReason::Evicted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    const LIMITS: AssemblerLimits = AssemblerLimits {
        max_pages_per_flow: 500,
        max_pages_total: 100_000,
    };

    fn seg(src: &str, dst: &str, seq: u32) -> TcpSegment {
        TcpSegment {
            src: src.parse::<SocketAddr>().unwrap(),
            dst: dst.parse::<SocketAddr>().unwrap(),
            seq,
            syn: false,
            fin: false,
            rst: false,
        }
    }

    const CLIENT: &str = "10.0.0.1:40000";
    const SERVER: &str = "10.0.0.2:80";

    #[test]
    fn out_of_order_segments_complete_in_order_on_fin() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::new(LIMITS);
        let mut syn = seg(CLIENT, SERVER, 999);
        syn.syn = true;
        assert!(assembler.assemble(&syn, b"", now).is_empty());

        let mut last = seg(CLIENT, SERVER, 1006);
        last.fin = true;
        assert!(assembler.assemble(&last, b"ghi", now).is_empty());
        assert!(assembler.assemble(&seg(CLIENT, SERVER, 1000), b"abc", now).is_empty());
        assert_eq!(assembler.buffered_pages(), 1);

        let done = assembler.assemble(&seg(CLIENT, SERVER, 1003), b"def", now);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].data, b"abcdefghi");
        assert_eq!(done[0].reason, CompletionReason::Fin);
        assert_eq!(done[0].id.src(), CLIENT.parse::<SocketAddr>().unwrap());
        assert_eq!(assembler.active_streams(), 0);
        assert_eq!(assembler.buffered_pages(), 0);
    }

    #[test]
    fn without_syn_the_first_segment_seen_anchors_the_stream() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::new(LIMITS);
        assert!(assembler.assemble(&seg(CLIENT, SERVER, 2005), b"world", now).is_empty());
        assert!(assembler.assemble(&seg(CLIENT, SERVER, 2000), b"hello", now).is_empty());
        assert_eq!(assembler.buffered_pages(), 0);

        let mut rst = seg(CLIENT, SERVER, 2010);
        rst.rst = true;
        let done = assembler.assemble(&rst, b"", now);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].data, b"world");
    }

    #[test]
    fn directions_are_separate_streams() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::new(LIMITS);
        assembler.assemble(&seg(CLIENT, SERVER, 1), b"ping", now);
        assembler.assemble(&seg(SERVER, CLIENT, 7), b"pong", now);
        assert_eq!(assembler.active_streams(), 2);

        let mut rst = seg(SERVER, CLIENT, 11);
        rst.rst = true;
        let done = assembler.assemble(&rst, b"", now);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].data, b"pong");
        assert_eq!(done[0].reason, CompletionReason::Reset);
        assert_eq!(assembler.active_streams(), 1);
    }

    #[test]
    fn bare_acks_do_not_open_streams() {
        let mut assembler = StreamAssembler::new(LIMITS);
        let mut fin = seg(CLIENT, SERVER, 5);
        fin.fin = true;
        assert!(assembler.assemble(&fin, b"", Instant::now()).is_empty());
        assert!(assembler.assemble(&seg(CLIENT, SERVER, 5), b"", Instant::now()).is_empty());
        assert_eq!(assembler.active_streams(), 0);
    }

    #[test]
    fn idle_streams_flush_exactly_once() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::new(LIMITS);
        assembler.assemble(&seg(CLIENT, SERVER, 1), b"stale", start);
        let later = start + Duration::from_secs(10);
        assembler.assemble(&seg(SERVER, CLIENT, 1), b"fresh", later);

        let flushed = assembler.flush_older_than(later - Duration::from_secs(5));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].data, b"stale");
        assert_eq!(flushed[0].reason, CompletionReason::Idle);
        assert!(assembler.flush_older_than(later - Duration::from_secs(5)).is_empty());
        assert_eq!(assembler.active_streams(), 1);
    }

    #[test]
    fn per_flow_cap_skips_the_gap() {
        let now = Instant::now();
        let mut assembler = StreamAssembler::new(AssemblerLimits {
            max_pages_per_flow: 2,
            max_pages_total: 100,
        });
        assembler.assemble(&seg(CLIENT, SERVER, 0), b"a", now);
        // Byte 1 never arrives.
        assembler.assemble(&seg(CLIENT, SERVER, 2), b"c", now);
        assembler.assemble(&seg(CLIENT, SERVER, 4), b"e", now);
        assert_eq!(assembler.buffered_pages(), 2);
        assembler.assemble(&seg(CLIENT, SERVER, 6), b"g", now);
        assert!(assembler.buffered_pages() <= 2);

        let done = assembler.flush_all();
        assert_eq!(done[0].data, b"aceg");
        assert_eq!(done[0].reason, CompletionReason::EndOfCapture);
    }

    #[test]
    fn total_cap_evicts_least_recently_active_stream() {
        let start = Instant::now();
        let mut assembler = StreamAssembler::new(AssemblerLimits {
            max_pages_per_flow: 10,
            max_pages_total: 2,
        });
        assembler.assemble(&seg("10.0.0.1:1", SERVER, 0), b"old", start);
        assembler.assemble(&seg("10.0.0.1:1", SERVER, 10), b"-tail", start);
        let t1 = start + Duration::from_millis(10);
        assembler.assemble(&seg("10.0.0.3:3", SERVER, 0), b"new", t1);
        assembler.assemble(&seg("10.0.0.3:3", SERVER, 10), b"-x", t1);
        assert_eq!(assembler.buffered_pages(), 2);

        let t2 = start + Duration::from_millis(20);
        assembler.assemble(&seg("10.0.0.4:4", SERVER, 0), b"x", t2);
        let done = assembler.assemble(&seg("10.0.0.4:4", SERVER, 10), b"more", t2);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].reason, CompletionReason::Evicted);
        assert_eq!(done[0].data, b"old-tail");
        assert_eq!(assembler.evicted(), 1);
        assert_eq!(assembler.buffered_pages(), 2);
    }
}
