use std::collections::BTreeMap;
use std::time::Instant;

/// Out-of-order data is accounted in pages of this many bytes.
pub const PAGE_SIZE: usize = 1900;

pub(crate) fn pages_for(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Reassembly state of one stream direction.
///
/// Offsets are relative to the first sequence number seen, so pending
/// segments sort correctly across sequence-number wraparound.
#[derive(Debug)]
pub(crate) struct StreamBuffer {
    isn: u32,
    /// Relative offset of the next expected byte.
    next: u32,
    data: Vec<u8>,
    pending: BTreeMap<u32, Vec<u8>>,
    pending_pages: usize,
    /// Relative offset just past the FIN, once seen.
    fin_at: Option<u32>,
    pub(crate) last_seen: Instant,
}

impl StreamBuffer {
    /// `seq` is the sequence number of the first payload byte.
    pub(crate) fn new(seq: u32, now: Instant) -> Self {
        Self {
            isn: seq,
            next: 0,
            data: Vec::new(),
            pending: BTreeMap::new(),
            pending_pages: 0,
            fin_at: None,
            last_seen: now,
        }
    }

    pub(crate) fn pending_pages(&self) -> usize {
        self.pending_pages
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.fin_at.is_some_and(|fin| fin <= self.next)
    }

    /// Place a segment. In-order bytes are appended, earlier bytes are trimmed,
    /// later segments wait until their predecessors arrive.
    pub(crate) fn insert(&mut self, seq: u32, payload: &[u8], fin: bool, now: Instant) {
        self.last_seen = now;
        let rel = seq.wrapping_sub(self.isn);
        if fin {
            self.fin_at = Some(rel.wrapping_add(payload.len() as u32));
        }
        if payload.is_empty() {
            return;
        }

        let delta = rel.wrapping_sub(self.next) as i32;
        if delta <= 0 {
            self.append_from(rel, payload);
            self.release_pending();
            return;
        }

        let pages = pages_for(payload.len());
        match self.pending.get(&rel) {
            Some(existing) if existing.len() >= payload.len() => {}
            Some(existing) => {
                self.pending_pages = self.pending_pages - pages_for(existing.len()) + pages;
                self.pending.insert(rel, payload.to_vec());
            }
            None => {
                self.pending_pages += pages;
                self.pending.insert(rel, payload.to_vec());
            }
        }
    }

    /// Give up on the missing bytes before the first pending segment.
    /// Returns false when nothing is pending.
    pub(crate) fn skip_gap(&mut self) -> bool {
        let Some(&first) = self.pending.keys().next() else {
            return false;
        };
        self.next = first;
        self.release_pending();
        true
    }

    /// Complete the stream: every pending segment is released, gaps skipped.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        while self.skip_gap() {}
        self.data
    }

    fn append_from(&mut self, rel: u32, payload: &[u8]) {
        let overlap = self.next.wrapping_sub(rel) as usize;
        if overlap < payload.len() {
            let fresh = &payload[overlap..];
            self.data.extend_from_slice(fresh);
            self.next = self.next.wrapping_add(fresh.len() as u32);
        }
    }

    fn release_pending(&mut self) {
        while let Some(entry) = self.pending.first_entry() {
            if (entry.key().wrapping_sub(self.next) as i32) > 0 {
                break;
            }
            let rel = *entry.key();
            let segment = entry.remove();
            self.pending_pages -= pages_for(segment.len());
            self.append_from(rel, &segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order() {
        let now = Instant::now();
        let mut stream = StreamBuffer::new(100, now);
        stream.insert(100, b"abc", false, now);
        stream.insert(103, b"def", false, now);
        assert_eq!(stream.finish(), b"abcdef");
    }

    #[test]
    fn holds_out_of_order_until_gap_fills() {
        let now = Instant::now();
        let mut stream = StreamBuffer::new(0, now);
        stream.insert(3, b"def", false, now);
        assert_eq!(stream.pending_pages(), 1);
        stream.insert(0, b"abc", false, now);
        assert_eq!(stream.pending_pages(), 0);
        assert_eq!(stream.finish(), b"abcdef");
    }

    #[test]
    fn trims_retransmitted_overlap() {
        let now = Instant::now();
        let mut stream = StreamBuffer::new(0, now);
        stream.insert(0, b"abcd", false, now);
        stream.insert(2, b"cdef", false, now);
        stream.insert(0, b"ab", false, now);
        assert_eq!(stream.finish(), b"abcdef");
    }

    #[test]
    fn handles_sequence_wraparound() {
        let now = Instant::now();
        let start = u32::MAX - 1;
        let mut stream = StreamBuffer::new(start, now);
        stream.insert(start.wrapping_add(3), b"def", false, now);
        stream.insert(start, b"abc", false, now);
        assert_eq!(stream.finish(), b"abcdef");
    }

    #[test]
    fn fin_completes_once_reached() {
        let now = Instant::now();
        let mut stream = StreamBuffer::new(0, now);
        stream.insert(3, b"def", true, now);
        assert!(!stream.is_finished());
        stream.insert(0, b"abc", false, now);
        assert!(stream.is_finished());
    }

    #[test]
    fn finish_skips_gaps() {
        let now = Instant::now();
        let mut stream = StreamBuffer::new(0, now);
        stream.insert(0, b"ab", false, now);
        stream.insert(5, b"fg", false, now);
        assert_eq!(stream.finish(), b"abfg");
    }

    #[test]
    fn page_accounting_rounds_up() {
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }
}
