//! TCP stream reassembly.
//!
//! Segments are grouped per connection direction and released in byte order.
//! Out-of-order data is held in a page-accounted buffer with a per-flow and a
//! global ceiling:
//!
//! ```text
//! per-flow ceiling exceeded -> skip the missing bytes and release what follows
//! global ceiling exceeded   -> complete the least recently active stream now
//! ```
//!
//! A stream's byte order is anchored at its SYN. When the SYN was not
//! captured, the first segment seen becomes the start of the stream: bytes
//! that precede it and arrive later are taken for retransmissions and dropped.

mod assembler;
mod flow;
mod stream;

pub use assembler::{AssemblerLimits, CompletedStream, CompletionReason, StreamAssembler};
pub use flow::{Direction, FlowKey, StreamId};
pub use stream::PAGE_SIZE;
