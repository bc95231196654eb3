//! capsift core library: live and offline traffic capture with TCP stream
//! reassembly, content classification and predicate filtering.
//!
//! A capture source feeds the capture loop, which decodes frames, reassembles
//! TCP streams and classifies them into typed content chunks. Frames and
//! chunks then pass through optional caller predicates before reaching the
//! caller's queues. All I/O is isolated in `source`; decoding and
//! classification are byte-oriented and side-effect free.
//!
//! Invariants:
//! - At most one reassembly buffer exists per connection direction.
//! - Stream bytes reach the classifier in connection byte order.
//! - Reassembly memory is bounded by a per-flow and a global page ceiling.
//! - Queues are bounded; a slow consumer slows capture instead of growing memory.
//! - The error queue carries at most one error; no error means a clean end.
//!
//! # Examples
//! ```no_run
//! use capsift_core::{CaptureSource, EngineBuilder, PredicateError};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (handle, mut outputs) = EngineBuilder::new(CaptureSource::file("capture.pcapng"))
//!     .stream_predicate(|chunk: &capsift_core::ContentChunk| -> Result<bool, PredicateError> {
//!         Ok(chunk.chunk_type.starts_with("http"))
//!     })
//!     .start()?;
//! drop(outputs.packets);
//! while let Some(chunk) = outputs.chunks.recv().await {
//!     println!("{}: {} bytes", chunk.chunk_type, chunk.content.len());
//! }
//! let stats = handle.wait().await?;
//! println!("{} streams", stats.streams_completed);
//! # Ok(())
//! # }
//! ```

mod capture;
pub mod classify;
pub mod config;
pub mod dispatch;
mod engine;
mod error;
pub mod frame;
pub mod reassembly;
pub mod source;

pub use classify::{ClassifyError, ContentChunk, classify};
pub use config::{ClassifierConfig, ConfigError, EngineConfig, PredicateErrorPolicy};
pub use dispatch::{DispatchMode, PacketPredicate, PredicateError, StreamPredicate};
pub use engine::{CaptureStats, EngineBuilder, EngineHandle, EngineOutputs};
pub use error::{EngineError, PredicateStage};
pub use frame::{FlowView, Frame, FrameError, FrameMetadata, LayerView, TcpSegment, decode_frame};
pub use source::{
    CaptureSource, FrameSource, InterfaceInfo, PacketEvent, PcapFileSource, SourceError,
    find_interface_by_ip, list_interfaces,
};
