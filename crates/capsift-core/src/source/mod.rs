//! Frame sources: live interfaces and saved capture files.
//!
//! A source yields raw link-layer records one at a time. It is lazy, finite for
//! files and unbounded for interfaces, and cannot be restarted. Dropping a
//! source releases the underlying OS handle.

mod live;
mod pcap;

use std::fs::File;
use std::path::PathBuf;

pub use live::{InterfaceInfo, LiveSource, find_interface_by_ip, list_interfaces};
pub use pcap::PcapFileSource;

use pcap_parser::Linktype;
use thiserror::Error;

/// One raw record read from a source.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    /// Capture timestamp in seconds since the epoch, when known.
    pub ts: Option<f64>,
    pub linktype: Linktype,
    /// Captured bytes (at most the snapshot length).
    pub data: Vec<u8>,
    /// Length of the frame on the wire.
    pub orig_len: u32,
    pub interface_index: u32,
}

pub trait FrameSource: Send {
    /// Next record, or `Ok(None)` once the source is exhausted.
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        (**self).next_packet()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCAP parse error: {0}")]
    Pcap(String),
    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("failed to open interface {interface}: {source}")]
    Open {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported datalink channel on interface {0}")]
    UnsupportedChannel(String),
    /// A live read timed out without a frame; the caller may retry.
    #[error("read timed out")]
    TimedOut,
}

impl SourceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceError::TimedOut)
    }
}

impl From<pcap::error::PcapSourceError> for SourceError {
    fn from(value: pcap::error::PcapSourceError) -> Self {
        match value {
            pcap::error::PcapSourceError::Io(err) => SourceError::Io(err),
            pcap::error::PcapSourceError::Pcap { context, message } => {
                SourceError::Pcap(format!("{context}: {message}"))
            }
        }
    }
}

/// Where frames come from. Chosen once, when the engine is built.
pub enum CaptureSource {
    /// Live capture on a named interface.
    Interface { name: String, promiscuous: bool },
    /// Saved PCAP/PCAPNG file on disk.
    File(PathBuf),
    /// Already opened PCAP/PCAPNG file handle.
    Handle(File),
    /// Any other record producer (replays, synthetic traffic).
    Custom(Box<dyn FrameSource>),
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureSource::Interface { name, promiscuous } => f
                .debug_struct("Interface")
                .field("name", name)
                .field("promiscuous", promiscuous)
                .finish(),
            CaptureSource::File(path) => f.debug_tuple("File").field(path).finish(),
            CaptureSource::Handle(file) => f.debug_tuple("Handle").field(file).finish(),
            CaptureSource::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl CaptureSource {
    pub fn interface(name: impl Into<String>, promiscuous: bool) -> Self {
        CaptureSource::Interface {
            name: name.into(),
            promiscuous,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        CaptureSource::File(path.into())
    }

    /// Open the OS handle behind this source.
    ///
    /// # Errors
    /// Fails when the interface does not exist or cannot be opened, or when the
    /// file cannot be read or is not a capture file.
    pub fn open(
        self,
        snapshot_length: usize,
        read_timeout: std::time::Duration,
    ) -> Result<Box<dyn FrameSource>, SourceError> {
        match self {
            CaptureSource::Interface { name, promiscuous } => Ok(Box::new(LiveSource::open(
                &name,
                promiscuous,
                snapshot_length,
                read_timeout,
            )?)),
            CaptureSource::File(path) => Ok(Box::new(PcapFileSource::open(&path)?)),
            CaptureSource::Handle(file) => Ok(Box::new(PcapFileSource::from_file(file)?)),
            CaptureSource::Custom(source) => Ok(source),
        }
    }
}

/// Clamp a record to the snapshot length.
///
/// Records read from files were clamped by whoever wrote them; this only bites
/// for live capture or for files written with a larger snapshot length.
pub(crate) fn apply_snapshot_length(event: &mut PacketEvent, snapshot_length: usize) {
    if event.data.len() > snapshot_length {
        event.data.truncate(snapshot_length);
    }
}
