//! Saved capture files.
//!
//! `PcapFileSource` picks the legacy or PCAPNG reader from the file magic and
//! yields one `PacketEvent` per packet record, in file order. Interface
//! linktypes and timestamp precision are tracked per section.

pub(crate) mod error;
pub(crate) mod layout;
mod parser;
pub(crate) mod reader;

pub use parser::PcapFileSource;
