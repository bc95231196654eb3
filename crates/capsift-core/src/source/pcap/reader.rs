use std::io::{Read, Seek, SeekFrom};

use pcap_parser::Linktype;

use super::error::PcapSourceError;
use super::layout;

/// Peek at the first four bytes of a capture file, leaving the cursor at the start.
///
/// # Errors
/// Returns `PcapSourceError::Io` when the file is shorter than four bytes or
/// cannot be rewound.
pub fn peek_magic<R: Read + Seek>(reader: &mut R) -> Result<[u8; 4], PcapSourceError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(magic)
}

pub fn is_pcapng(magic: &[u8; 4]) -> bool {
    magic == &layout::PCAPNG_MAGIC
}

/// Linktype of the interface a PCAPNG block refers to.
///
/// Blocks that reference an interface that was never described fall back to
/// Ethernet, which is what every capture tool writes by default.
pub fn interface_linktype(linktypes: &[Linktype], if_id: u32) -> Linktype {
    linktypes
        .get(if_id as usize)
        .copied()
        .unwrap_or(Linktype::ETHERNET)
}

/// Seconds since the epoch for a legacy record.
///
/// `fraction` is microseconds, or nanoseconds when the file header says so.
pub fn legacy_timestamp(seconds: u32, fraction: u32, nanosecond: bool) -> f64 {
    let scale = if nanosecond { 1e-9 } else { 1e-6 };
    seconds as f64 + fraction as f64 * scale
}

/// Seconds since the epoch for a PCAPNG enhanced packet block (microsecond resolution).
pub fn pcapng_timestamp(ts_high: u32, ts_low: u32) -> f64 {
    let ticks = ((ts_high as u64) << 32) | (ts_low as u64);
    ticks as f64 * 1e-6
}
