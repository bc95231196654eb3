use std::fs::File;
use std::path::Path;

use pcap_parser::{
    Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader,
    traits::PcapReaderIterator,
};
use tracing::debug;

use crate::source::{FrameSource, PacketEvent, SourceError};

use super::error::PcapSourceError;
use super::layout;
use super::reader::{interface_linktype, is_pcapng, legacy_timestamp, pcapng_timestamp, peek_magic};

/// Offline capture source reading a saved PCAP or PCAPNG file.
///
/// The format is chosen from the file magic. Records are produced lazily, in
/// file order, and the source cannot be rewound.
pub struct PcapFileSource {
    inner: PcapReader,
}

enum PcapReader {
    Legacy {
        reader: LegacyPcapReader<File>,
        linktype: Option<Linktype>,
        nanosecond: bool,
    },
    Ng {
        reader: PcapNGReader<File>,
        linktypes: Vec<Linktype>,
    },
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let source = Self::from_file(file)?;
        debug!(path = %path.display(), "opened capture file");
        Ok(source)
    }

    /// Wrap an already opened capture file handle.
    pub fn from_file(file: File) -> Result<Self, SourceError> {
        let inner = create_reader(file)?;
        Ok(Self { inner })
    }
}

impl FrameSource for PcapFileSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        next_packet(&mut self.inner).map_err(SourceError::from)
    }
}

fn create_reader(mut file: File) -> Result<PcapReader, PcapSourceError> {
    let magic = peek_magic(&mut file)?;

    if is_pcapng(&magic) {
        let reader = PcapNGReader::new(layout::PCAP_READER_BUFFER_SIZE, file)
            .map_err(|e| PcapSourceError::parse("pcapng reader init", e))?;
        return Ok(PcapReader::Ng {
            reader,
            linktypes: Vec::new(),
        });
    }

    let reader = LegacyPcapReader::new(layout::PCAP_READER_BUFFER_SIZE, file)
        .map_err(|e| PcapSourceError::parse("pcap reader init", e))?;
    Ok(PcapReader::Legacy {
        reader,
        linktype: None,
        nanosecond: false,
    })
}

fn next_packet(reader: &mut PcapReader) -> Result<Option<PacketEvent>, PcapSourceError> {
    match reader {
        PcapReader::Legacy {
            reader,
            linktype,
            nanosecond,
        } => loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            *linktype = Some(header.network);
                            *nanosecond = header.is_nanosecond_precision();
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => Some(PacketEvent {
                            ts: Some(legacy_timestamp(packet.ts_sec, packet.ts_usec, *nanosecond)),
                            linktype: linktype.unwrap_or(Linktype::ETHERNET),
                            orig_len: packet.origlen,
                            interface_index: layout::LEGACY_INTERFACE_INDEX,
                            data: packet.data.to_vec(),
                        }),
                        _ => None,
                    };
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| PcapSourceError::parse("pcap reader refill", e))?;
                }
                Err(e) => {
                    return Err(PcapSourceError::parse("pcap reader next", e));
                }
            }
        },
        PcapReader::Ng { reader, linktypes } => loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            // Interface ids restart with every section.
                            linktypes.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
                            linktypes.push(intf.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => Some(PacketEvent {
                            ts: Some(pcapng_timestamp(packet.ts_high, packet.ts_low)),
                            linktype: interface_linktype(linktypes, packet.if_id),
                            orig_len: packet.origlen,
                            interface_index: packet.if_id,
                            data: unpadded(packet.data, packet.caplen).to_vec(),
                        }),
                        PcapBlockOwned::NG(Block::SimplePacket(packet)) => Some(PacketEvent {
                            ts: None,
                            linktype: interface_linktype(linktypes, 0),
                            orig_len: packet.origlen,
                            interface_index: 0,
                            data: unpadded(packet.data, packet.origlen).to_vec(),
                        }),
                        _ => None,
                    };
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| PcapSourceError::parse("pcapng reader refill", e))?;
                }
                Err(e) => {
                    return Err(PcapSourceError::parse("pcapng reader next", e));
                }
            }
        },
    }
}

/// PCAPNG packet data is padded to 32 bits; keep only the captured bytes.
fn unpadded(data: &[u8], caplen: u32) -> &[u8] {
    &data[..data.len().min(caplen as usize)]
}
