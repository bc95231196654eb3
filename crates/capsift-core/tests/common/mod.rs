#![allow(dead_code)]

use std::path::{Path, PathBuf};

use etherparse::PacketBuilder;

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;

pub const CLIENT_IP: [u8; 4] = [192, 168, 1, 10];
pub const SERVER_IP: [u8; 4] = [192, 168, 1, 20];
pub const CLIENT_PORT: u16 = 51000;
pub const SERVER_PORT: u16 = 80;

#[derive(Default, Clone, Copy)]
pub struct Flags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

pub const NONE: Flags = Flags {
    syn: false,
    fin: false,
    rst: false,
};
pub const SYN: Flags = Flags {
    syn: true,
    fin: false,
    rst: false,
};
pub const FIN: Flags = Flags {
    syn: false,
    fin: true,
    rst: false,
};

/// Ethernet/IPv4/TCP frame from client to server (or back when `reply`).
pub fn tcp_frame(reply: bool, seq: u32, flags: Flags, payload: &[u8]) -> Vec<u8> {
    tcp_frame_from(CLIENT_PORT, reply, seq, flags, payload)
}

pub fn tcp_frame_from(
    client_port: u16,
    reply: bool,
    seq: u32,
    flags: Flags,
    payload: &[u8],
) -> Vec<u8> {
    let (src_ip, dst_ip, src_port, dst_port) = if reply {
        (SERVER_IP, CLIENT_IP, SERVER_PORT, client_port)
    } else {
        (CLIENT_IP, SERVER_IP, client_port, SERVER_PORT)
    };
    let mut builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4(src_ip, dst_ip, 64)
        .tcp(src_port, dst_port, seq, 65535);
    if flags.syn {
        builder = builder.syn();
    }
    if flags.fin {
        builder = builder.fin();
    }
    if flags.rst {
        builder = builder.rst();
    }
    let mut buf = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut buf, payload).unwrap();
    buf
}

pub fn udp_frame(payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4(CLIENT_IP, SERVER_IP, 64)
        .udp(5353, 5353);
    let mut buf = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut buf, payload).unwrap();
    buf
}

/// Legacy little-endian pcap with microsecond timestamps.
pub fn pcap_bytes(linktype: u32, frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&linktype.to_le_bytes());
    for (i, frame) in frames.iter().enumerate() {
        out.extend_from_slice(&(1_700_000_000u32 + i as u32).to_le_bytes());
        out.extend_from_slice(&250_000u32.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }
    out
}

/// Little-endian pcapng: one section, one Ethernet interface, enhanced packet blocks.
pub fn pcapng_bytes(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&0x0a0d_0d0au32.to_le_bytes());
    out.extend_from_slice(&28u32.to_le_bytes());
    out.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(-1i64).to_le_bytes());
    out.extend_from_slice(&28u32.to_le_bytes());

    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&20u32.to_le_bytes());
    out.extend_from_slice(&(LINKTYPE_ETHERNET as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&20u32.to_le_bytes());

    for frame in frames {
        let padded = frame.len().div_ceil(4) * 4;
        let total = (32 + padded) as u32;
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&1_000_000u32.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
        out.resize(out.len() + (padded - frame.len()), 0);
        out.extend_from_slice(&total.to_le_bytes());
    }
    out
}

pub fn write_capture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
