mod common;

use std::fs::File;

use capsift_core::{FrameSource, PcapFileSource, SourceError, decode_frame};

use common::{LINKTYPE_RAW, NONE, pcap_bytes, pcapng_bytes, tcp_frame, udp_frame, write_capture};

#[test]
fn pcap_source_reads_legacy_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let frames = vec![udp_frame(b"one"), tcp_frame(false, 1, NONE, b"two")];
    let path = write_capture(dir.path(), "legacy.pcap", &pcap_bytes(1, &frames));

    let mut source = PcapFileSource::open(&path).unwrap();
    let first = source.next_packet().unwrap().unwrap();
    assert_eq!(first.data, frames[0]);
    assert_eq!(first.orig_len as usize, frames[0].len());
    assert_eq!(first.ts, Some(1_700_000_000.25));
    let second = source.next_packet().unwrap().unwrap();
    assert_eq!(second.data, frames[1]);
    assert!(source.next_packet().unwrap().is_none());
}

#[test]
fn pcap_source_reads_pcapng_from_handle() {
    let dir = tempfile::tempdir().unwrap();
    let frames = vec![udp_frame(b"abc"), udp_frame(b"defgh")];
    let path = write_capture(dir.path(), "capture.pcapng", &pcapng_bytes(&frames));

    let mut source = PcapFileSource::from_file(File::open(&path).unwrap()).unwrap();
    let mut payloads = Vec::new();
    while let Some(event) = source.next_packet().unwrap() {
        payloads.push(decode_frame(event).payload().to_vec());
    }
    assert_eq!(payloads, vec![b"abc".to_vec(), b"defgh".to_vec()]);
}

#[test]
fn raw_ip_linktype_decodes_without_link_layer() {
    let dir = tempfile::tempdir().unwrap();
    let ip_only = udp_frame(b"raw")[14..].to_vec();
    let path = write_capture(dir.path(), "raw.pcap", &pcap_bytes(LINKTYPE_RAW, &[ip_only]));

    let mut source = PcapFileSource::open(&path).unwrap();
    let frame = decode_frame(source.next_packet().unwrap().unwrap());
    assert!(!frame.link_layer.is_present());
    assert_eq!(frame.network_layer.layer_type, "IPv4");
    assert_eq!(frame.payload(), b"raw");
}

#[test]
fn pcap_source_rejects_truncated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_capture(dir.path(), "truncated.pcapng", &[0x0a, 0x0d, 0x0d]);
    let err = match PcapFileSource::open(&path) {
        Ok(_) => panic!("expected truncated file to be rejected"),
        Err(err) => err,
    };
    assert!(matches!(err, SourceError::Io(_)));
}

#[test]
fn pcap_source_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = match PcapFileSource::open(&dir.path().join("absent.pcap")) {
        Ok(_) => panic!("expected missing file to be rejected"),
        Err(err) => err,
    };
    assert!(matches!(err, SourceError::Io(_)));
}
