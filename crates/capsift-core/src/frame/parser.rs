use std::net::{IpAddr, SocketAddr};

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::Linktype;

use super::error::FrameError;
use super::layout::{
    ENDPOINT_IPV4, ENDPOINT_IPV6, ENDPOINT_MAC, ENDPOINT_TCP_PORT, ENDPOINT_UDP_PORT,
    ETHERNET_HEADER_LEN, ICMP_HEADER_LEN, LAYER_DECODE_FAILURE, LAYER_ETHERNET, LAYER_ICMPV4,
    LAYER_ICMPV6, LAYER_IPV4, LAYER_IPV6, LAYER_PAYLOAD, LAYER_TCP, LAYER_UDP,
};
use super::{FlowView, Frame, FrameMetadata, LayerView, TcpSegment, ts_to_rfc3339};
use crate::source::PacketEvent;

#[derive(Default)]
struct Layers {
    link: LayerView,
    network: LayerView,
    transport: LayerView,
    application: LayerView,
    tcp: Option<TcpSegment>,
    error: Option<FrameError>,
}

/// Decode a raw record into a [`Frame`].
///
/// Never fails: whatever could not be decoded is described by the error layer.
///
/// ```text
/// Ethernet / IPv4 / TCP 10.0.0.1:1234->10.0.0.2:80 / Payload
/// ```
pub fn decode_frame(event: PacketEvent) -> Frame {
    let PacketEvent {
        ts,
        linktype,
        data,
        orig_len,
        interface_index,
    } = event;

    let capture_length = data.len();
    let length = (orig_len as usize).max(capture_length);
    let metadata = FrameMetadata {
        length,
        capture_length,
        truncated: length > capture_length,
        interface_index,
        timestamp: ts_to_rfc3339(ts).unwrap_or_default(),
    };

    let layers = decode_layers(linktype, &data);
    let error_layer = match &layers.error {
        Some(_) => LayerView {
            layer_type: LAYER_DECODE_FAILURE.to_string(),
            layer_contents: data.clone(),
            ..LayerView::default()
        },
        None => LayerView::default(),
    };

    Frame {
        data,
        metadata,
        link_layer: layers.link,
        network_layer: layers.network,
        transport_layer: layers.transport,
        application_layer: layers.application,
        error_layer,
        ts,
        tcp: layers.tcp,
        error: layers.error,
    }
}

fn decode_layers(linktype: Linktype, data: &[u8]) -> Layers {
    let mut layers = Layers::default();

    let sliced = match linktype {
        Linktype::ETHERNET => {
            layers.link = ethernet_layer(data);
            SlicedPacket::from_ethernet(data).map_err(|err| FrameError::Slice(err.to_string()))
        }
        Linktype::RAW => {
            SlicedPacket::from_ip(data).map_err(|err| FrameError::Slice(err.to_string()))
        }
        other => Err(FrameError::UnsupportedLinktype(other.0)),
    };
    let sliced = match sliced {
        Ok(sliced) => sliced,
        Err(err) => {
            layers.error = Some(err);
            return layers;
        }
    };

    let Some(net) = sliced.net else {
        return layers;
    };
    let Some(ip_payload) = net.ip_payload_ref().map(|p| p.payload) else {
        return layers;
    };

    let (src_ip, dst_ip) = match &net {
        NetSlice::Ipv4(ipv4) => {
            let header = ipv4.header();
            layers.network = LayerView {
                layer_type: LAYER_IPV4.to_string(),
                layer_payload: ip_payload.to_vec(),
                layer_contents: header.slice().to_vec(),
                flow: FlowView::new(
                    header.source_addr().to_string(),
                    header.destination_addr().to_string(),
                    ENDPOINT_IPV4,
                ),
            };
            (
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
            )
        }
        NetSlice::Ipv6(ipv6) => {
            let header = ipv6.header();
            layers.network = LayerView {
                layer_type: LAYER_IPV6.to_string(),
                layer_payload: ip_payload.to_vec(),
                layer_contents: header.slice().to_vec(),
                flow: FlowView::new(
                    header.source_addr().to_string(),
                    header.destination_addr().to_string(),
                    ENDPOINT_IPV6,
                ),
            };
            (
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
            )
        }
    };

    let Some(transport) = sliced.transport else {
        return layers;
    };

    #[allow(unreachable_patterns)]
    let payload: &[u8] = match &transport {
        TransportSlice::Tcp(tcp) => {
            let payload = tcp.payload();
            let (src_port, dst_port) = (tcp.source_port(), tcp.destination_port());
            layers.transport = LayerView {
                layer_type: LAYER_TCP.to_string(),
                layer_payload: payload.to_vec(),
                layer_contents: header_bytes(ip_payload, payload).to_vec(),
                flow: FlowView::new(
                    src_port.to_string(),
                    dst_port.to_string(),
                    ENDPOINT_TCP_PORT,
                ),
            };
            layers.tcp = Some(TcpSegment {
                src: SocketAddr::new(src_ip, src_port),
                dst: SocketAddr::new(dst_ip, dst_port),
                seq: tcp.sequence_number(),
                syn: tcp.syn(),
                fin: tcp.fin(),
                rst: tcp.rst(),
            });
            payload
        }
        TransportSlice::Udp(udp) => {
            let payload = udp.payload();
            layers.transport = LayerView {
                layer_type: LAYER_UDP.to_string(),
                layer_payload: payload.to_vec(),
                layer_contents: header_bytes(ip_payload, payload).to_vec(),
                flow: FlowView::new(
                    udp.source_port().to_string(),
                    udp.destination_port().to_string(),
                    ENDPOINT_UDP_PORT,
                ),
            };
            payload
        }
        TransportSlice::Icmpv4(_) => icmp_layer(&mut layers, LAYER_ICMPV4, ip_payload),
        TransportSlice::Icmpv6(_) => icmp_layer(&mut layers, LAYER_ICMPV6, ip_payload),
        _ => return layers,
    };

    if !payload.is_empty() {
        layers.application = LayerView {
            layer_type: LAYER_PAYLOAD.to_string(),
            layer_contents: payload.to_vec(),
            ..LayerView::default()
        };
    }
    layers
}

fn ethernet_layer(data: &[u8]) -> LayerView {
    if data.len() < ETHERNET_HEADER_LEN {
        return LayerView::default();
    }
    let (header, payload) = data.split_at(ETHERNET_HEADER_LEN);
    LayerView {
        layer_type: LAYER_ETHERNET.to_string(),
        layer_payload: payload.to_vec(),
        layer_contents: header.to_vec(),
        flow: FlowView::new(format_mac(&header[6..12]), format_mac(&header[0..6]), ENDPOINT_MAC),
    }
}

fn icmp_layer<'a>(layers: &mut Layers, layer_type: &str, ip_payload: &'a [u8]) -> &'a [u8] {
    let split = ip_payload.len().min(ICMP_HEADER_LEN);
    let (header, payload) = ip_payload.split_at(split);
    layers.transport = LayerView {
        layer_type: layer_type.to_string(),
        layer_payload: payload.to_vec(),
        layer_contents: header.to_vec(),
        flow: FlowView::default(),
    };
    payload
}

/// Leading bytes of `segment` that precede `payload`.
fn header_bytes<'a>(segment: &'a [u8], payload: &[u8]) -> &'a [u8] {
    let end = segment.len().saturating_sub(payload.len());
    &segment[..end]
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
