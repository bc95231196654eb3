pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ICMP_HEADER_LEN: usize = 8;

pub const LAYER_ETHERNET: &str = "Ethernet";
pub const LAYER_IPV4: &str = "IPv4";
pub const LAYER_IPV6: &str = "IPv6";
pub const LAYER_TCP: &str = "TCP";
pub const LAYER_UDP: &str = "UDP";
pub const LAYER_ICMPV4: &str = "ICMPv4";
pub const LAYER_ICMPV6: &str = "ICMPv6";
pub const LAYER_PAYLOAD: &str = "Payload";
pub const LAYER_DECODE_FAILURE: &str = "DecodeFailure";

pub const ENDPOINT_MAC: &str = "MAC";
pub const ENDPOINT_IPV4: &str = "IPv4";
pub const ENDPOINT_IPV6: &str = "IPv6";
pub const ENDPOINT_TCP_PORT: &str = "TCP";
pub const ENDPOINT_UDP_PORT: &str = "UDP";
