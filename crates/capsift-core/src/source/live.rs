use std::io::ErrorKind;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap_parser::Linktype;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};
use serde::Serialize;
use tracing::info;

use super::{FrameSource, PacketEvent, SourceError};

/// Smallest receive buffer handed to the datalink channel.
const MIN_READ_BUFFER: usize = 4096;

/// Live capture on a network interface.
pub struct LiveSource {
    interface: NetworkInterface,
    rx: Box<dyn DataLinkReceiver>,
    snapshot_length: usize,
}

impl LiveSource {
    pub fn open(
        name: &str,
        promiscuous: bool,
        snapshot_length: usize,
        read_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|candidate| candidate.name == name)
            .ok_or_else(|| SourceError::InterfaceNotFound(name.to_string()))?;

        let config = Config {
            promiscuous,
            read_timeout: Some(read_timeout),
            read_buffer_size: snapshot_length.max(MIN_READ_BUFFER),
            ..Default::default()
        };

        let rx = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => return Err(SourceError::UnsupportedChannel(name.to_string())),
            Err(source) => {
                return Err(SourceError::Open {
                    interface: name.to_string(),
                    source,
                });
            }
        };

        info!(interface = %interface.name, promiscuous, snapshot_length, "live capture opened");
        Ok(Self {
            interface,
            rx,
            snapshot_length,
        })
    }
}

impl FrameSource for LiveSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        match self.rx.next() {
            Ok(frame) => {
                let kept = frame.len().min(self.snapshot_length);
                Ok(Some(PacketEvent {
                    ts: Some(now_seconds()),
                    linktype: Linktype::ETHERNET,
                    data: frame[..kept].to_vec(),
                    orig_len: frame.len() as u32,
                    interface_index: self.interface.index,
                }))
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(SourceError::TimedOut)
            }
            Err(err) => Err(SourceError::Io(err)),
        }
    }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Interface description for listings.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub description: String,
    pub mac: Option<String>,
    pub ips: Vec<IpAddr>,
    pub is_up: bool,
    pub is_loopback: bool,
}

impl From<&NetworkInterface> for InterfaceInfo {
    fn from(interface: &NetworkInterface) -> Self {
        Self {
            name: interface.name.clone(),
            index: interface.index,
            description: interface.description.clone(),
            mac: interface.mac.map(|mac| mac.to_string()),
            ips: interface.ips.iter().map(|network| network.ip()).collect(),
            is_up: interface.is_up(),
            is_loopback: interface.is_loopback(),
        }
    }
}

/// Interfaces available for live capture, sorted by name.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    let mut interfaces: Vec<InterfaceInfo> = datalink::interfaces()
        .iter()
        .map(InterfaceInfo::from)
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
}

/// Name of the interface that owns `ip`, if any.
pub fn find_interface_by_ip(ip: IpAddr) -> Option<String> {
    datalink::interfaces()
        .into_iter()
        .find(|interface| interface.ips.iter().any(|network| network.ip() == ip))
        .map(|interface| interface.name)
}
