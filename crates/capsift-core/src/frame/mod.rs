//! Decoded network frames.
//!
//! A [`Frame`] is produced once per captured record and is immutable from then
//! on. It is shared (behind an `Arc`) between the stream assembler and the
//! packet filter, and serializes to a stable field map: every layer key is
//! always present, absent layers are empty.

mod error;
pub(crate) mod layout;
mod parser;

use std::net::SocketAddr;

use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub use error::FrameError;
pub use parser::decode_frame;

/// Source/destination description of one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowView {
    pub src: String,
    pub dst: String,
    /// `src->dst`, empty when the layer has no flow.
    pub string: String,
    pub endpoint_type: String,
}

impl FlowView {
    pub(crate) fn new(src: String, dst: String, endpoint_type: &str) -> Self {
        let string = format!("{src}->{dst}");
        Self {
            src,
            dst,
            string,
            endpoint_type: endpoint_type.to_string(),
        }
    }
}

/// One decoded layer. `layer_type` is empty when the layer is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerView {
    pub layer_type: String,
    /// Bytes carried by this layer for the next one.
    pub layer_payload: Vec<u8>,
    /// Header bytes of this layer.
    pub layer_contents: Vec<u8>,
    pub flow: FlowView,
}

impl LayerView {
    pub fn is_present(&self) -> bool {
        !self.layer_type.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrameMetadata {
    /// Length on the wire.
    pub length: usize,
    /// Bytes actually captured.
    pub capture_length: usize,
    pub truncated: bool,
    pub interface_index: u32,
    /// RFC 3339 capture time, empty when unknown.
    pub timestamp: String,
}

/// TCP header fields the stream assembler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Frame {
    pub data: Vec<u8>,
    pub metadata: FrameMetadata,
    pub link_layer: LayerView,
    pub network_layer: LayerView,
    pub transport_layer: LayerView,
    pub application_layer: LayerView,
    pub error_layer: LayerView,
    #[serde(skip)]
    pub ts: Option<f64>,
    #[serde(skip)]
    pub tcp: Option<TcpSegment>,
    #[serde(skip)]
    pub error: Option<FrameError>,
}

impl Frame {
    /// Application bytes carried by the frame (empty when there are none).
    pub fn payload(&self) -> &[u8] {
        &self.application_layer.layer_contents
    }

    /// Field-map view handed to script bridges and JSON consumers.
    pub fn to_structured(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Short human readable description of the frame.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for layer in [
            &self.link_layer,
            &self.network_layer,
            &self.transport_layer,
            &self.application_layer,
            &self.error_layer,
        ] {
            if !layer.is_present() {
                continue;
            }
            if layer.flow.string.is_empty() {
                parts.push(layer.layer_type.clone());
            } else {
                parts.push(format!("{} {}", layer.layer_type, layer.flow.string));
            }
        }
        format!(
            "{} bytes ({} captured): {}",
            self.metadata.length,
            self.metadata.capture_length,
            parts.join(" / ")
        )
    }
}

pub(crate) fn ts_to_rfc3339(ts: Option<f64>) -> Option<String> {
    let ts = ts?;
    let nanos = (ts * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}
