use std::fmt::Display;

use thiserror::Error;

/// Failure while reading a capture file.
#[derive(Debug, Error)]
pub enum PcapSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// pcap-parser rejected the file; `context` names the reader step.
    #[error("PCAP parse error ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
}

impl PcapSourceError {
    pub(crate) fn parse(context: &'static str, err: impl Display) -> Self {
        Self::Pcap {
            context,
            message: err.to_string(),
        }
    }
}
