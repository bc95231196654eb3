use thiserror::Error;

/// Why a frame could only be partially decoded.
///
/// Decoding never fails outright: the frame is still produced and the problem
/// is reported through its error layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("packet slice error: {0}")]
    Slice(String),
    #[error("unsupported linktype: {0}")]
    UnsupportedLinktype(i32),
}
