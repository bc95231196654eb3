use std::borrow::Cow;
use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use tracing::debug;

use super::error::ClassifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// Unknown encodings map to `Identity`: the bytes pass through untouched.
    pub(crate) fn from_declared(declared: Option<&str>) -> Self {
        let Some(value) = declared else {
            return Self::Identity;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            "" | "identity" => Self::Identity,
            other => {
                debug!(encoding = other, "unsupported content-encoding, passing through");
                Self::Identity
            }
        }
    }
}

/// Undo a content encoding, producing at most `limit` bytes.
pub(crate) fn decode(
    buf: &[u8],
    encoding: ContentEncoding,
    limit: usize,
) -> Result<Cow<'_, [u8]>, ClassifyError> {
    match encoding {
        ContentEncoding::Identity => Ok(Cow::Borrowed(buf)),
        ContentEncoding::Gzip => gunzip(buf, limit).map(Cow::Owned),
        ContentEncoding::Deflate => inflate(buf, limit).map(Cow::Owned),
    }
}

pub(crate) fn gunzip(buf: &[u8], limit: usize) -> Result<Vec<u8>, ClassifyError> {
    read_limited(GzDecoder::new(buf), limit, "gzip")
}

/// zlib-wrapped deflate, falling back to a raw deflate stream.
fn inflate(buf: &[u8], limit: usize) -> Result<Vec<u8>, ClassifyError> {
    match read_limited(ZlibDecoder::new(buf), limit, "deflate") {
        Err(ClassifyError::Decompress { .. }) => {
            read_limited(DeflateDecoder::new(buf), limit, "deflate")
        }
        other => other,
    }
}

fn read_limited<R: Read>(
    reader: R,
    limit: usize,
    encoding: &'static str,
) -> Result<Vec<u8>, ClassifyError> {
    let mut out = Vec::new();
    reader
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|source| ClassifyError::Decompress { encoding, source })?;
    if out.len() > limit {
        return Err(ClassifyError::TooLarge { limit });
    }
    Ok(out)
}
