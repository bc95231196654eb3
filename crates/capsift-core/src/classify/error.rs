use thiserror::Error;

/// Failure to classify one buffer. Never fatal to the caller.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("{encoding} decompression failed: {source}")]
    Decompress {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("decompressed output exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("http parse error: {0}")]
    Http(#[from] httparse::Error),
    #[error("http header block is incomplete")]
    IncompleteHeaders,
    #[error("invalid content-length header")]
    InvalidContentLength,
    #[error("http body truncated: expected {expected} bytes, found {available}")]
    TruncatedBody { expected: usize, available: usize },
    #[error("malformed chunked body")]
    MalformedChunk,
}
