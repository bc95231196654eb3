use thiserror::Error;

use crate::classify::ContentChunk;
use crate::frame::Frame;

/// Opaque failure reported by a predicate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PredicateError {
    message: String,
}

impl PredicateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Accept/reject decision over decoded frames.
///
/// Script bridges usually evaluate [`Frame::to_structured`], which exposes
/// every layer under a stable set of keys.
pub trait PacketPredicate: Send + 'static {
    fn accept(&mut self, frame: &Frame) -> Result<bool, PredicateError>;
}

impl<F> PacketPredicate for F
where
    F: FnMut(&Frame) -> Result<bool, PredicateError> + Send + 'static,
{
    fn accept(&mut self, frame: &Frame) -> Result<bool, PredicateError> {
        self(frame)
    }
}

/// Accept/reject decision over classified stream chunks.
pub trait StreamPredicate: Send + 'static {
    fn accept(&mut self, chunk: &ContentChunk) -> Result<bool, PredicateError>;
}

impl<F> StreamPredicate for F
where
    F: FnMut(&ContentChunk) -> Result<bool, PredicateError> + Send + 'static,
{
    fn accept(&mut self, chunk: &ContentChunk) -> Result<bool, PredicateError> {
        self(chunk)
    }
}
