//! Content classification of packet payloads and reassembled streams.
//!
//! [`classify`] is a pure function: a byte buffer plus optional declared
//! encoding and content type in, an ordered list of typed chunks out.
//!
//! Order of decisions:
//!
//! ```text
//! declared encoding -> declared type -> HTTP start line -> magic bytes -> text -> unknown
//! ```
//!
//! HTTP messages are split into a header-block chunk followed by the chunks of
//! their body, which is classified with the message's own headers as hints.
//! Bytes following a complete message are classified in turn, without
//! recursion, so a long keep-alive stream costs no extra stack.

mod encoding;
mod error;
mod http;
pub mod layout;
mod sniff;

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::ClassifierConfig;

use encoding::ContentEncoding;
pub use error::ClassifyError;
use layout::{
    CONTENT_TYPE_PATTERN, MAX_MESSAGE_NESTING, MIME_GZIP, TYPE_TEXT_PLAIN, TYPE_UNKNOWN,
};

static CONTENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CONTENT_TYPE_PATTERN).expect("content type pattern"));

/// A typed slice of classified content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentChunk {
    /// `http-request`, `http-response`, `text/plain`, `unknown` or a MIME type.
    #[serde(rename = "Type")]
    pub chunk_type: String,
    #[serde(rename = "Content")]
    pub content: Vec<u8>,
}

impl ContentChunk {
    pub fn new(chunk_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            chunk_type: chunk_type.into(),
            content: content.into(),
        }
    }
}

/// Classify `bytes` into content chunks.
///
/// An empty buffer yields no chunks. Errors concern this buffer only.
///
/// Every decompression, declared or sniffed, counts against
/// `max_unwrap_depth`; past it, encoded bytes are kept as they are. All
/// decompressions of one call share the `max_decompressed_bytes` budget.
pub fn classify(
    bytes: &[u8],
    declared_encoding: Option<&str>,
    declared_type: Option<&str>,
    config: &ClassifierConfig,
) -> Result<Vec<ContentChunk>, ClassifyError> {
    let mut chunks = Vec::new();
    let mut classifier = Classifier {
        config,
        budget: config.max_decompressed_bytes,
    };
    classifier.classify_into(
        bytes,
        declared_encoding,
        declared_type,
        Nesting::default(),
        &mut chunks,
    )?;
    Ok(chunks)
}

/// How deep the current buffer sits inside decompressions and HTTP bodies.
#[derive(Debug, Clone, Copy, Default)]
struct Nesting {
    unwraps: usize,
    messages: usize,
}

struct Classifier<'c> {
    config: &'c ClassifierConfig,
    /// Decompressed bytes still allowed for this call.
    budget: usize,
}

impl Classifier<'_> {
    fn classify_into(
        &mut self,
        bytes: &[u8],
        declared_encoding: Option<&str>,
        declared_type: Option<&str>,
        mut nesting: Nesting,
        out: &mut Vec<ContentChunk>,
    ) -> Result<(), ClassifyError> {
        let content_encoding = ContentEncoding::from_declared(declared_encoding);
        let decoded = match content_encoding {
            ContentEncoding::Identity => Cow::Borrowed(bytes),
            _ if nesting.unwraps >= self.config.max_unwrap_depth => {
                debug!(
                    depth = nesting.unwraps,
                    "unwrap depth reached, keeping encoded bytes"
                );
                return self.classify_opaque(bytes, nesting, out);
            }
            _ => {
                nesting.unwraps += 1;
                Cow::Owned(self.decompress(|limit| {
                    encoding::decode(bytes, content_encoding, limit).map(Cow::into_owned)
                })?)
            }
        };
        let buf: &[u8] = &decoded;
        if buf.is_empty() {
            return Ok(());
        }

        if let Some(token) = declared_type.and_then(content_type_token) {
            out.push(ContentChunk::new(token, buf));
            return Ok(());
        }

        if nesting.messages >= MAX_MESSAGE_NESTING {
            return self.classify_opaque(buf, nesting, out);
        }
        let Some(first) = http::sniff(buf) else {
            return self.classify_opaque(buf, nesting, out);
        };

        let mut rest = buf;
        let mut next = Some(first);
        while let Some(kind) = next {
            let message = http::parse(rest, kind)?;
            trace!(
                kind = message.kind.tag(),
                header_len = message.header_len,
                end = message.end,
                "http message"
            );
            match message.body {
                Some(body) if !body.is_empty() => {
                    out.push(ContentChunk::new(
                        message.kind.tag(),
                        &rest[..message.header_len],
                    ));
                    let inner = Nesting {
                        messages: nesting.messages + 1,
                        ..nesting
                    };
                    self.classify_into(
                        body,
                        message.content_encoding.as_deref(),
                        message.content_type.as_deref(),
                        inner,
                        out,
                    )?;
                }
                _ => out.push(ContentChunk::new(message.kind.tag(), &rest[..message.end])),
            }
            rest = &rest[message.end..];
            if rest.is_empty() {
                return Ok(());
            }
            next = http::sniff_start(rest);
        }
        self.classify_opaque(rest, nesting, out)
    }

    /// Bytes that are not HTTP: gzip magic, other magic, text or unknown.
    fn classify_opaque(
        &mut self,
        buf: &[u8],
        nesting: Nesting,
        out: &mut Vec<ContentChunk>,
    ) -> Result<(), ClassifyError> {
        match sniff::magic_mime(buf) {
            Some(MIME_GZIP) if nesting.unwraps < self.config.max_unwrap_depth => {
                let inner = self.decompress(|limit| encoding::gunzip(buf, limit))?;
                let nesting = Nesting {
                    unwraps: nesting.unwraps + 1,
                    ..nesting
                };
                self.classify_into(&inner, None, None, nesting, out)
            }
            Some(mime) => {
                out.push(ContentChunk::new(mime, buf));
                Ok(())
            }
            None if sniff::is_plain_text(buf) => {
                out.push(ContentChunk::new(TYPE_TEXT_PLAIN, buf));
                Ok(())
            }
            None => {
                out.push(ContentChunk::new(TYPE_UNKNOWN, buf));
                Ok(())
            }
        }
    }

    /// Run one decompression against what is left of the call's budget.
    fn decompress(
        &mut self,
        run: impl FnOnce(usize) -> Result<Vec<u8>, ClassifyError>,
    ) -> Result<Vec<u8>, ClassifyError> {
        let inflated = run(self.budget).map_err(|err| match err {
            ClassifyError::TooLarge { .. } => ClassifyError::TooLarge {
                limit: self.config.max_decompressed_bytes,
            },
            other => other,
        })?;
        self.budget -= inflated.len();
        Ok(inflated)
    }
}

/// The `type/subtype` token of a Content-Type value, verbatim.
fn content_type_token(declared: &str) -> Option<&str> {
    CONTENT_TYPE.find(declared).map(|m| m.as_str())
}
