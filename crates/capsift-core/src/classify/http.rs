use std::sync::LazyLock;

use httparse::Status;
use regex::bytes::Regex;

use super::error::ClassifyError;
use super::layout::{
    HEADER_CONTENT_ENCODING, HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE,
    HEADER_TRANSFER_ENCODING, MAX_HTTP_HEADERS, REQUEST_LINE_PATTERN, STATUS_LINE_PATTERN,
    TYPE_HTTP_REQUEST, TYPE_HTTP_RESPONSE,
};

static REQUEST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REQUEST_LINE_PATTERN).expect("request line pattern"));
static STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(STATUS_LINE_PATTERN).expect("status line pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Self::Request => TYPE_HTTP_REQUEST,
            Self::Response => TYPE_HTTP_RESPONSE,
        }
    }
}

/// One HTTP message found at the start of a buffer.
#[derive(Debug)]
pub(crate) struct HttpMessage<'a> {
    pub kind: MessageKind,
    /// Length of the start line plus header block, including the blank line.
    pub header_len: usize,
    /// Offset just past the message; anything after it is a following message.
    pub end: usize,
    /// Body bytes as they appear in the buffer. `None` when the body is
    /// transfer-encoded and so cannot be located verbatim.
    pub body: Option<&'a [u8]>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// Whether the buffer looks like HTTP. When both a request line and a status
/// line occur, the earlier one wins.
pub(crate) fn sniff(buf: &[u8]) -> Option<MessageKind> {
    let request = REQUEST_LINE.find(buf).map(|m| m.start());
    let status = STATUS_LINE.find(buf).map(|m| m.start());
    match (request, status) {
        (Some(req), Some(st)) if st < req => Some(MessageKind::Response),
        (Some(_), _) => Some(MessageKind::Request),
        (None, Some(_)) => Some(MessageKind::Response),
        (None, None) => None,
    }
}

/// Whether `buf` opens with a request or status line. Only the first line is
/// looked at, so walking a long run of pipelined messages stays linear.
pub(crate) fn sniff_start(buf: &[u8]) -> Option<MessageKind> {
    let line_end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let line = &buf[..line_end];
    let at_start = |re: &Regex| re.find(line).is_some_and(|m| m.start() == 0);
    if at_start(&REQUEST_LINE) {
        Some(MessageKind::Request)
    } else if at_start(&STATUS_LINE) {
        Some(MessageKind::Response)
    } else {
        None
    }
}

pub(crate) fn parse(buf: &[u8], kind: MessageKind) -> Result<HttpMessage<'_>, ClassifyError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HTTP_HEADERS];
    let (header_len, status_code, headers) = match kind {
        MessageKind::Request => {
            let mut request = httparse::Request::new(&mut headers);
            let len = complete(request.parse(buf)?)?;
            (len, None, request.headers)
        }
        MessageKind::Response => {
            let mut response = httparse::Response::new(&mut headers);
            let len = complete(response.parse(buf)?)?;
            (len, response.code, response.headers)
        }
    };

    let content_type = header_value(headers, HEADER_CONTENT_TYPE);
    let content_encoding = header_value(headers, HEADER_CONTENT_ENCODING);
    let chunked = header_value(headers, HEADER_TRANSFER_ENCODING)
        .and_then(|te| te.rsplit(',').next().map(|last| last.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);
    let content_length = match header_value(headers, HEADER_CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| ClassifyError::InvalidContentLength)?,
        ),
        None => None,
    };

    let rest = &buf[header_len..];
    let (end, body) = if chunked {
        (header_len + chunked_len(rest)?, None)
    } else if let Some(expected) = content_length {
        if expected > rest.len() {
            return Err(ClassifyError::TruncatedBody {
                expected,
                available: rest.len(),
            });
        }
        (header_len + expected, Some(&rest[..expected]))
    } else if kind == MessageKind::Request || status_code.is_some_and(has_no_body) {
        (header_len, Some(&rest[..0]))
    } else {
        // Response without framing: the body runs to the end of the stream.
        (buf.len(), Some(rest))
    };

    Ok(HttpMessage {
        kind,
        header_len,
        end,
        body,
        content_type,
        content_encoding,
    })
}

fn complete(status: Status<usize>) -> Result<usize, ClassifyError> {
    match status {
        Status::Complete(len) => Ok(len),
        Status::Partial => Err(ClassifyError::IncompleteHeaders),
    }
}

fn has_no_body(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == 304
}

fn header_value(headers: &[httparse::Header<'_>], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| String::from_utf8_lossy(h.value).into_owned())
}

/// Length of a chunked body, trailer section included.
fn chunked_len(body: &[u8]) -> Result<usize, ClassifyError> {
    let mut pos = 0;
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(&body[pos..]) {
            Ok(Status::Complete(parsed)) => parsed,
            Ok(Status::Partial) | Err(_) => return Err(ClassifyError::MalformedChunk),
        };
        pos += consumed;
        if size == 0 {
            break;
        }
        let data_end = usize::try_from(size)
            .ok()
            .and_then(|size| pos.checked_add(size))
            .and_then(|end| end.checked_add(2))
            .ok_or(ClassifyError::MalformedChunk)?;
        if data_end > body.len() || &body[data_end - 2..data_end] != b"\r\n" {
            return Err(ClassifyError::MalformedChunk);
        }
        pos = data_end;
    }
    loop {
        let line_len = body[pos..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(ClassifyError::MalformedChunk)?;
        pos += line_len + 2;
        if line_len == 0 {
            return Ok(pos);
        }
    }
}
