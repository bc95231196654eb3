pub const TYPE_HTTP_REQUEST: &str = "http-request";
pub const TYPE_HTTP_RESPONSE: &str = "http-response";
pub const TYPE_TEXT_PLAIN: &str = "text/plain";
pub const TYPE_UNKNOWN: &str = "unknown";
pub const MIME_GZIP: &str = "application/gzip";

/// Request line at the start of any line: `METHOD SP target SP HTTP/version`.
pub const REQUEST_LINE_PATTERN: &str = r"(?m)^[A-Z]+\s\S+\sHTTP/\d+(\.\d)*";
/// Status line at the start of any line: `HTTP/version SP code SP reason`.
pub const STATUS_LINE_PATTERN: &str = r"(?m)^HTTP/\d+(\.\d)*\s\d+\s[A-Z]+";
/// `type/subtype` token of a Content-Type value.
pub const CONTENT_TYPE_PATTERN: &str = r"[a-zA-Z0-9_.+-]+/[a-zA-Z0-9_.+-]+";

pub const MAX_HTTP_HEADERS: usize = 128;
/// HTTP messages nested in bodies deeper than this are not parsed as HTTP.
pub const MAX_MESSAGE_NESTING: usize = 8;

pub const HEADER_CONTENT_LENGTH: &str = "content-length";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_CONTENT_ENCODING: &str = "content-encoding";
pub const HEADER_TRANSFER_ENCODING: &str = "transfer-encoding";
