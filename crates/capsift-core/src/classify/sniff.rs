/// MIME type from magic bytes, if the format is recognised.
pub(crate) fn magic_mime(buf: &[u8]) -> Option<&'static str> {
    infer::get(buf).map(|kind| kind.mime_type())
}

/// Valid UTF-8 made only of printable characters and whitespace.
pub(crate) fn is_plain_text(buf: &[u8]) -> bool {
    match std::str::from_utf8(buf) {
        Ok(text) => text.chars().all(|c| !c.is_control() || c.is_whitespace()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d];

    #[test]
    fn recognises_png() {
        assert_eq!(magic_mime(PNG_MAGIC), Some("image/png"));
    }

    #[test]
    fn plain_text_accepts_whitespace_and_unicode() {
        assert!(is_plain_text(b"hello\r\n\tworld"));
        assert!(is_plain_text("caf\u{e9}".as_bytes()));
    }

    #[test]
    fn plain_text_rejects_control_and_invalid_utf8() {
        assert!(!is_plain_text(b"abc\x00def"));
        assert!(!is_plain_text(&[0xff, 0xfe, 0x41]));
    }
}
