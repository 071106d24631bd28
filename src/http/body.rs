//! Body views handed out by the request facade.
//!
//! A request body can be viewed once, either as raw bytes ([`BodyStream`])
//! or as decoded text ([`BodyReader`]). The facade enforces the "once".

use std::io::{self, BufRead, Cursor, Read};

use axum::body::Bytes;

/// Raw byte view of the request body.
#[derive(Debug)]
pub struct BodyStream {
    inner: Cursor<Bytes>,
}

impl BodyStream {
    pub(crate) fn new(bytes: Bytes) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    /// Total body length in bytes.
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole body, regardless of how much has been read.
    pub fn into_bytes(self) -> Bytes {
        self.inner.into_inner()
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Text view of the request body, decoded with the request's character encoding.
#[derive(Debug)]
pub struct BodyReader {
    inner: Cursor<String>,
}

impl BodyReader {
    pub(crate) fn new(text: String) -> Self {
        Self {
            inner: Cursor::new(text),
        }
    }

    /// Consume the reader and return the decoded text.
    pub fn into_string(self) -> String {
        self.inner.into_inner()
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for BodyReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

/// Decode body bytes with a named character encoding.
///
/// UTF-8 and the single-byte Latin-1/ASCII family are decoded exactly; any
/// other name falls back to lossy UTF-8.
pub(crate) fn decode_text(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8_lossy(bytes).into_owned(),
        "iso-8859-1" | "iso8859-1" | "latin1" | "us-ascii" | "ascii" => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        other => {
            tracing::debug!(encoding = %other, "Unsupported character encoding, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_reads_all_bytes() {
        let mut stream = BodyStream::new(Bytes::from_static(b"abc"));
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn reader_yields_lines() {
        let reader = BodyReader::new("one\ntwo".to_string());
        let lines: Vec<_> = reader.lines().map(Result::unwrap).collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn latin1_decodes_high_bytes() {
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xe9], "ISO-8859-1"), "café");
        assert_eq!(decode_text("café".as_bytes(), "UTF-8"), "café");
    }
}
