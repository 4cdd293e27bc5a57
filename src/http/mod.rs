//! HTTP/1.1 wire format: request parsing, response serialization, chunked framing,
//! cookies, and Server-Sent Events.

pub mod chunked;
pub mod cookie;
pub mod date;
pub mod method;
pub mod raw;
pub mod request;
pub mod response;
pub mod sse;
pub mod status;
pub mod version;

pub use method::Method;
pub use status::Status;
pub use version::Version;

use core::fmt::Display;

/// A single header field: a case-preserved name and a trimmed, case-preserved value.
///
/// Header *names* compare case-insensitively everywhere this type is looked up; the
/// bytes here retain whatever case the client or handler used, since some clients are sensitive
/// to it when echoing headers back in logs or error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Builds a header, trimming leading/trailing ASCII whitespace from the value per RFC 9112
    /// §5.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Header {
            name: name.into(),
            value: value.trim().to_string(),
        }
    }

    /// The header name, in whatever case it was supplied.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The trimmed header value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-insensitive name comparison, per RFC 9110 §5.1.
    pub fn name_eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Errors raised while parsing the request line, headers, or chunked framing
/// Protocol errors). Each variant maps to exactly one response status in
/// [`crate::error::RaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The request line had no method token at all, or the token contained bytes that can never
    /// form a valid method (an empty token before the first space). The request line itself is
    /// malformed.
    Method,
    /// The request line was well-formed but its method token isn't in the accepted set (e.g.
    /// `PATCH`). Distinct from [`ParseError::Method`] because this maps to `405`, not `400`.
    UnknownMethod,
    /// The request-target was missing, empty, or contained an invalid octet.
    Target,
    /// The HTTP-version token was not `HTTP/1.x`.
    Version,
    /// A header line was missing the `:` separator or had an invalid name token.
    HeaderName,
    /// A header value contained a disallowed control character.
    HeaderValue,
    /// A line was not terminated with `\r\n`, or the header block had no terminating blank line.
    NewLine,
    /// A chunk-size line was not valid hex, or the chunked body was truncated.
    ChunkFraming,
    /// `Content-Length` was present but not a valid non-negative integer.
    ContentLength,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParseError::Method => "invalid token in method",
            ParseError::UnknownMethod => "method not in the accepted set",
            ParseError::Target => "invalid token in request-target",
            ParseError::Version => "invalid or unsupported HTTP version",
            ParseError::HeaderName => "invalid token in header name",
            ParseError::HeaderValue => "invalid token in header value",
            ParseError::NewLine => "invalid or missing line terminator",
            ParseError::ChunkFraming => "invalid chunked transfer framing",
            ParseError::ContentLength => "invalid Content-Length",
        })
    }
}

impl std::error::Error for ParseError {}

/// Finds the offset of the next non-whitespace character starting at `start`.
///
/// Per RFC 9112 §3, this is any SP, HTAB, VT, FF, or CR *not* followed by LF (a bare CRLF is a
/// line terminator, not whitespace to be skipped over).
pub fn get_non_whitespace_pos(buf: &[u8], start: usize) -> Option<usize> {
    let mut buf_iter = buf.iter().skip(start).peekable();
    let mut pos = start;

    loop {
        if let Some(&b) = buf_iter.next() {
            pos += 1;

            if b == b'\r' && buf_iter.peek() == Some(&&b'\n') {
                return Some(pos - 1);
            }

            if b != b' ' && b != b'\t' && !(0x11..=b'\r').contains(&b) {
                return Some(pos);
            }
        } else {
            return None;
        }
    }
}

/// Consumes `buf` up to and including the next `\r\n`, discarding everything iterated over.
pub fn take_after_newline(buf: &mut raw::RawRequest<'_>) -> Result<(), ParseError> {
    loop {
        match buf.next() {
            Some(&b) => {
                if b == b'\r' && buf.peek() == Some(b'\n') {
                    buf.advance(1);
                    buf.slice();
                    return Ok(());
                }
            }
            None => return Err(ParseError::NewLine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_compares_name_case_insensitively() {
        let h = Header::new("Content-Type", " text/plain ");
        assert!(h.name_eq_ignore_ascii_case("content-type"));
        assert_eq!("text/plain", h.value());
    }

    #[test]
    fn non_whitespace_pos_skips_spaces_and_tabs() {
        assert_eq!(Some(2), get_non_whitespace_pos(b"  x", 0));
        assert_eq!(Some(0), get_non_whitespace_pos(b"x", 0));
        assert_eq!(None, get_non_whitespace_pos(b"   ", 0));
    }
}
