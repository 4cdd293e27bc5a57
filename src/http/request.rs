//! HTTP/1.1 request line + header parsing and body framing.

use std::collections::HashMap;

use super::raw::RawRequest;
use super::{take_after_newline, Header, Method, ParseError, Version};

/// How far a partial parse got. Headers may arrive split across several `read`s, so parsing
/// must be resumable rather than all-or-nothing.
#[derive(Debug)]
pub enum Progress<T> {
    /// Not enough bytes buffered yet to finish; call again after the next read.
    Partial,
    /// Finished. Carries the parsed value and how many bytes of the input it consumed.
    Complete(T, usize),
}

/// How the request body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body.
    Empty,
    /// `Content-Length: n` identity body.
    Identity(usize),
    /// `Transfer-Encoding: chunked` body.
    Chunked,
}

/// The parsed request line and header block. The body itself is not represented here — it's
/// streamed separately by the connection state machine using [`BodyFraming`] to know when it has
/// reached the next message boundary.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Raw request-target as sent (before `?`), percent-decoding is the caller's job.
    pub path: String,
    /// Query string, if any (after `?`, not including it).
    pub query: Option<String>,
    /// Declared HTTP version.
    pub version: Version,
    /// Headers in arrival order, duplicates preserved.
    pub headers: Vec<Header>,
    /// How the body is framed.
    pub framing: BodyFraming,
    /// `true` if this request carried `Connection: close`.
    pub close_requested: bool,
}

impl RequestHead {
    /// First header matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.name_eq_ignore_ascii_case(name))
    }

    /// The `Host` header's value, if present.
    pub fn host(&self) -> Option<&str> {
        self.header("host").map(Header::value)
    }

    /// Parses `query` into a multimap, discarding structure beyond key/value pairs
    /// e.g. `parse_query("a=b&c=d")` yields `{("a","b"),("c","d")}`.
    pub fn parse_query(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let Some(query) = &self.query else {
            return out;
        };
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let mut parts = pair.splitn(2, '=');
            let k = parts.next().unwrap_or_default();
            let v = parts.next().unwrap_or_default();
            out.insert(percent_decode(k), percent_decode(v));
        }
        out
    }

    /// Splits a path on `/`, discarding empty segments and the leading/trailing slash
    /// e.g. `"/a//b/" -> ["a","b"]`.
    pub fn path_segments(&self) -> Vec<&str> {
        split_on_slash(&self.path)
    }
}

/// Discards empty segments and the leading/trailing slash.
pub fn split_on_slash(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Decodes `%XX` escapes and `+` (form-encoded space). Invalid escapes pass through unescaped
/// rather than failing the whole request — malformed percent-encoding in the *path* is rejected
/// up front, but query values are treated leniently since many real clients send
/// loosely-encoded values.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encodes everything outside of unreserved characters (RFC 3986 §2.3). Pairs with
/// [`percent_decode`] to form a round trip.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Attempts to parse a complete request line + header block from `buf`. Returns
/// [`Progress::Partial`] if the terminating blank line hasn't arrived yet.
pub fn parse_head(buf: &[u8]) -> Result<Progress<RequestHead>, ParseError> {
    let Some(header_end) = find_header_terminator(buf) else {
        return Ok(Progress::Partial);
    };

    let mut cursor = RawRequest::new(&buf[..header_end]);

    let method = parse_method(&mut cursor)?;
    let (path, query) = parse_target(&mut cursor)?;
    let version = parse_version(&mut cursor)?;
    take_after_newline(&mut cursor)?;

    let headers = parse_headers(&mut cursor)?;

    let framing = determine_framing(&headers)?;
    let close_requested = headers
        .iter()
        .any(|h| h.name_eq_ignore_ascii_case("connection") && h.value().eq_ignore_ascii_case("close"));

    let head = RequestHead {
        method,
        path,
        query,
        version,
        headers,
        framing,
        close_requested,
    };

    Ok(Progress::Complete(head, header_end))
}

/// Finds the offset just past the header-terminating blank line (`\r\n\r\n`).
fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn parse_method(cursor: &mut RawRequest<'_>) -> Result<Method, ParseError> {
    let Some(sp) = cursor.as_ref().iter().position(|&b| b == b' ') else {
        return Err(ParseError::Method);
    };
    cursor.advance(sp);
    let token = cursor.slice_skip(0).map_err(|_| ParseError::Method)?;
    cursor.advance(1); // the space
    cursor.slice();
    if token.is_empty() {
        return Err(ParseError::Method);
    }
    Method::from_bytes(token).ok_or(ParseError::UnknownMethod)
}

fn parse_target(cursor: &mut RawRequest<'_>) -> Result<(String, Option<String>), ParseError> {
    let Some(sp) = cursor.as_ref().iter().position(|&b| b == b' ') else {
        return Err(ParseError::Target);
    };
    cursor.advance(sp);
    let token = cursor.slice_skip(0).map_err(|_| ParseError::Target)?;
    cursor.advance(1);
    cursor.slice();

    if token.is_empty() || !token.iter().all(|&b| is_request_target_byte(b)) {
        return Err(ParseError::Target);
    }

    let raw = std::str::from_utf8(token).map_err(|_| ParseError::Target)?;
    match raw.split_once('?') {
        Some((path, query)) => Ok((path.to_string(), Some(query.to_string()))),
        None => Ok((raw.to_string(), None)),
    }
}

fn is_request_target_byte(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}

fn parse_version(cursor: &mut RawRequest<'_>) -> Result<Version, ParseError> {
    let rest = cursor.as_ref();
    if !rest.starts_with(b"HTTP/1.") || rest.len() < 8 {
        return Err(ParseError::Version);
    }
    let version = match rest[7] {
        b'0' => Version::H1_0,
        b'1' => Version::H1_1,
        _ => return Err(ParseError::Version),
    };
    cursor.advance(8);
    cursor.slice();
    Ok(version)
}

fn parse_headers(cursor: &mut RawRequest<'_>) -> Result<Vec<Header>, ParseError> {
    let mut headers = Vec::new();

    loop {
        let rest = cursor.as_ref();
        if rest.starts_with(b"\r\n") {
            cursor.advance(2);
            cursor.slice();
            break;
        }
        if rest.is_empty() {
            break;
        }

        // Continuation lines (leading whitespace) are not supported.
        if rest[0] == b' ' || rest[0] == b'\t' {
            return Err(ParseError::HeaderName);
        }

        let Some(colon) = rest.iter().position(|&b| b == b':') else {
            return Err(ParseError::HeaderName);
        };
        let name = &rest[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_header_name_byte(b)) {
            return Err(ParseError::HeaderName);
        }

        let Some(nl) = rest.windows(2).position(|w| w == b"\r\n") else {
            return Err(ParseError::NewLine);
        };
        let value = &rest[colon + 1..nl];
        if !value.iter().all(|&b| is_header_value_byte(b)) {
            return Err(ParseError::HeaderValue);
        }

        let name = std::str::from_utf8(name).map_err(|_| ParseError::HeaderName)?;
        let value = std::str::from_utf8(value).map_err(|_| ParseError::HeaderValue)?;
        headers.push(Header::new(name, value));

        cursor.advance(nl + 2);
        cursor.slice();
    }

    Ok(headers)
}

fn is_header_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'^' | b'`' | b'|' | b'~')
}

fn is_header_value_byte(b: u8) -> bool {
    b == b'\t' || (0x20..=0xff).contains(&b) && b != 0x7f
}

/// Decides body framing: `Transfer-Encoding: chunked` wins outright; otherwise
/// `Content-Length` governs; otherwise the body is empty.
fn determine_framing(headers: &[Header]) -> Result<BodyFraming, ParseError> {
    let chunked = headers.iter().any(|h| {
        h.name_eq_ignore_ascii_case("transfer-encoding") && h.value().eq_ignore_ascii_case("chunked")
    });

    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    match headers.iter().find(|h| h.name_eq_ignore_ascii_case("content-length")) {
        Some(h) => {
            let len: usize = h.value().parse().map_err(|_| ParseError::ContentLength)?;
            Ok(BodyFraming::Identity(len))
        }
        None => Ok(BodyFraming::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_get() {
        let buf = b"GET /hello/world HTTP/1.1\r\nHost: example.org\r\n\r\n";
        let Progress::Complete(head, consumed) = parse_head(buf).unwrap() else {
            panic!("expected complete parse");
        };
        assert_eq!(Method::Get, head.method);
        assert_eq!("/hello/world", head.path);
        assert_eq!(None, head.query);
        assert_eq!(Version::H1_1, head.version);
        assert_eq!(Some("example.org"), head.host());
        assert_eq!(BodyFraming::Empty, head.framing);
        assert_eq!(buf.len(), consumed);
    }

    #[test]
    fn reports_partial_until_headers_are_complete() {
        let buf = b"GET / HTTP/1.1\r\nHost: example.org\r\n";
        assert!(matches!(parse_head(buf).unwrap(), Progress::Partial));
    }

    #[test]
    fn splits_query_string() {
        let buf = b"GET /echo?x=1&y=two HTTP/1.1\r\n\r\n";
        let Progress::Complete(head, _) = parse_head(buf).unwrap() else {
            panic!("expected complete parse");
        };
        let q = head.parse_query();
        assert_eq!(Some(&"1".to_string()), q.get("x"));
        assert_eq!(Some(&"two".to_string()), q.get("y"));
    }

    #[test]
    fn transfer_encoding_wins_over_content_length() {
        let buf = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 10\r\n\r\n";
        let Progress::Complete(head, _) = parse_head(buf).unwrap() else {
            panic!("expected complete parse");
        };
        assert_eq!(BodyFraming::Chunked, head.framing);
    }

    #[test]
    fn rejects_continuation_lines() {
        let buf = b"GET / HTTP/1.1\r\nFoo: bar\r\n baz\r\n\r\n";
        assert!(parse_head(buf).is_err());
    }

    #[test]
    fn rejects_methods_outside_accepted_set() {
        let buf = b"PATCH / HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_head(buf), Err(ParseError::UnknownMethod)));
    }

    #[test]
    fn rejects_malformed_request_line_with_no_method_token() {
        let buf = b" / HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_head(buf), Err(ParseError::Method)));
    }

    #[test]
    fn percent_round_trips_ascii_strings() {
        let original = "hello world/?=&%";
        assert_eq!(original, percent_decode(&percent_encode(original)));
    }

    #[test]
    fn split_on_slash_discards_empty_segments() {
        assert_eq!(vec!["a", "b"], split_on_slash("/a//b/"));
    }
}
