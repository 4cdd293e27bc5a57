//! Response construction and wire serialization, including chunked encoding and `sendfile`.

use std::io::{self, Read, Write};
use std::sync::Arc;

use super::chunked::{encode_chunk, encode_last_chunk};
use super::request::Progress;
use super::sse::SseEvent;
use super::{Header, Status, Version};
use crate::net::nonblocking::{self, IoOutcome, NonBlocking};
use crate::net::tcp_stream::TcpStream;

/// A streamed body source: repeated calls to `next` hand back chunks to encode, in order, until
/// it returns `None`.
pub type BodyStream = Box<dyn Iterator<Item = Vec<u8>> + Send>;

/// A response body (spec §4.3's `{Empty, Bytes, Stream, File}`).
pub enum Body {
    /// No body at all (distinct from a zero-length one: no framing header is emitted unless the
    /// caller set one explicitly).
    Empty,
    /// A complete, in-memory body.
    Bytes(Vec<u8>),
    /// A body produced incrementally and sent with `Transfer-Encoding: chunked`.
    Stream(BodyStream),
    /// A body served directly from a file via `sendfile`. `file` is reference-counted so a
    /// cache-owned descriptor can be shared by concurrent requests without early closure —
    /// closing happens naturally when the last `Arc` referencing it is dropped.
    File { file: Arc<std::fs::File>, size: u64 },
}

/// A post-hook run once the response has been fully flushed to the socket — used, e.g., to
/// release a file-cache build lock or bump a counter.
pub type PostHook = Box<dyn FnOnce() + Send>;

/// An HTTP response under construction. Build with [`Response::new`] and the header/body
/// setters, then hand it to the connection layer to serialize.
pub struct Response {
    status: Status,
    headers: Vec<Header>,
    body: Body,
    post_hook: Option<PostHook>,
}

impl Response {
    /// A response with no headers and an empty body.
    pub fn new(status: Status) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body: Body::Empty,
            post_hook: None,
        }
    }

    /// `200 OK` with a `text/plain` bytes body — the common case for handler return values.
    pub fn text(body: impl Into<String>) -> Self {
        Response::new(Status::r#Ok)
            .header("Content-Type", "text/plain; charset=utf-8")
            .bytes(body.into().into_bytes())
    }

    /// Appends a header. Does not check for duplicates — callers that need to replace a header
    /// should avoid setting it twice.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Sets the body to `data`, to be sent with an exact `Content-Length`.
    pub fn bytes(mut self, data: Vec<u8>) -> Self {
        self.body = Body::Bytes(data);
        self
    }

    /// Sets the body to a chunked stream.
    pub fn stream(mut self, source: BodyStream) -> Self {
        self.body = Body::Stream(source);
        self
    }

    /// Sets the body to a shared file descriptor, served with `sendfile`.
    pub fn file(mut self, file: Arc<std::fs::File>, size: u64) -> Self {
        self.body = Body::File { file, size };
        self
    }

    /// Sets the body to a server-sent-events stream, setting `Content-Type: text/event-stream`
    /// automatically (spec §6).
    pub fn sse(self, events: impl Iterator<Item = SseEvent> + Send + 'static) -> Self {
        self.header("Content-Type", super::sse::CONTENT_TYPE)
            .header("Cache-Control", "no-cache")
            .stream(Box::new(events.map(|e| e.to_bytes())))
    }

    /// Registers a callback run exactly once, after the response has been fully written (or the
    /// connection is torn down before it could be).
    pub fn on_complete(mut self, hook: PostHook) -> Self {
        self.post_hook = Some(hook);
        self
    }

    /// The status this response will report.
    pub fn status(&self) -> Status {
        self.status
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name_eq_ignore_ascii_case(name))
            .map(Header::value)
    }

    #[cfg(test)]
    pub(crate) fn headers_for_test(&self) -> &[Header] {
        &self.headers
    }
}

enum BodyWriter {
    None,
    Bytes { data: Vec<u8>, pos: usize },
    Chunked { source: BodyStream, pending: Vec<u8>, pos: usize, finished: bool },
    File { file: Arc<std::fs::File>, offset: i64, remaining: u64 },
}

/// Drives serialization of one [`Response`] onto a connection, across as many non-blocking write
/// attempts as it takes. Construct with [`ResponseWriter::new`]; call
/// [`ResponseWriter::write_to`] each time the socket is writable until it reports
/// [`Progress::Complete`].
pub struct ResponseWriter {
    head: Vec<u8>,
    head_pos: usize,
    body: BodyWriter,
    corked: bool,
    post_hook: Option<PostHook>,
}

impl ResponseWriter {
    /// Serializes `response`'s status line and headers up front; the body is streamed lazily by
    /// [`ResponseWriter::write_to`]. `skip_body` is set for responses to `HEAD` requests: headers
    /// are still written (and body resources still released) but no body bytes are sent.
    pub fn new(mut response: Response, version: Version, skip_body: bool) -> Self {
        let post_hook = response.post_hook.take();

        let content_length = match &response.body {
            Body::Empty => Some(0),
            Body::Bytes(data) => Some(data.len() as u64),
            Body::File { size, .. } => Some(*size),
            Body::Stream(_) => None,
        };

        let mut head = format!(
            "{} {} {}\r\n",
            version,
            response.status.code(),
            response.status.reason_phrase()
        )
        .into_bytes();

        let has_content_length = response.header_value("content-length").is_some();
        let has_transfer_encoding = response.header_value("transfer-encoding").is_some();

        for header in &response.headers {
            head.extend_from_slice(format!("{}\r\n", header).as_bytes());
        }

        match content_length {
            Some(len) if !has_content_length => {
                head.extend_from_slice(format!("Content-Length: {}\r\n", len).as_bytes());
            }
            None if !has_transfer_encoding => {
                head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
            }
            _ => {}
        }
        head.extend_from_slice(b"\r\n");

        let body = if skip_body {
            BodyWriter::None
        } else {
            match response.body {
                Body::Empty => BodyWriter::None,
                Body::Bytes(data) => BodyWriter::Bytes { data, pos: 0 },
                Body::Stream(source) => BodyWriter::Chunked {
                    source,
                    pending: Vec::new(),
                    pos: 0,
                    finished: false,
                },
                Body::File { file, size } => BodyWriter::File {
                    file,
                    offset: 0,
                    remaining: size,
                },
            }
        };

        ResponseWriter {
            head,
            head_pos: 0,
            body,
            corked: false,
            post_hook,
        }
    }

    /// Attempts to write as much of the response as the socket currently accepts. Returns
    /// [`Progress::Partial`] if the socket reported would-block before the response finished, or
    /// [`Progress::Complete`] once every byte (and `post_hook`, if any) has run.
    #[cfg(unix)]
    pub fn write_to<S>(&mut self, io: &mut NonBlocking<S>) -> io::Result<Progress<()>>
    where
        S: TcpStream + Read + Write + mio::event::Source + std::os::fd::AsRawFd,
    {
        if !self.corked {
            io.set_cork(true)?;
            self.corked = true;
        }

        if self.head_pos < self.head.len() {
            match io.write(&self.head[self.head_pos..])? {
                IoOutcome::Ready(0) | IoOutcome::Closed => {
                    return Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                }
                IoOutcome::Ready(n) => self.head_pos += n,
                IoOutcome::WouldBlock => return Ok(Progress::Partial),
            }
            if self.head_pos < self.head.len() {
                return Ok(Progress::Partial);
            }
        }

        loop {
            match &mut self.body {
                BodyWriter::None => break,
                BodyWriter::Bytes { data, pos } => {
                    if *pos == data.len() {
                        break;
                    }
                    match io.write(&data[*pos..])? {
                        IoOutcome::Ready(0) | IoOutcome::Closed => {
                            return Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                        }
                        IoOutcome::Ready(n) => *pos += n,
                        IoOutcome::WouldBlock => return Ok(Progress::Partial),
                    }
                }
                BodyWriter::Chunked { source, pending, pos, finished } => {
                    if *pos == pending.len() {
                        if *finished {
                            break;
                        }
                        *pending = match source.next() {
                            Some(chunk) if !chunk.is_empty() => encode_chunk(&chunk),
                            Some(_) => continue,
                            None => {
                                *finished = true;
                                encode_last_chunk().to_vec()
                            }
                        };
                        *pos = 0;
                    }
                    match io.write(&pending[*pos..])? {
                        IoOutcome::Ready(0) | IoOutcome::Closed => {
                            return Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                        }
                        IoOutcome::Ready(n) => *pos += n,
                        IoOutcome::WouldBlock => return Ok(Progress::Partial),
                    }
                }
                BodyWriter::File { file, offset, remaining } => {
                    if *remaining == 0 {
                        break;
                    }
                    let count = (*remaining).min(1 << 20) as usize;
                    match nonblocking::sendfile(io.raw_stream(), file, *offset, count)? {
                        IoOutcome::Ready(0) | IoOutcome::Closed => {
                            return Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                        }
                        IoOutcome::Ready(n) => {
                            *offset += n as i64;
                            *remaining -= n as u64;
                        }
                        IoOutcome::WouldBlock => return Ok(Progress::Partial),
                    }
                }
            }
        }

        io.set_cork(false)?;
        if let Some(hook) = self.post_hook.take() {
            hook();
        }
        Ok(Progress::Complete((), self.head.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_content_length_for_bytes_body() {
        let response = Response::new(Status::r#Ok).bytes(b"hello".to_vec());
        let writer = ResponseWriter::new(response, Version::H1_1, false);
        let head = String::from_utf8(writer.head.clone()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Length: 5\r\n"));
    }

    #[test]
    fn sets_chunked_transfer_encoding_for_stream_body() {
        let response =
            Response::new(Status::r#Ok).stream(Box::new(vec![b"a".to_vec()].into_iter()));
        let writer = ResponseWriter::new(response, Version::H1_1, false);
        let head = String::from_utf8(writer.head.clone()).unwrap();
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));
    }

    #[test]
    fn head_request_skips_body_but_keeps_content_length() {
        let response = Response::new(Status::r#Ok).bytes(b"hello".to_vec());
        let writer = ResponseWriter::new(response, Version::H1_1, true);
        assert!(matches!(writer.body, BodyWriter::None));
        let head = String::from_utf8(writer.head.clone()).unwrap();
        assert!(head.contains("Content-Length: 5\r\n"));
    }

    #[test]
    fn explicit_content_length_header_is_not_duplicated() {
        let response = Response::new(Status::r#Ok)
            .header("Content-Length", "3")
            .bytes(b"abc".to_vec());
        let writer = ResponseWriter::new(response, Version::H1_1, false);
        let head = String::from_utf8(writer.head.clone()).unwrap();
        assert_eq!(1, head.matches("Content-Length").count());
    }
}
