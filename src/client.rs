//! The per-connection state machine (spec §3 `Client`): reads a request off a non-blocking
//! socket, dispatches it through the router, and writes the response, cycling for keep-alive.
//!
//! This crate has no stackful-coroutine primitive, so a client's lifetime is modeled as an
//! explicit state machine driven by the worker rather than one logical thread of control per
//! connection (spec §9 "model each client's lifetime as an explicit state machine driven by the
//! scheduler... either is acceptable"). [`Client::advance`] does as much work as the socket
//! currently allows and returns a [`StepOutcome`] telling the worker what to wait for next; the
//! actual suspension point is documented on `crate::net::nonblocking`.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Token;

use crate::buffer::Buffer;
use crate::config::ServerOptions;
use crate::error::RaskError;
use crate::http::chunked::ChunkedDecoder;
use crate::http::request::{parse_head, BodyFraming, Progress, RequestHead};
use crate::http::response::ResponseWriter;
use crate::http::{Method, Status, Version};
use crate::net::nonblocking::{IoOutcome, NonBlocking};
use crate::net::tcp_stream::TcpStream;
use crate::router::Router;

/// Which direction a suspended client is waiting for readiness on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The socket has no data currently available; resume once it's readable.
    Read,
    /// The socket's send buffer is full; resume once it's writable.
    Write,
}

/// What the worker should do after a call to [`Client::advance`].
pub enum StepOutcome {
    /// Suspended waiting for `Direction` readiness on the client's socket.
    Blocked(Direction),
    /// A keep-alive request/response cycle just finished; the client has more work to do (the
    /// next pipelined request) but should rejoin the tail of the worker's ready queue first
    /// (spec §4.3 "yield before reading the next") rather than monopolizing this turn.
    Yielded,
    /// The connection is finished — closed by the peer, by policy, or by `Connection: close` —
    /// and should be deregistered and dropped.
    Done,
}

enum State {
    ReadHead,
    ReadBody {
        head: RequestHead,
        body: Vec<u8>,
        decoder: Option<ChunkedDecoder>,
    },
    WriteResponse {
        writer: ResponseWriter,
        close_after: bool,
    },
    Closed,
}

enum StepResult {
    Continue,
    Suspend(Direction),
    Yield,
    Closed,
}

/// One client connection (spec §3): a socket, its read buffer, the routing table it dispatches
/// against, and enough bookkeeping to drive keep-alive and idle timeouts. Owned exclusively by
/// the worker it was assigned to; never migrates between workers.
pub struct Client<S> {
    io: NonBlocking<S>,
    token: Token,
    address_index: usize,
    read_buf: Buffer,
    read_chunk: usize,
    state: State,
    router: Arc<Router>,
    max_body_bytes: usize,
    last_activity: Instant,
    idle_timeout: Option<Duration>,
}

impl<S> Client<S>
where
    S: TcpStream + io::Read + io::Write + mio::event::Source + std::os::fd::AsRawFd,
{
    /// Wraps a freshly accepted plaintext stream.
    pub fn new(
        stream: S,
        token: Token,
        address_index: usize,
        router: Arc<Router>,
        options: &ServerOptions,
    ) -> Self {
        Client {
            io: NonBlocking::plain(stream),
            token,
            address_index,
            read_buf: Buffer::new(options.buf_size),
            read_chunk: options.buf_size,
            state: State::ReadHead,
            router,
            max_body_bytes: options.max_body_bytes,
            last_activity: Instant::now(),
            idle_timeout: options.timeout,
        }
    }

    /// Wraps a freshly accepted stream behind an in-progress TLS session.
    pub fn new_tls(
        stream: S,
        session: rustls::ServerConnection,
        token: Token,
        address_index: usize,
        router: Arc<Router>,
        options: &ServerOptions,
    ) -> Self {
        Client {
            io: NonBlocking::tls(stream, session),
            token,
            address_index,
            read_buf: Buffer::new(options.buf_size),
            read_chunk: options.buf_size,
            state: State::ReadHead,
            router,
            max_body_bytes: options.max_body_bytes,
            last_activity: Instant::now(),
            idle_timeout: options.timeout,
        }
    }

    /// The token this client is registered under in the worker's poller.
    pub fn token(&self) -> Token {
        self.token
    }

    /// The underlying stream, for registering/deregistering with a `mio::Registry`.
    pub fn raw_stream_mut(&mut self) -> &mut S {
        self.io.raw_stream_mut()
    }

    /// Whether the worker should direct the poller's next wait at read or write readiness, based
    /// on TLS's own "wants read/write" signal taking priority over the HTTP layer's current state
    /// (spec §4.2 "the adapter also wraps TLS").
    pub fn wants(&self, default: Direction) -> Direction {
        match self.io.tls_wants() {
            Some((wants_read, wants_write)) if wants_write && !wants_read => Direction::Write,
            Some((true, _)) => Direction::Read,
            _ => default,
        }
    }

    /// The instant after which this client should be considered idle-timed-out, or `None` if no
    /// timeout is configured.
    pub fn timeout_deadline(&self) -> Option<Instant> {
        self.idle_timeout.map(|d| self.last_activity + d)
    }

    /// Drives the state machine forward until it either suspends on I/O or the connection closes.
    pub fn advance(&mut self) -> StepOutcome {
        loop {
            let result = match &self.state {
                State::ReadHead => self.step_read_head(),
                State::ReadBody { .. } => self.step_read_body(),
                State::WriteResponse { .. } => self.step_write(),
                State::Closed => return StepOutcome::Done,
            };

            match result {
                Ok(StepResult::Continue) => continue,
                Ok(StepResult::Suspend(direction)) => return StepOutcome::Blocked(direction),
                Ok(StepResult::Yield) => return StepOutcome::Yielded,
                Ok(StepResult::Closed) => {
                    self.state = State::Closed;
                    return StepOutcome::Done;
                }
                Err(err) => self.handle_error(err),
            }
        }
    }

    fn step_read_head(&mut self) -> Result<StepResult, RaskError> {
        match parse_head(&self.read_buf) {
            Ok(Progress::Complete(head, consumed)) => {
                self.read_buf.mark_read(consumed);
                self.begin_body(head)?;
                Ok(StepResult::Continue)
            }
            Ok(Progress::Partial) => self.pump_read(),
            Err(e) => Err(RaskError::from(e)),
        }
    }

    fn begin_body(&mut self, head: RequestHead) -> Result<(), RaskError> {
        if let BodyFraming::Identity(len) = head.framing {
            if len > self.max_body_bytes {
                return Err(RaskError::policy(
                    Status::ContentTooLarge,
                    "request body exceeds configured limit",
                ));
            }
        }
        let decoder = matches!(head.framing, BodyFraming::Chunked).then(ChunkedDecoder::new);
        self.state = State::ReadBody {
            head,
            body: Vec::new(),
            decoder,
        };
        Ok(())
    }

    fn step_read_body(&mut self) -> Result<StepResult, RaskError> {
        self.feed_body_bytes()?;
        if self.body_complete() {
            self.dispatch();
            return Ok(StepResult::Continue);
        }
        self.pump_read()
    }

    /// Feeds whatever is currently buffered into the in-progress body, without touching the
    /// socket. Safe to call repeatedly; a no-op once the body is complete.
    fn feed_body_bytes(&mut self) -> Result<(), RaskError> {
        let max_body_bytes = self.max_body_bytes;
        let Client { state, read_buf, .. } = self;
        let State::ReadBody { head, body, decoder } = state else {
            return Ok(());
        };

        match head.framing {
            BodyFraming::Empty => {}
            BodyFraming::Identity(target) => {
                let available = read_buf.remaining();
                let need = target.saturating_sub(body.len());
                let take = need.min(available);
                if take > 0 {
                    body.extend_from_slice(&read_buf[..take]);
                    read_buf.mark_read(take);
                }
            }
            BodyFraming::Chunked => {
                let decoder = decoder.as_mut().expect("chunked framing always carries a decoder");
                let consumed = decoder.feed(&read_buf[..], body)?;
                read_buf.mark_read(consumed);
            }
        }

        if body.len() > max_body_bytes {
            return Err(RaskError::policy(
                Status::ContentTooLarge,
                "request body exceeds configured limit",
            ));
        }
        Ok(())
    }

    fn body_complete(&self) -> bool {
        match &self.state {
            State::ReadBody { head, body, decoder } => match head.framing {
                BodyFraming::Empty => true,
                BodyFraming::Identity(n) => body.len() >= n,
                BodyFraming::Chunked => decoder.as_ref().is_some_and(ChunkedDecoder::is_done),
            },
            _ => false,
        }
    }

    /// Reads into `read_buf` once and reports the outcome; the common tail of both head and body
    /// reading, which only differ in how they interpret what's already buffered.
    fn pump_read(&mut self) -> Result<StepResult, RaskError> {
        let n = self.read_chunk;
        self.read_buf.reserve_write(n);
        match self.io.read(&mut self.read_buf[..n])? {
            IoOutcome::Ready(0) | IoOutcome::Closed => Ok(StepResult::Closed),
            IoOutcome::Ready(read) => {
                self.read_buf.mark_written(read);
                self.last_activity = Instant::now();
                Ok(StepResult::Continue)
            }
            IoOutcome::WouldBlock => Ok(StepResult::Suspend(Direction::Read)),
        }
    }

    /// Any unread body bytes are implicitly dropped here rather than drained to the next message
    /// boundary first — since the whole body is read to completion before dispatch (see the
    /// module doc comment), there is never an "unread tail" left over by the time a handler runs.
    fn dispatch(&mut self) {
        let State::ReadBody { head, body, .. } = std::mem::replace(&mut self.state, State::Closed)
        else {
            unreachable!("dispatch is only called from the ReadBody state");
        };

        let close_after = head.close_requested;
        let version = head.version;
        let skip_body = head.method == Method::Head;
        let response = self.router.dispatch(head, body, self.address_index);
        let writer = ResponseWriter::new(response, version, skip_body);
        self.state = State::WriteResponse { writer, close_after };
    }

    fn step_write(&mut self) -> Result<StepResult, RaskError> {
        let State::WriteResponse { mut writer, close_after } =
            std::mem::replace(&mut self.state, State::Closed)
        else {
            unreachable!("step_write is only called from the WriteResponse state");
        };

        match writer.write_to(&mut self.io) {
            Ok(Progress::Complete(_, _)) => {
                self.last_activity = Instant::now();
                if close_after {
                    Ok(StepResult::Closed)
                } else {
                    // Keep-alive: ready for the next pipelined request, but give other clients a
                    // turn first (spec §4.3 "yield before reading the next") rather than looping
                    // here — the worker re-enqueues this client at the tail of its ready queue.
                    self.state = State::ReadHead;
                    Ok(StepResult::Yield)
                }
            }
            Ok(Progress::Partial) => {
                self.state = State::WriteResponse { writer, close_after };
                Ok(StepResult::Suspend(Direction::Write))
            }
            Err(e) => Err(RaskError::from(e)),
        }
    }

    /// Converts an error into either an error response (if one can still be written) or an
    /// immediate close. Every error response closes the connection afterward: a protocol error
    /// leaves the parser's position untrustworthy, and a policy/handler error may have left part
    /// of the request body unread, so reusing the connection risks interpreting leftover bytes as
    /// the next request line.
    fn handle_error(&mut self, err: RaskError) {
        match err.status() {
            Some(status) => {
                let response = crate::http::response::Response::new(status)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .bytes(status.reason_phrase().as_bytes().to_vec());
                let writer = ResponseWriter::new(response, Version::H1_1, false);
                self.state = State::WriteResponse { writer, close_after: true };
            }
            None => {
                self.state = State::Closed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Composition, FilterChain};
    use crate::http::response::Response;
    use crate::router::{RouteBuilder, Scope};
    use mio::net::TcpStream as MioTcpStream;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    fn accepted_pair() -> (MioTcpStream, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_std = StdTcpStream::connect(addr).unwrap();
        let (server_std, _) = listener.accept().unwrap();
        server_std.set_nonblocking(true).unwrap();
        (MioTcpStream::from_std(server_std), client_std)
    }

    fn router_with_echo() -> Arc<Router> {
        let mut router = Router::new(FilterChain::new(Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("ping"),
            Arc::new(|_req| Ok(Response::text("pong"))),
        );
        Arc::new(router)
    }

    #[test]
    fn serves_a_full_request_response_cycle_over_real_sockets() {
        let (server_stream, mut client_stream) = accepted_pair();
        let options = ServerOptions::new();
        let mut client = Client::new(server_stream, Token(0), 0, router_with_echo(), &options);

        client_stream.write_all(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        // Give the loopback socket a moment to deliver; a production worker would wait for a
        // readiness event from the poller instead of spinning.
        let mut attempts = 0;
        loop {
            match client.advance() {
                StepOutcome::Blocked(Direction::Read) if attempts < 50 => {
                    attempts += 1;
                    std::thread::yield_now();
                }
                other => {
                    assert!(matches!(
                        other,
                        StepOutcome::Blocked(Direction::Write)
                            | StepOutcome::Blocked(Direction::Read)
                            | StepOutcome::Yielded
                    ));
                    break;
                }
            }
        }

        let mut buf = [0u8; 256];
        client_stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let n = client_stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("pong"));
    }

    #[test]
    fn unknown_route_closes_after_a_404() {
        let (server_stream, mut client_stream) = accepted_pair();
        let options = ServerOptions::new();
        let mut client = Client::new(server_stream, Token(0), 0, router_with_echo(), &options);

        client_stream.write_all(b"GET /missing HTTP/1.1\r\n\r\n").unwrap();
        let mut attempts = 0;
        while attempts < 50 {
            if matches!(client.advance(), StepOutcome::Done) {
                break;
            }
            attempts += 1;
            std::thread::yield_now();
        }

        let mut buf = [0u8; 256];
        client_stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let n = client_stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn oversized_identity_body_is_rejected_with_413() {
        let (server_stream, mut client_stream) = accepted_pair();
        let mut options = ServerOptions::new();
        options.max_body_bytes = 4;
        let mut client = Client::new(server_stream, Token(0), 0, router_with_echo(), &options);

        client_stream
            .write_all(b"POST /ping HTTP/1.1\r\nContent-Length: 1000\r\n\r\n")
            .unwrap();
        let mut attempts = 0;
        while attempts < 50 {
            if matches!(client.advance(), StepOutcome::Done) {
                break;
            }
            attempts += 1;
            std::thread::yield_now();
        }

        let mut buf = [0u8; 256];
        client_stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let n = client_stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 413 Content Too Large\r\n"));
    }
}
