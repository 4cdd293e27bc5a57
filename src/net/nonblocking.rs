//! The non-blocking I/O adapter.
//!
//! A handler-facing `read`/`write` pair that *looks* blocking but never actually blocks the
//! worker thread: every call attempts the underlying non-blocking syscall once, retrying
//! transparently on `EINTR`, and reports [`IoOutcome::WouldBlock`] instead of parking. Because
//! this crate models a task's suspension as "the connection's state machine returns control to
//! the worker's event loop" rather than a stackful coroutine, *this* is the actual suspension
//! point: the caller (`Client`, in `crate::client`) interprets `WouldBlock` by asking the
//! worker to keep watching the descriptor for the direction that blocked, and to call back in on
//! the next readiness event — which is exactly what `crate::worker::Worker`'s registry does.
use std::io::{self, ErrorKind, Read, Write};

use rustls::ServerConnection;

use crate::net::tcp_stream::TcpStream;

/// Result of one non-blocking I/O attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// `n` bytes were transferred. `0` on a read means the peer sent EOF.
    Ready(usize),
    /// The syscall would have blocked; the caller should register interest and wait for the next
    /// readiness notification before retrying.
    WouldBlock,
    /// The poller already reported a hang-up or error condition on this descriptor; no further
    /// I/O will succeed.
    Closed,
}

/// Runs `f` (a non-blocking syscall) until it stops reporting `EINTR`, translating the remaining
/// outcomes into [`IoOutcome`]. `f` must not itself loop on would-block.
fn retry_on_interrupt(mut f: impl FnMut() -> io::Result<usize>) -> io::Result<IoOutcome> {
    loop {
        match f() {
            Ok(n) => return Ok(IoOutcome::Ready(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(IoOutcome::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Either a plain socket or one wrapped in a TLS session, unified behind one `read`/`write`
/// surface. The TLS session's own "wants read"/"wants write" signal is folded into the same
/// `IoOutcome` the plaintext path reports, so callers never need to know which variant they hold.
pub enum NonBlocking<S> {
    /// Cleartext TCP.
    Plain(S),
    /// TLS over TCP. The socket is driven through `rustls`, which is treated as an opaque stream
    /// reporting `wants_read`/`wants_write`; TLS library internals are otherwise out of scope.
    Tls(S, Box<ServerConnection>),
}

impl<S> NonBlocking<S>
where
    S: TcpStream + Read + Write + mio::event::Source,
{
    /// Wraps a plaintext stream.
    pub fn plain(stream: S) -> Self {
        NonBlocking::Plain(stream)
    }

    /// Wraps a stream behind an in-progress or established TLS session.
    pub fn tls(stream: S, session: ServerConnection) -> Self {
        NonBlocking::Tls(stream, Box::new(session))
    }

    /// Non-blocking read into `buf`. Never retries on `WouldBlock` — the caller decides whether
    /// to park.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<IoOutcome> {
        match self {
            NonBlocking::Plain(stream) => retry_on_interrupt(|| stream.read(buf)),
            NonBlocking::Tls(stream, tls) => {
                match retry_on_interrupt(|| tls.read_tls(stream))? {
                    IoOutcome::Ready(0) => return Ok(IoOutcome::Closed),
                    IoOutcome::Ready(_) => {}
                    other => return Ok(other),
                }

                if let Err(_e) = tls.process_new_packets() {
                    return Ok(IoOutcome::Closed);
                }

                match tls.reader().read(buf) {
                    Ok(n) => Ok(IoOutcome::Ready(n)),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(IoOutcome::WouldBlock),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Non-blocking write of `buf`.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<IoOutcome> {
        match self {
            NonBlocking::Plain(stream) => retry_on_interrupt(|| stream.write(buf)),
            NonBlocking::Tls(stream, tls) => {
                let n = tls.writer().write(buf)?;
                retry_on_interrupt(|| tls.write_tls(stream))?;
                Ok(IoOutcome::Ready(n))
            }
        }
    }

    /// Flushes any TLS records still buffered for the socket. A no-op for plaintext connections,
    /// since plain writes hit the socket directly.
    pub fn flush_tls(&mut self) -> io::Result<IoOutcome> {
        match self {
            NonBlocking::Plain(_) => Ok(IoOutcome::Ready(0)),
            NonBlocking::Tls(stream, tls) => retry_on_interrupt(|| tls.write_tls(stream)),
        }
    }

    /// Which direction(s) the underlying transport currently needs readiness on. For plaintext
    /// this is determined by the caller (whether there's a pending write); for TLS, the session
    /// itself may need to read (renegotiation, handshake) or write (buffered records) regardless
    /// of what the HTTP layer is doing.
    pub fn tls_wants(&self) -> Option<(bool, bool)> {
        match self {
            NonBlocking::Plain(_) => None,
            NonBlocking::Tls(_, tls) => Some((tls.wants_read(), tls.wants_write())),
        }
    }

    /// Enables or disables socket corking (`TCP_CORK`) so headers and the first body bytes of a
    /// response coalesce into as few packets as possible.
    pub fn set_cork(&self, cork: bool) -> io::Result<()> {
        let stream = match self {
            NonBlocking::Plain(s) => s,
            NonBlocking::Tls(s, _) => s,
        };
        set_cork(stream, cork)
    }

    /// Access to the underlying stream, e.g. for `sendfile`.
    pub fn raw_stream(&self) -> &S {
        match self {
            NonBlocking::Plain(s) => s,
            NonBlocking::Tls(s, _) => s,
        }
    }

    /// Mutable access to the underlying stream, for `mio::Registry::register`/`reregister`.
    pub fn raw_stream_mut(&mut self) -> &mut S {
        match self {
            NonBlocking::Plain(s) => s,
            NonBlocking::Tls(s, _) => s,
        }
    }
}

#[cfg(unix)]
fn set_cork<S: std::os::fd::AsRawFd>(stream: &S, cork: bool) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let value: libc::c_int = cork.into();
    // SAFETY: `fd` is a valid, open socket for the lifetime of this call; `value` is a plain
    // `c_int` whose address we pass with its own exact size.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_CORK,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Copies bytes from `file` to `socket` via `sendfile(2)`, starting at `offset`, without
/// buffering through user space. The file's own
/// kernel read offset is never touched — callers pass an explicit `offset` each time, so
/// concurrent requests can share one descriptor safely.
///
/// Returns the number of bytes copied this call, or `WouldBlock`/`Closed` like any other
/// non-blocking write.
#[cfg(unix)]
pub fn sendfile<S: std::os::fd::AsRawFd>(
    socket: &S,
    file: &std::fs::File,
    offset: i64,
    count: usize,
) -> io::Result<IoOutcome> {
    use std::os::fd::AsRawFd;

    let mut off = offset;
    loop {
        // SAFETY: `socket` and `file` are valid open descriptors for the duration of this call;
        // `off` is a valid pointer to an `i64` the kernel updates in place.
        let n = unsafe {
            libc::sendfile(
                socket.as_raw_fd(),
                file.as_raw_fd(),
                &mut off as *mut i64,
                count,
            )
        };

        if n >= 0 {
            return Ok(IoOutcome::Ready(n as usize));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => return Ok(IoOutcome::WouldBlock),
            _ => return Err(err),
        }
    }
}

/// Generalizes the would-block/retry dance so code outside this crate's own parser/writer (e.g.
/// a downstream database client with its own non-blocking primitive) can plug into the same
/// suspension contract. `f` is called once; if it reports it would
/// block, the caller gets `IoOutcome::WouldBlock` back and is expected to re-invoke
/// `schedule_io` after the worker signals the descriptor is ready again. `f` returning `Ok(0)`
/// is treated as signaling that no further progress is possible.
pub fn schedule_io(mut f: impl FnMut() -> io::Result<usize>) -> io::Result<IoOutcome> {
    retry_on_interrupt(&mut f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_on_interrupt_surfaces_would_block() {
        let mut calls = 0;
        let result = retry_on_interrupt(|| {
            calls += 1;
            Err(io::Error::from(ErrorKind::WouldBlock))
        });
        assert_eq!(IoOutcome::WouldBlock, result.unwrap());
        assert_eq!(1, calls);
    }

    #[test]
    fn retry_on_interrupt_retries_transparently() {
        let mut calls = 0;
        let result = retry_on_interrupt(|| {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from(ErrorKind::Interrupted))
            } else {
                Ok(42)
            }
        });
        assert_eq!(IoOutcome::Ready(42), result.unwrap());
        assert_eq!(3, calls);
    }
}
