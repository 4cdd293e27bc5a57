//! Abstraction over a connected, non-blocking socket.
//!
//! Kept as a trait (rather than using `mio::net::TcpStream` directly everywhere) so the
//! reactor-facing code in [`crate::worker`] stays generic over the concrete transport — the only
//! implementation shipped is the `mio` one, but the seam is what lets
//! [`crate::net::nonblocking::NonBlocking`] be written once and wrap either a plain socket or one
//! behind TLS.
use std::io::{Error, Result};
use std::net::{Shutdown, SocketAddr};

/// Operations the I/O adapter and acceptor need from a connected stream.
pub trait TcpStream {
    /// Connects to `addr`, returning immediately without waiting for the handshake to finish.
    fn connect(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized;

    /// The remote endpoint's address.
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// The local endpoint's address.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Shuts down the read, write, or both halves of the connection.
    fn shutdown(&self, how: Shutdown) -> Result<()>;

    /// Enables or disables Nagle's algorithm.
    fn set_nodelay(&self, nodelay: bool) -> Result<()>;

    /// Current Nagle's algorithm setting.
    fn nodelay(&self) -> Result<bool>;

    fn set_ttl(&self, ttl: u32) -> Result<()>;

    fn ttl(&self) -> Result<u32>;

    /// Retrieves and clears the socket's pending error, if any.
    fn take_error(&self) -> Result<Option<Error>>;

    /// Reads without consuming, used to sniff the HTTP/2 connection preface before committing to
    /// an HTTP/1.1 parse.
    fn peek(&self, buf: &mut [u8]) -> Result<usize>;
}

impl TcpStream for mio::net::TcpStream {
    #[inline]
    fn connect(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized,
    {
        Self::connect(addr)
    }

    #[inline]
    fn peer_addr(&self) -> Result<SocketAddr> {
        Self::peer_addr(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
    }

    #[inline]
    fn shutdown(&self, how: Shutdown) -> Result<()> {
        Self::shutdown(self, how)
    }

    #[inline]
    fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Self::set_nodelay(self, nodelay)
    }

    #[inline]
    fn nodelay(&self) -> Result<bool> {
        Self::nodelay(self)
    }

    #[inline]
    fn set_ttl(&self, ttl: u32) -> Result<()> {
        Self::set_ttl(self, ttl)
    }

    #[inline]
    fn ttl(&self) -> Result<u32> {
        Self::ttl(self)
    }

    #[inline]
    fn take_error(&self) -> Result<Option<Error>> {
        Self::take_error(self)
    }

    #[inline]
    fn peek(&self, buf: &mut [u8]) -> Result<usize> {
        Self::peek(self, buf)
    }
}
