//! Representation of the HTTP version on the request line / status line.
use std::fmt::Display;

/// HTTP version token. Only `HTTP/1.1` is served; `HTTP/1.0` is recognized so the parser can
/// reject it deliberately rather than choking on it, and `HTTP/2`/`HTTP/3` are recognized so a
/// connection can fall back to an error response instead of being misparsed as a malformed H1
/// request (negotiating H2/H3 themselves is out of scope).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
    /// HTTP/2
    H2,
    /// HTTP/3
    H3,
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
            Self::H3 => "HTTP/3",
        })
    }
}
