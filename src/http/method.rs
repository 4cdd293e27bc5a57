//! Representation of the HTTP request method.
use std::fmt::Display;

/// Methods this server accepts.
///
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9) defines a larger
/// set; anything outside this list is rejected by the parser with `405 Method Not Allowed`
/// before a route is ever consulted.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
}

impl Method {
    /// Parses the method token from a request line. Returns `None` for anything not in the
    /// accepted set, including lower-case or otherwise malformed tokens.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_five_supported_methods() {
        assert_eq!(Some(Method::Get), Method::from_bytes(b"GET"));
        assert_eq!(Some(Method::Head), Method::from_bytes(b"HEAD"));
        assert_eq!(Some(Method::Post), Method::from_bytes(b"POST"));
        assert_eq!(Some(Method::Put), Method::from_bytes(b"PUT"));
        assert_eq!(Some(Method::Delete), Method::from_bytes(b"DELETE"));
    }

    #[test]
    fn rejects_methods_outside_the_accepted_set() {
        assert_eq!(None, Method::from_bytes(b"CONNECT"));
        assert_eq!(None, Method::from_bytes(b"OPTIONS"));
        assert_eq!(None, Method::from_bytes(b"TRACE"));
        assert_eq!(None, Method::from_bytes(b"get"));
        assert_eq!(None, Method::from_bytes(b"PATCH"));
    }
}
