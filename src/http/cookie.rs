//! RFC 6265 cookie parsing and serialization.

use std::fmt;

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`.
    Strict,
    /// `SameSite=Lax`.
    Lax,
    /// `SameSite=None`.
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// A cookie as set via `Set-Cookie`. Construct with [`Cookie::new`] and chain the attribute
/// setters; [`Cookie::expired`] produces the `Max-Age=-1` deletion form.
#[derive(Debug, Clone)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    expires: Option<String>,
    max_age: Option<i64>,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
    extension: Vec<String>,
}

impl Cookie {
    /// A cookie with no attributes set.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
            extension: Vec::new(),
        }
    }

    /// A cookie that instructs the client to delete any cookie of this name (`Max-Age=-1`).
    pub fn expired(name: impl Into<String>) -> Self {
        Cookie::new(name, "").max_age(-1)
    }

    /// Sets the `Path` attribute.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the `Domain` attribute.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the `Expires` attribute, as a pre-formatted HTTP date string.
    pub fn expires(mut self, http_date: impl Into<String>) -> Self {
        self.expires = Some(http_date.into());
        self
    }

    /// Sets the `Max-Age` attribute, in seconds.
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Sets the `Secure` flag.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the `HttpOnly` flag.
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Sets the `SameSite` attribute.
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Appends a bare extension attribute (no `=value`, or one whose value isn't otherwise
    /// modeled), serialized verbatim.
    pub fn extension(mut self, attr: impl Into<String>) -> Self {
        self.extension.push(attr.into());
        self
    }

    /// The cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={}", domain));
        }
        if let Some(expires) = &self.expires {
            out.push_str(&format!("; Expires={}", expires));
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str(&format!("; SameSite={}", same_site));
        }
        for attr in &self.extension {
            out.push_str("; ");
            out.push_str(attr);
        }
        out
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

/// Parses a `Cookie` request header's value (`"a=b; c=d"`) into name/value pairs, in the order
/// they were sent. Malformed pairs (no `=`, empty name) are skipped rather than failing the whole
/// header, matching real browsers' lenient behavior.
pub fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_cookies_from_one_header() {
        let pairs = parse_cookie_header("session=abc123; theme=dark");
        assert_eq!(
            vec![
                ("session".to_string(), "abc123".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ],
            pairs
        );
    }

    #[test]
    fn skips_malformed_pairs() {
        let pairs = parse_cookie_header("valid=1; ;=nope; also=2");
        assert_eq!(
            vec![
                ("valid".to_string(), "1".to_string()),
                ("also".to_string(), "2".to_string()),
            ],
            pairs
        );
    }

    #[test]
    fn renders_set_cookie_with_attributes() {
        let cookie = Cookie::new("session", "abc123")
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Lax);
        assert_eq!(
            "session=abc123; Path=/; Secure; HttpOnly; SameSite=Lax",
            cookie.to_header_value()
        );
    }

    #[test]
    fn expired_cookie_sets_max_age_negative_one() {
        assert_eq!("deleted=; Max-Age=-1", Cookie::expired("deleted").to_header_value());
    }
}
