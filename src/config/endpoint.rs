//! Immutable WebSocket endpoint.
//!
//! An [`Endpoint`] is parsed once from a URL string and never changes
//! afterwards. Only `ws` and `wss` schemes are accepted.
//!
//! # Example
//!
//! ```
//! use wallet_socket::Endpoint;
//!
//! let endpoint = Endpoint::parse("wss://node.example.com/ws?key=1").unwrap();
//! assert!(endpoint.is_secure());
//! assert_eq!(endpoint.host(), "node.example.com");
//! assert_eq!(endpoint.port(), 443);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use url::{Host, Url};

use crate::error::{Error, Result};

// ============================================================================
// Scheme
// ============================================================================

/// WebSocket URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain `ws://`.
    Ws,
    /// TLS `wss://`.
    Wss,
}

impl Scheme {
    /// Returns the scheme as written in a URL.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A parsed `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full URL, used for the upgrade request.
    url: Url,
    /// Parsed scheme.
    scheme: Scheme,
    /// Host without IPv6 brackets, used for dialing and SNI.
    host: String,
    /// Explicit port or the scheme default.
    port: u16,
}

impl Endpoint {
    /// Parses an endpoint from a URL string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the URL does not parse, the scheme is
    /// not `ws`/`wss`, or the URL has no host.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::invalid_url(input, e.to_string()))?;

        let scheme = match url.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => {
                return Err(Error::invalid_url(
                    input,
                    format!("unsupported scheme '{other}', expected ws or wss"),
                ));
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::invalid_url(input, "missing host")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_url(input, "missing port"))?;

        Ok(Self {
            url,
            scheme,
            host,
            port,
        })
    }

    /// Returns the full URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the scheme.
    #[inline]
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the host, without brackets for IPv6 literals.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the path component.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Returns `true` for `wss://` endpoints.
    #[inline]
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self.scheme, Scheme::Wss)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wss_default_port() {
        let endpoint = Endpoint::parse("wss://node.example.com/v3/abc").expect("valid");
        assert_eq!(endpoint.scheme(), Scheme::Wss);
        assert_eq!(endpoint.host(), "node.example.com");
        assert_eq!(endpoint.port(), 443);
        assert_eq!(endpoint.path(), "/v3/abc");
        assert!(endpoint.is_secure());
    }

    #[test]
    fn test_parse_ws_explicit_port() {
        let endpoint = Endpoint::parse("ws://127.0.0.1:8546").expect("valid");
        assert_eq!(endpoint.scheme(), Scheme::Ws);
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 8546);
        assert!(!endpoint.is_secure());
    }

    #[test]
    fn test_parse_ipv6_strips_brackets() {
        let endpoint = Endpoint::parse("ws://[::1]:9000/").expect("valid");
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.port(), 9000);
    }

    #[test]
    fn test_rejects_http_scheme() {
        let err = Endpoint::parse("https://example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_display_is_url() {
        let endpoint = Endpoint::parse("wss://example.com/ws").expect("valid");
        assert_eq!(endpoint.to_string(), "wss://example.com/ws");
    }
}
