//! Connection configuration.
//!
//! [`Configuration`] is an immutable value handed to the transport at
//! construction. Defaults match a mobile wallet talking to a public node:
//!
//! | Setting | Default |
//! |---------|---------|
//! | `tls` | pinned to the endpoint host, self-signed rejected |
//! | `reconnect_delay` | 3s |
//! | `auto_reply_ping` | `true` |
//! | `ping_interval` | 10s |
//! | `connect_timeout` | 5s |
//! | `request_timeout` | 30s |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wallet_socket::{Configuration, TlsPolicy};
//!
//! let configuration = Configuration::new()
//!     .with_tls(TlsPolicy::Unpinned)
//!     .with_reconnect_delay(Some(Duration::from_secs(1)))
//!     .with_ping_interval(None);
//!
//! assert!(configuration.ping_interval.is_none());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustls::pki_types::CertificateDer;

use super::endpoint::Endpoint;

// ============================================================================
// Constants
// ============================================================================

/// Default delay between connectivity probe attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default keepalive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout for TCP connect plus TLS and WebSocket handshakes.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for one-shot requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// TlsPolicy
// ============================================================================

/// How the server certificate is evaluated.
///
/// Only consulted for `wss://` endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// No TLS. Invalid for `wss://` endpoints.
    Disabled,

    /// Standard chain evaluation against the endpoint host.
    Unpinned,

    /// Chain evaluation constrained to a fixed domain.
    Pinned {
        /// Domain the chain must be valid for. `None` uses the endpoint host.
        domain: Option<String>,
        /// Accept any certificate. Insecure, for development only.
        allow_self_signed: bool,
    },
}

impl TlsPolicy {
    /// Pinned to the endpoint host, self-signed rejected.
    #[inline]
    #[must_use]
    pub const fn pinned() -> Self {
        Self::Pinned {
            domain: None,
            allow_self_signed: false,
        }
    }

    /// Pinned to an explicit domain.
    #[inline]
    #[must_use]
    pub fn pinned_to(domain: impl Into<String>) -> Self {
        Self::Pinned {
            domain: Some(domain.into()),
            allow_self_signed: false,
        }
    }

    /// Pinned mode that accepts self-signed certificates.
    #[inline]
    #[must_use]
    pub const fn self_signed() -> Self {
        Self::Pinned {
            domain: None,
            allow_self_signed: true,
        }
    }

    /// Returns `true` unless TLS is disabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self::pinned()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Immutable transport configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Certificate evaluation policy for `wss://`.
    pub tls: TlsPolicy,

    /// Delay between connectivity retries. `None` fails on the first miss.
    pub reconnect_delay: Option<Duration>,

    /// Answer peer pings in the transport without surfacing them.
    pub auto_reply_ping: bool,

    /// Keepalive ping interval. `None` disables keepalive.
    pub ping_interval: Option<Duration>,

    /// Bound on TCP connect plus TLS and upgrade handshakes.
    pub connect_timeout: Duration,

    /// Bound on one-shot request round trips.
    pub request_timeout: Duration,

    /// Extra HTTP headers on the upgrade request.
    pub headers: Vec<(String, String)>,

    /// Additional trust anchors, in DER form.
    pub extra_roots: Vec<CertificateDer<'static>>,
}

// ============================================================================
// Constructors
// ============================================================================

impl Configuration {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tls: TlsPolicy::pinned(),
            reconnect_delay: Some(DEFAULT_RECONNECT_DELAY),
            auto_reply_ping: true,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            headers: Vec::new(),
            extra_roots: Vec::new(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Configuration {
    /// Sets the TLS policy.
    #[inline]
    #[must_use]
    pub fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the connectivity retry delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Enables or disables automatic pong replies.
    #[inline]
    #[must_use]
    pub fn with_auto_reply_ping(mut self, enabled: bool) -> Self {
        self.auto_reply_ping = enabled;
        self
    }

    /// Sets the keepalive ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the one-shot request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Adds a header to the upgrade request.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a trust anchor.
    #[inline]
    #[must_use]
    pub fn with_root(mut self, certificate: CertificateDer<'static>) -> Self {
        self.extra_roots.push(certificate);
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl Configuration {
    /// Returns the TLS policy that actually applies to `endpoint`.
    ///
    /// `ws://` endpoints never use TLS, whatever the configured policy.
    #[must_use]
    pub fn effective_tls(&self, endpoint: &Endpoint) -> TlsPolicy {
        if endpoint.is_secure() {
            self.tls.clone()
        } else {
            TlsPolicy::Disabled
        }
    }

    /// Validates the configuration against an endpoint.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self, endpoint: &Endpoint) -> Result<(), String> {
        if endpoint.is_secure() && !self.tls.is_enabled() {
            return Err("wss endpoint requires TLS, but TLS policy is Disabled".to_string());
        }

        if let Some(interval) = self.ping_interval
            && interval.is_zero()
        {
            return Err("Ping interval must be greater than zero".to_string());
        }

        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be greater than zero".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout must be greater than zero".to_string());
        }

        if let TlsPolicy::Pinned {
            domain: Some(domain),
            ..
        } = &self.tls
            && domain.is_empty()
        {
            return Err("Pinned domain must not be empty".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
