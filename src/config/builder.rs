//! Builder pattern for transport configuration.
//!
//! Provides a fluent API for configuring and creating [`WebSocket`] and
//! [`SocketClient`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use wallet_socket::{TlsPolicy, WebSocket};
//!
//! # fn example() -> wallet_socket::Result<()> {
//! let socket = WebSocket::builder("wss://node.example.com/ws")
//!     .tls(TlsPolicy::pinned_to("example.com"))
//!     .ping_interval(Some(Duration::from_secs(15)))
//!     .header("Origin", "https://wallet.example.com")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustls::pki_types::CertificateDer;

use crate::client::SocketClient;
use crate::error::{Error, Result};
use crate::transport::WebSocket;
use crate::transport::dial::handshake_request;
use crate::transport::tls::TrustVerifier;

use super::endpoint::Endpoint;
use super::options::{Configuration, TlsPolicy};

// ============================================================================
// WebSocketBuilder
// ============================================================================

/// Builder for a [`WebSocket`] or a [`SocketClient`].
///
/// Use [`WebSocket::builder()`] or [`SocketClient::builder()`] to create one.
#[derive(Debug, Clone)]
pub struct WebSocketBuilder {
    /// Endpoint URL, parsed on build.
    url: String,
    /// Configuration under construction.
    configuration: Configuration,
}

// ============================================================================
// WebSocketBuilder Implementation
// ============================================================================

impl WebSocketBuilder {
    /// Creates a builder for `url` with default configuration.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            configuration: Configuration::new(),
        }
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Sets the TLS policy.
    #[inline]
    #[must_use]
    pub fn tls(mut self, tls: TlsPolicy) -> Self {
        self.configuration.tls = tls;
        self
    }

    /// Sets the connectivity retry delay. `None` disables retries.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.configuration.reconnect_delay = delay;
        self
    }

    /// Enables or disables automatic pong replies.
    #[inline]
    #[must_use]
    pub fn auto_reply_ping(mut self, enabled: bool) -> Self {
        self.configuration.auto_reply_ping = enabled;
        self
    }

    /// Sets the keepalive interval. `None` disables keepalive.
    #[inline]
    #[must_use]
    pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.configuration.ping_interval = interval;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.connect_timeout = timeout;
        self
    }

    /// Sets the one-shot request timeout used by [`SocketClient`].
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.request_timeout = timeout;
        self
    }

    /// Adds a header to the upgrade request.
    ///
    /// # Arguments
    ///
    /// * `name` - Header name (e.g., "Authorization")
    /// * `value` - Header value
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a trust anchor in DER form.
    #[inline]
    #[must_use]
    pub fn root_certificate(mut self, certificate: CertificateDer<'static>) -> Self {
        self.configuration.extra_roots.push(certificate);
        self
    }

    /// Builds the transport with validation.
    ///
    /// Does not connect. Call [`WebSocket::connect`] to start.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the URL is not a valid `ws`/`wss` URL
    /// - [`Error::Config`] if the configuration is inconsistent
    /// - [`Error::Tls`] if trust anchors or the pinned domain are invalid
    pub fn build(self) -> Result<WebSocket> {
        let (endpoint, trust) = self.validate()?;
        Ok(WebSocket::new(endpoint, self.configuration, trust))
    }

    /// Builds a [`SocketClient`] over a new transport.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_client(self) -> Result<SocketClient> {
        let socket = self.build()?;
        Ok(SocketClient::new(socket))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl WebSocketBuilder {
    /// Validates URL, configuration and headers, and prepares TLS.
    fn validate(&self) -> Result<(Endpoint, TrustVerifier)> {
        let endpoint = Endpoint::parse(&self.url)?;

        self.configuration.validate(&endpoint).map_err(Error::config)?;

        // Header names and values are checked once here so dialing cannot fail on them
        handshake_request(&endpoint, &self.configuration.headers)?;

        let trust = TrustVerifier::new(
            &self.configuration.effective_tls(&endpoint),
            endpoint.host(),
            &self.configuration.extra_roots,
        )?;

        Ok((endpoint, trust))
    }
}

// ============================================================================
// Tests
// ============================================================================
