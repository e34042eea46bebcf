//! Dialing and failure classification.
//!
//! The crate dials its own TCP stream (and TLS on top for `wss`) so that the
//! verification policy is applied per connection, then runs the WebSocket
//! upgrade over it with `client_async`.
//!
//! Every dial or stream error maps to one [`Failure`] class, which drives the
//! transport's retry policy:
//!
//! | Class | Examples | Transport reaction |
//! |-------|----------|--------------------|
//! | `Unreachable` | refused, timed out, network down, DNS | probe and retry |
//! | `Reset` | reset, aborted, EOF without close frame | terminal `Disconnected` |
//! | `Tls` | certificate rejected | `Error(Tls)`, then probe |
//! | `Fatal` | upgrade rejected, protocol violation | `Error`, terminal |

// ============================================================================
// Imports
// ============================================================================

use std::io::{self, ErrorKind};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async};
use tracing::{debug, trace};

use crate::config::Endpoint;
use crate::error::{Error, Result};

use super::tls::{TrustVerifier, tls_failure};

// ============================================================================
// Types
// ============================================================================

/// Stream type produced by a successful dial.
pub(crate) type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Failure
// ============================================================================

/// Retry class of a dial or stream error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Network path unavailable; wait for connectivity and retry.
    Unreachable,
    /// Established connection torn down by the peer or the network.
    Reset,
    /// TLS handshake rejected.
    Tls,
    /// Anything else.
    Fatal,
}

impl Failure {
    /// Classifies a crate error.
    #[must_use]
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Tls { .. } => Self::Tls,
            Error::Io(io) => Self::classify_io(io),
            Error::ConnectionClosed => Self::Reset,
            Error::WebSocket(ws) => Self::classify_ws(ws),
            _ => Self::Fatal,
        }
    }

    fn classify_ws(err: &WsError) -> Self {
        match err {
            WsError::Io(io) => Self::classify_io(io),
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Reset,
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => Self::Reset,
            _ => Self::Fatal,
        }
    }

    fn classify_io(err: &io::Error) -> Self {
        if tls_failure(err).is_some() {
            return Self::Tls;
        }

        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::Reset,
            // Refused, timed out, not connected, network down and resolver
            // failures all mean the path is not usable yet
            _ => Self::Unreachable,
        }
    }
}

// ============================================================================
// Dialing
// ============================================================================

/// Opens TCP, and TLS when enabled, to `endpoint` within `connect_timeout`.
///
/// This is the whole of "reachable" for the connectivity probe.
pub(crate) async fn open_stream(
    endpoint: &Endpoint,
    trust: &TrustVerifier,
    connect_timeout: Duration,
) -> Result<MaybeTlsStream<TcpStream>> {
    timeout(connect_timeout, open_stream_inner(endpoint, trust))
        .await
        .map_err(|_| {
            Error::Io(io::Error::new(
                ErrorKind::TimedOut,
                format!("connect timed out after {}ms", connect_timeout.as_millis()),
            ))
        })?
}

async fn open_stream_inner(
    endpoint: &Endpoint,
    trust: &TrustVerifier,
) -> Result<MaybeTlsStream<TcpStream>> {
    let tcp = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
    tcp.set_nodelay(true)?;
    trace!(%endpoint, "TCP connected");

    let Some((connector, server_name)) = trust.connector() else {
        return Ok(MaybeTlsStream::Plain(tcp));
    };

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| match tls_failure(&e).map(ToString::to_string) {
            Some(message) => Error::tls(message),
            None => Error::Io(e),
        })?;
    trace!(%endpoint, "TLS established");

    Ok(MaybeTlsStream::Rustls(stream))
}

/// Dials `endpoint` and completes the WebSocket upgrade.
pub(crate) async fn dial(
    endpoint: &Endpoint,
    trust: &TrustVerifier,
    headers: &[(String, String)],
    connect_timeout: Duration,
) -> Result<SocketStream> {
    let request = handshake_request(endpoint, headers)?;

    let upgrade = async {
        let stream = open_stream_inner(endpoint, trust).await?;
        let (socket, response) = client_async(request, stream).await?;
        debug!(%endpoint, status = %response.status(), "WebSocket upgraded");
        Ok::<_, Error>(socket)
    };

    timeout(connect_timeout, upgrade).await.map_err(|_| {
        Error::Io(io::Error::new(
            ErrorKind::TimedOut,
            format!("handshake timed out after {}ms", connect_timeout.as_millis()),
        ))
    })?
}

/// Builds the upgrade request with extra headers.
///
/// # Errors
///
/// Returns [`Error::Config`] for an invalid header name or value.
pub(crate) fn handshake_request(endpoint: &Endpoint, headers: &[(String, String)]) -> Result<Request> {
    let mut request = endpoint.url().as_str().into_client_request()?;

    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("invalid value for header '{name}': {e}")))?;
        request.headers_mut().append(header_name, header_value);
    }

    Ok(request)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::TlsPolicy;

    fn io_error(kind: ErrorKind) -> Error {
        Error::Io(io::Error::new(kind, "test"))
    }

    #[test]
    fn test_unreachable_kinds() {
        for kind in [
            ErrorKind::ConnectionRefused,
            ErrorKind::TimedOut,
            ErrorKind::NotConnected,
            ErrorKind::NetworkDown,
            ErrorKind::NetworkUnreachable,
            ErrorKind::HostUnreachable,
        ] {
            assert_eq!(Failure::classify(&io_error(kind)), Failure::Unreachable, "{kind:?}");
        }
    }

    #[test]
    fn test_reset_kinds() {
        assert_eq!(Failure::classify(&io_error(ErrorKind::ConnectionReset)), Failure::Reset);
        assert_eq!(Failure::classify(&io_error(ErrorKind::ConnectionAborted)), Failure::Reset);
        assert_eq!(Failure::classify(&Error::ConnectionClosed), Failure::Reset);
        assert_eq!(
            Failure::classify(&Error::WebSocket(WsError::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            ))),
            Failure::Reset
        );
    }

    #[test]
    fn test_tls_classification() {
        assert_eq!(Failure::classify(&Error::tls("bad")), Failure::Tls);

        let wrapped = io::Error::new(
            ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert_eq!(Failure::classify(&Error::WebSocket(WsError::Io(wrapped))), Failure::Tls);
    }

    #[test]
    fn test_fatal_classification() {
        assert_eq!(Failure::classify(&Error::config("x")), Failure::Fatal);
        assert_eq!(
            Failure::classify(&Error::WebSocket(WsError::AttackAttempt)),
            Failure::Fatal
        );
    }

    #[test]
    fn test_handshake_request_headers() {
        let endpoint = Endpoint::parse("ws://localhost:8546/ws").expect("valid");
        let request = handshake_request(
            &endpoint,
            &[("X-Api-Key".to_string(), "secret".to_string())],
        )
        .expect("valid request");

        assert_eq!(request.uri().path(), "/ws");
        assert_eq!(
            request.headers().get("x-api-key").map(|v| v.as_bytes()),
            Some(&b"secret"[..])
        );
    }

    #[test]
    fn test_handshake_request_rejects_bad_value() {
        let endpoint = Endpoint::parse("ws://localhost").expect("valid");
        let err = handshake_request(&endpoint, &[("X".to_string(), "a\nb".to_string())]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_refused_dial_is_unreachable() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let endpoint = Endpoint::parse(&format!("ws://127.0.0.1:{port}")).expect("valid");
        let trust = TrustVerifier::new(&TlsPolicy::Disabled, endpoint.host(), &[]).expect("trust");

        let err = dial(&endpoint, &trust, &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(Failure::classify(&err), Failure::Unreachable);
    }
}
