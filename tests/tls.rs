//! TLS trust policies against a self-signed local server.

mod common;

use std::time::Duration;

use tokio::time::timeout;
use wallet_socket::{
    CloseCode, ConnectivityError, ConnectivityProbe, Endpoint, Event, EventStream, TlsPolicy,
    TransportError, TrustVerifier, WebSocket,
};

use common::{MockServer, Mode, init_tracing};

const STEP: Duration = Duration::from_secs(5);

async fn next(events: &mut EventStream) -> Option<Event> {
    timeout(STEP, events.recv()).await.expect("event in time")
}

async fn assert_connects(socket: WebSocket) {
    let mut events = socket.connect();
    assert_eq!(next(&mut events).await, Some(Event::Connected));

    socket.send_text("over tls").await.expect("written");
    assert_eq!(next(&mut events).await, Some(Event::Text("over tls".into())));

    socket.disconnect(CloseCode::Normal);
    assert_eq!(next(&mut events).await, Some(Event::Disconnected));
}

async fn assert_rejected(socket: WebSocket) {
    let mut events = socket.connect();

    assert!(matches!(
        next(&mut events).await,
        Some(Event::Error(TransportError::Tls { .. }))
    ));
    assert_eq!(
        next(&mut events).await,
        Some(Event::ConnectionError(ConnectivityError::Tls))
    );
    assert_eq!(next(&mut events).await, Some(Event::Disconnected));
}

#[tokio::test]
async fn test_pinned_rejects_unknown_issuer() {
    init_tracing();
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let socket = WebSocket::builder(server.url())
        .tls(TlsPolicy::pinned())
        .reconnect_delay(Some(Duration::from_millis(100)))
        .build()
        .expect("valid");

    assert_rejected(socket).await;
    assert_eq!(server.handshakes(), 0);
}

#[tokio::test]
async fn test_pinned_accepts_trusted_anchor() {
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let certificate = server.certificate.clone().expect("tls server");
    let socket = WebSocket::builder(server.url())
        .tls(TlsPolicy::pinned())
        .root_certificate(certificate)
        .build()
        .expect("valid");

    assert_connects(socket).await;
}

#[tokio::test]
async fn test_pinned_domain_mismatch_rejected() {
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let certificate = server.certificate.clone().expect("tls server");
    let socket = WebSocket::builder(server.url())
        .tls(TlsPolicy::pinned_to("wallet.example.com"))
        .root_certificate(certificate)
        .build()
        .expect("valid");

    assert_rejected(socket).await;
}

#[tokio::test]
async fn test_self_signed_policy_connects() {
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let socket = WebSocket::builder(server.url())
        .tls(TlsPolicy::self_signed())
        .build()
        .expect("valid");

    assert_connects(socket).await;
}

#[tokio::test]
async fn test_unpinned_with_extra_root_connects() {
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let certificate = server.certificate.clone().expect("tls server");
    let socket = WebSocket::builder(server.url())
        .tls(TlsPolicy::Unpinned)
        .root_certificate(certificate)
        .build()
        .expect("valid");

    assert_connects(socket).await;
}

#[tokio::test]
async fn test_probe_reports_tls_rejection_without_retry() {
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let endpoint = Endpoint::parse(&server.url()).expect("valid");
    let trust = TrustVerifier::new(&TlsPolicy::pinned(), endpoint.host(), &[]).expect("trust");
    let probe = ConnectivityProbe::new(
        endpoint,
        trust,
        Some(Duration::from_millis(50)),
        Duration::from_secs(1),
    );

    let outcome = timeout(STEP, probe.wait_for_connectivity())
        .await
        .expect("in time");
    assert_eq!(outcome, Err(ConnectivityError::Tls));
}

#[tokio::test]
async fn test_probe_succeeds_with_self_signed_policy() {
    let server = MockServer::tls(vec![Mode::Echo]).await;
    let endpoint = Endpoint::parse(&server.url()).expect("valid");
    let trust =
        TrustVerifier::new(&TlsPolicy::self_signed(), endpoint.host(), &[]).expect("trust");
    let probe = ConnectivityProbe::new(endpoint, trust, None, Duration::from_secs(1));

    let outcome = timeout(STEP, probe.wait_for_connectivity())
        .await
        .expect("in time");
    assert_eq!(outcome, Ok(()));
    assert_eq!(server.handshakes(), 0);
}
