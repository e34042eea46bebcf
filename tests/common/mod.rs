//! Local mock WebSocket server for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rcgen::CertifiedKey;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

// ============================================================================
// Mode
// ============================================================================

/// How the server treats one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Answers JSON-RPC requests; `eth_subscribe` gets an ack and two
    /// notifications.
    Rpc,
    /// Like `Rpc` but every one-shot response is sent twice.
    RpcDouble,
    /// Echoes text frames.
    Echo,
    /// Completes the handshake, then never reads (so pings go unanswered).
    Silent,
}

// ============================================================================
// MockServer
// ============================================================================

#[derive(Default)]
pub struct ServerState {
    handshakes: AtomicUsize,
    received: Mutex<Vec<String>>,
    headers: Mutex<Vec<(String, String)>>,
    modes: Vec<Mode>,
}

pub struct MockServer {
    pub port: u16,
    pub certificate: Option<CertificateDer<'static>>,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Plain `ws` server. Connection `n` uses `modes[n]`, the last mode
    /// repeating.
    pub async fn plain(modes: Vec<Mode>) -> Self {
        Self::start(modes, None).await
    }

    /// `wss` server with a self-signed certificate for `localhost`.
    pub async fn tls(modes: Vec<Mode>) -> Self {
        let CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                .expect("certificate");
        let certificate = cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![certificate.clone()], key)
        .expect("server config");

        let mut server = Self::start(modes, Some(TlsAcceptor::from(Arc::new(config)))).await;
        server.certificate = Some(certificate);
        server
    }

    async fn start(modes: Vec<Mode>, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let state = Arc::new(ServerState {
            modes,
            ..ServerState::default()
        });

        let task = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let state = Arc::clone(&state);
                    let acceptor = acceptor.clone();

                    tokio::spawn(async move {
                        match acceptor {
                            Some(acceptor) => {
                                if let Ok(tls) = acceptor.accept(tcp).await {
                                    serve(tls, state).await;
                                }
                            }
                            None => serve(tcp, state).await,
                        }
                    });
                }
            }
        });

        Self {
            port,
            certificate: None,
            state,
            task,
        }
    }

    pub fn url(&self) -> String {
        match self.certificate {
            Some(_) => format!("wss://localhost:{}", self.port),
            None => format!("ws://127.0.0.1:{}", self.port),
        }
    }

    /// Completed WebSocket handshakes. Bare TCP probes are not counted.
    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .headers
            .lock()
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    /// Waits until at least `count` text frames arrived.
    pub async fn wait_for_received(&self, count: usize) -> Vec<String> {
        wait_until(|| self.state.received.lock().len() >= count).await;
        self.received()
    }

    /// Waits until at least `count` handshakes completed.
    pub async fn wait_for_handshakes(&self, count: usize) {
        wait_until(|| self.handshakes() >= count).await;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(stream: S, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let headers = Arc::clone(&state);
    let callback = move |request: &Request, response: Response| {
        let mut captured = headers.headers.lock();
        for (name, value) in request.headers() {
            captured.push((
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            ));
        }
        Ok::<_, ErrorResponse>(response)
    };

    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let index = state.handshakes.fetch_add(1, Ordering::SeqCst);
    let mode = state
        .modes
        .get(index)
        .or(state.modes.last())
        .copied()
        .unwrap_or(Mode::Echo);

    if mode == Mode::Silent {
        let _held = ws;
        std::future::pending::<()>().await;
        return;
    }

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        state.received.lock().push(text.to_string());
        for reply in respond(mode, text.as_str()) {
            if ws.send(Message::Text(reply.into())).await.is_err() {
                return;
            }
        }
    }
}

fn respond(mode: Mode, text: &str) -> Vec<String> {
    if mode == Mode::Echo {
        return vec![text.to_string()];
    }

    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let Some(id) = value.get("id").cloned() else {
        return Vec::new();
    };
    let method = value["method"].as_str().unwrap_or_default();

    if method == "eth_subscribe" {
        let subscription = match &id {
            Value::String(text) => format!("0xsub{text}"),
            other => format!("0xsub{other}"),
        };
        return vec![
            json!({"jsonrpc": "2.0", "id": id, "result": subscription}).to_string(),
            notification(&subscription, 1),
            notification(&subscription, 2),
        ];
    }

    let reply = json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"method": method, "params": value["params"]},
    })
    .to_string();

    if mode == Mode::RpcDouble {
        vec![reply.clone(), reply]
    } else {
        vec![reply]
    }
}

pub fn notification(subscription: &str, n: u64) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": subscription, "result": n},
    })
    .to_string()
}

// ============================================================================
// Helpers
// ============================================================================

/// Polls `condition` every 10ms for up to 5s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Port with nothing listening.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
