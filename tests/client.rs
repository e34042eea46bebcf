//! Request correlation over a live connection.

mod common;

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::time::timeout;
use wallet_socket::{
    ConnectionState, CorrelationId, RequestError, SocketClient, SocketPath, SocketRequest,
};

use common::{MockServer, Mode, init_tracing, wait_until};

const STEP: Duration = Duration::from_secs(5);

struct GetBalance(&'static str);

impl SocketPath for GetBalance {
    type Output = Value;

    fn method(&self) -> &str {
        "eth_getBalance"
    }

    fn params(&self) -> Value {
        json!([self.0, "latest"])
    }
}

struct NewHeads;

impl SocketPath for NewHeads {
    type Output = u64;

    fn method(&self) -> &str {
        "eth_subscribe"
    }

    fn params(&self) -> Value {
        json!(["newHeads"])
    }
}

#[tokio::test]
async fn test_string_id_round_trip_ignores_duplicate_response() {
    init_tracing();
    let server = MockServer::plain(vec![Mode::RpcDouble]).await;
    let client = SocketClient::builder(server.url()).build_client().expect("valid");

    let request = SocketRequest::rpc("42", "eth_chainId", json!([])).expect("request");
    let response = timeout(STEP, client.send(request))
        .await
        .expect("in time")
        .expect("response");

    assert_eq!(response.id(), Some(CorrelationId::from("42")));
    assert_eq!(
        response.result::<Value>().expect("result"),
        json!({"method": "eth_chainId", "params": []})
    );

    // The second copy of the response is dropped; the ID is free again
    let again = SocketRequest::rpc("42", "eth_chainId", json!([])).expect("request");
    assert!(timeout(STEP, client.send(again)).await.expect("in time").is_ok());

    client.disconnect();
}

#[tokio::test]
async fn test_typed_call() -> anyhow::Result<()> {
    let server = MockServer::plain(vec![Mode::Rpc]).await;
    let client = SocketClient::builder(server.url()).build_client()?;

    let result = timeout(STEP, client.call(&GetBalance("0xabc"))).await??;
    assert_eq!(result["method"], "eth_getBalance");
    assert_eq!(result["params"], json!(["0xabc", "latest"]));

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn test_subscription_receives_ack_then_notifications() {
    let server = MockServer::plain(vec![Mode::Rpc]).await;
    let client = SocketClient::builder(server.url()).build_client().expect("valid");

    let request = client
        .rpc("eth_subscribe", json!(["newHeads"]))
        .expect("request")
        .subscribing();
    let id = request.id().clone();
    let mut subscription = client.subscribe(request).await.expect("subscribed");

    let ack = timeout(STEP, subscription.recv()).await.expect("in time");
    let ack = ack.expect("open").expect("ack");
    assert_eq!(ack.id(), Some(id));

    for n in 1..=2u64 {
        let frame = timeout(STEP, subscription.recv())
            .await
            .expect("in time")
            .expect("open")
            .expect("notification");
        assert_eq!(frame.result::<u64>().expect("decode"), n);
    }

    client.disconnect();
}

#[tokio::test]
async fn test_typed_subscription_skips_ack() {
    let server = MockServer::plain(vec![Mode::Rpc]).await;
    let client = SocketClient::builder(server.url()).build_client().expect("valid");

    let mut heads = client.watch(&NewHeads).await.expect("subscribed");
    let first = timeout(STEP, heads.next()).await.expect("in time");
    let second = timeout(STEP, heads.next()).await.expect("in time");

    assert_eq!(first.map(|head| head.expect("decode")), Some(1));
    assert_eq!(second.map(|head| head.expect("decode")), Some(2));

    client.disconnect();
}

#[tokio::test]
async fn test_queued_sends_flush_in_order() -> anyhow::Result<()> {
    let server = MockServer::plain(vec![Mode::Rpc]).await;
    let client = SocketClient::builder(server.url()).build_client()?;

    let mut expected = Vec::new();
    for n in 0..20 {
        let request = client.rpc("wallet_note", json!([n]))?;
        expected.push(request.payload().to_string());
        client.send_and_forget(request).await?;
    }

    let received = server.wait_for_received(expected.len()).await;
    assert_eq!(received, expected);

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn test_forced_reconnect_fails_requests_and_signals_subscriptions() {
    init_tracing();
    let server = MockServer::plain(vec![Mode::Silent, Mode::Rpc]).await;
    let client = SocketClient::builder(server.url())
        .ping_interval(Some(Duration::from_millis(100)))
        .reconnect_delay(Some(Duration::from_millis(100)))
        .request_timeout(Duration::from_secs(10))
        .build_client()
        .expect("valid");

    let request = client
        .rpc("eth_subscribe", json!(["newHeads"]))
        .expect("request")
        .subscribing();
    let mut subscription = client.subscribe(request).await.expect("subscribed");

    wait_until(|| client.state() == ConnectionState::Connected).await;
    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            let request = client.rpc("eth_blockNumber", json!([])).expect("request");
            client.send(request).await
        }
    });

    let err = timeout(STEP, pending)
        .await
        .expect("in time")
        .expect("join")
        .expect_err("connection lost");
    assert!(err.is_connection_error());

    let signal = timeout(STEP, subscription.recv()).await.expect("in time");
    assert_eq!(
        signal.map(|reply| reply.map(|_| ())),
        Some(Err(RequestError::Connected))
    );

    server.wait_for_handshakes(2).await;
    wait_until(|| client.state() == ConnectionState::Connected).await;

    let request = client.rpc("eth_blockNumber", json!([])).expect("request");
    assert!(timeout(STEP, client.send(request)).await.expect("in time").is_ok());

    // Exactly one resubscribe signal per reconnect
    assert!(subscription.try_recv().is_none());

    client.disconnect();
}

#[tokio::test]
async fn test_disconnect_fails_pending_subscription() {
    let server = MockServer::plain(vec![Mode::Silent]).await;
    let client = SocketClient::builder(server.url()).build_client().expect("valid");

    let request = client
        .rpc("eth_subscribe", json!(["newHeads"]))
        .expect("request")
        .subscribing();
    let mut subscription = client.subscribe(request).await.expect("subscribed");
    server.wait_for_handshakes(1).await;
    wait_until(|| client.state() == ConnectionState::Connected).await;

    client.disconnect();
    let reply = timeout(STEP, subscription.recv()).await.expect("in time");
    assert_eq!(
        reply.map(|reply| reply.map(|_| ())),
        Some(Err(RequestError::NoConnection))
    );
}
