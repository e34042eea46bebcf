//! Request and Response message types.
//!
//! Requests are opaque JSON text with an `id` member; the engine only needs
//! the ID to correlate. [`SocketRequest::rpc`] builds JSON-RPC 2.0 requests
//! for the common case.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, RequestError, Result};
use crate::identifiers::{CorrelationId, PublisherId};

use super::envelope::{Envelope, request_id};

// ============================================================================
// SocketRequest
// ============================================================================

/// An outbound request.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": 1,
///   "method": "eth_subscribe",
///   "params": ["newHeads"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRequest {
    id: CorrelationId,
    payload: String,
    subscription: bool,
    publisher: Option<PublisherId>,
}

#[derive(Serialize)]
struct RpcEnvelope<'a> {
    jsonrpc: &'static str,
    id: &'a CorrelationId,
    method: &'a str,
    params: &'a Value,
}

impl SocketRequest {
    /// Builds a JSON-RPC 2.0 request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `params` cannot be serialized.
    pub fn rpc(id: impl Into<CorrelationId>, method: &str, params: Value) -> Result<Self> {
        let id = id.into();
        let payload = serde_json::to_string(&RpcEnvelope {
            jsonrpc: "2.0",
            id: &id,
            method,
            params: &params,
        })?;

        Ok(Self {
            id,
            payload,
            subscription: false,
            publisher: None,
        })
    }

    /// Wraps an already-encoded payload, reading its `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::BadFormat`] if the payload has no usable `id`.
    pub fn from_payload(payload: impl Into<String>) -> std::result::Result<Self, RequestError> {
        let payload = payload.into();
        let id = request_id(&payload)?;

        Ok(Self {
            id,
            payload,
            subscription: false,
            publisher: None,
        })
    }

    /// Marks the request as a subscription.
    #[inline]
    #[must_use]
    pub fn subscribing(mut self) -> Self {
        self.subscription = true;
        self
    }

    /// Routes the subscription's frames into a shared publisher stream.
    #[inline]
    #[must_use]
    pub fn with_publisher(mut self, publisher: impl Into<PublisherId>) -> Self {
        self.subscription = true;
        self.publisher = Some(publisher.into());
        self
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Returns the encoded payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns `true` for subscriptions.
    #[inline]
    #[must_use]
    pub fn is_subscription(&self) -> bool {
        self.subscription
    }

    /// Returns the shared publisher, if any.
    #[inline]
    #[must_use]
    pub fn publisher(&self) -> Option<&PublisherId> {
        self.publisher.as_ref()
    }

    pub(crate) fn into_parts(self) -> (CorrelationId, String, bool, Option<PublisherId>) {
        (self.id, self.payload, self.subscription, self.publisher)
    }
}

// ============================================================================
// Response
// ============================================================================

/// An inbound frame delivered to a caller.
///
/// Keeps the original text alongside the parsed value so callers can feed
/// either to their own decoding pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    text: String,
    value: Value,
}

impl Response {
    pub(crate) fn new(text: String, value: Value) -> Self {
        Self { text, value }
    }

    /// Parses a frame.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::BadFormat`] if `text` is not a JSON object.
    pub fn parse(text: impl Into<String>) -> std::result::Result<Self, RequestError> {
        let text = text.into();
        let envelope = Envelope::parse(&text)?;
        Ok(Self::new(text, envelope.value))
    }

    /// Raw frame text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Parsed frame.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Correlation ID of the frame, if any.
    #[must_use]
    pub fn id(&self) -> Option<CorrelationId> {
        self.value.get("id").and_then(CorrelationId::from_value)
    }

    /// Returns `true` if the frame carries a JSON-RPC `error` member.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.value.get("error").is_some_and(|error| !error.is_null())
    }

    /// Decodes the result.
    ///
    /// Reads `result`, or `params.result` for subscription notifications.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the frame carries an `error` member
    /// - [`Error::Json`] if the result does not decode as `T`
    pub fn result<T: DeserializeOwned>(&self) -> Result<T> {
        if let Some(error) = self.value.get("error").filter(|error| !error.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(Error::rpc(code, message));
        }

        let result = self
            .value
            .get("result")
            .or_else(|| self.value.get("params").and_then(|params| params.get("result")))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(serde_json::from_value(result)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_rpc_serialization() {
        let request = SocketRequest::rpc(1, "eth_blockNumber", json!([])).expect("serialize");
        let value: Value = serde_json::from_str(request.payload()).expect("json");

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert_eq!(value["method"], "eth_blockNumber");
        assert_eq!(request.id(), &CorrelationId::Number(1));
        assert!(!request.is_subscription());
    }

    #[test]
    fn test_text_id_stays_text() {
        let request = SocketRequest::rpc("42", "m", json!({})).expect("serialize");
        assert!(request.payload().contains(r#""id":"42""#));
    }

    #[test]
    fn test_from_payload() {
        let request = SocketRequest::from_payload(r#"{"id":"a","method":"m"}"#).expect("valid");
        assert_eq!(request.id(), &CorrelationId::from("a"));

        assert_eq!(
            SocketRequest::from_payload(r#"{"method":"m"}"#),
            Err(RequestError::BadFormat)
        );
    }

    #[test]
    fn test_publisher_implies_subscription() {
        let request = SocketRequest::rpc(1, "eth_subscribe", json!(["newHeads"]))
            .expect("serialize")
            .with_publisher("heads");

        assert!(request.is_subscription());
        assert_eq!(request.publisher().map(PublisherId::as_str), Some("heads"));
    }

    #[test]
    fn test_response_result() {
        let response = Response::parse(r#"{"id":1,"result":"0x10"}"#).expect("valid");
        let result: String = response.result().expect("decode");

        assert_eq!(result, "0x10");
        assert_eq!(response.id(), Some(CorrelationId::Number(1)));
        assert!(!response.is_error());
    }

    #[test]
    fn test_notification_result() {
        let response = Response::parse(
            r#"{"method":"eth_subscription","params":{"subscription":"0x1","result":{"n":5}}}"#,
        )
        .expect("valid");
        let result: Value = response.result().expect("decode");
        assert_eq!(result, json!({"n": 5}));
    }

    #[test]
    fn test_response_error() {
        let response =
            Response::parse(r#"{"id":1,"error":{"code":-32601,"message":"method not found"}}"#)
                .expect("valid");

        assert!(response.is_error());
        let err = response.result::<Value>().expect_err("rpc error");
        assert!(matches!(err, Error::Rpc { code: -32601, ref message } if message == "method not found"));
    }

    #[test]
    fn test_null_error_is_success() {
        let response = Response::parse(r#"{"id":1,"result":true,"error":null}"#).expect("valid");
        assert!(response.result::<bool>().expect("decode"));
    }
}
