//! JSON envelope inspection.
//!
//! The engine never interprets payloads beyond two fields:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `id` | correlation ID of a request or its response |
//! | `result` (ID-shaped) | subscription ID in a subscribe acknowledgment |
//! | `params.subscription` | subscription ID in a notification |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::identifiers::CorrelationId;

// ============================================================================
// Envelope
// ============================================================================

/// Correlation fields of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation ID, if the frame answers a request.
    pub id: Option<CorrelationId>,
    /// Subscription ID, if the frame carries one.
    pub subscription: Option<CorrelationId>,
    /// Parsed frame.
    pub value: Value,
}

impl Envelope {
    /// Parses an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::BadFormat`] if the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_str(text).map_err(|_| RequestError::BadFormat)?;
        let object = value.as_object().ok_or(RequestError::BadFormat)?;

        let id = object.get("id").and_then(CorrelationId::from_value);
        let subscription = subscription_id(object);

        Ok(Self {
            id,
            subscription,
            value,
        })
    }
}

/// `result` when it is ID-shaped, otherwise `params.subscription`.
fn subscription_id(object: &Map<String, Value>) -> Option<CorrelationId> {
    object
        .get("result")
        .and_then(CorrelationId::from_value)
        .or_else(|| {
            object
                .get("params")
                .and_then(|params| params.get("subscription"))
                .and_then(CorrelationId::from_value)
        })
}

/// Extracts the `id` of an outbound payload.
///
/// # Errors
///
/// Returns [`RequestError::BadFormat`] if the payload is not a JSON object
/// with an integer or string `id`.
pub fn request_id(payload: &str) -> Result<CorrelationId, RequestError> {
    let value: Value = serde_json::from_str(payload).map_err(|_| RequestError::BadFormat)?;

    value
        .get("id")
        .and_then(CorrelationId::from_value)
        .ok_or(RequestError::BadFormat)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_frame() {
        let envelope = Envelope::parse(r#"{"jsonrpc":"2.0","id":"42","result":{"a":1}}"#)
            .expect("valid");
        assert_eq!(envelope.id, Some(CorrelationId::from("42")));
        assert_eq!(envelope.subscription, None);
    }

    #[test]
    fn test_subscribe_ack_carries_subscription_in_result() {
        let envelope = Envelope::parse(r#"{"id":7,"result":"0xabc"}"#).expect("valid");
        assert_eq!(envelope.id, Some(CorrelationId::Number(7)));
        assert_eq!(envelope.subscription, Some(CorrelationId::from("0xabc")));
    }

    #[test]
    fn test_notification_carries_subscription_in_params() {
        let envelope = Envelope::parse(
            r#"{"method":"eth_subscription","params":{"subscription":"0xabc","result":{"n":1}}}"#,
        )
        .expect("valid");
        assert_eq!(envelope.id, None);
        assert_eq!(envelope.subscription, Some(CorrelationId::from("0xabc")));
    }

    #[test]
    fn test_non_id_result_is_not_a_subscription() {
        let envelope = Envelope::parse(r#"{"id":1,"result":[1,2]}"#).expect("valid");
        assert_eq!(envelope.subscription, None);
    }

    #[test]
    fn test_bad_frames() {
        assert_eq!(Envelope::parse("not json"), Err(RequestError::BadFormat));
        assert_eq!(Envelope::parse("[1,2]"), Err(RequestError::BadFormat));
    }

    #[test]
    fn test_request_id() {
        assert_eq!(request_id(r#"{"id":3,"method":"m"}"#), Ok(CorrelationId::Number(3)));
        assert_eq!(request_id(r#"{"id":"x"}"#), Ok(CorrelationId::from("x")));
        assert_eq!(request_id(r#"{"method":"m"}"#), Err(RequestError::BadFormat));
        assert_eq!(request_id(r#"{"id":null}"#), Err(RequestError::BadFormat));
        assert_eq!(request_id("garbage"), Err(RequestError::BadFormat));
    }
}
