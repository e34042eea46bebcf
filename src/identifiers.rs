//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing a request correlation ID, a consumer
//! identity and a caller-named publisher ID at compile time.
//!
//! | Type | Wraps | Used by |
//! |------|-------|---------|
//! | [`CorrelationId`] | JSON number or string | request/response and subscription matching |
//! | [`ConsumerId`] | UUID v4 | event stream registry |
//! | [`PublisherId`] | caller string | shared subscription streams |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// CorrelationId
// ============================================================================

/// Identifier linking an outbound request to its inbound frames.
///
/// JSON-RPC allows both numbers and strings. The two forms never compare
/// equal: `42` and `"42"` are distinct IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    /// Integer ID.
    Number(i64),
    /// String ID.
    Text(String),
}

impl CorrelationId {
    /// Extracts an ID from a JSON value.
    ///
    /// Returns `None` for anything other than an integer or a string.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self::Number),
            Value::String(text) => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    /// Converts the ID back into a JSON value.
    #[inline]
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(number) => Value::from(*number),
            Self::Text(text) => Value::from(text.as_str()),
        }
    }

    /// Returns `true` for the integer form.
    #[inline]
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "\"{text}\""),
        }
    }
}

impl From<i64> for CorrelationId {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CorrelationId {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CorrelationId {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ============================================================================
// ConsumerId
// ============================================================================

/// Identity of one event stream attached to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    /// Generates a fresh random identity.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PublisherId
// ============================================================================

/// Caller-chosen name of a shared subscription stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublisherId(String);

impl PublisherId {
    /// Creates a publisher ID.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PublisherId {
    #[inline]
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
