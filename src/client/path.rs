//! Typed request paths.
//!
//! A [`SocketPath`] names a remote method together with its parameters and
//! the type its result decodes to. [`SocketClient::call`] and
//! [`SocketClient::watch`] accept any implementor.
//!
//! [`SocketClient::call`]: super::SocketClient::call
//! [`SocketClient::watch`]: super::SocketClient::watch

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::CorrelationId;
use crate::protocol::SocketRequest;

// ============================================================================
// SocketPath
// ============================================================================

/// A remote method with typed output.
///
/// # Example
///
/// ```
/// use serde_json::{Value, json};
/// use wallet_socket::SocketPath;
///
/// struct BlockNumber;
///
/// impl SocketPath for BlockNumber {
///     type Output = String;
///
///     fn method(&self) -> &str {
///         "eth_blockNumber"
///     }
///
///     fn params(&self) -> Value {
///         json!([])
///     }
/// }
///
/// let request = BlockNumber.request(7.into()).unwrap();
/// assert!(request.payload().contains("eth_blockNumber"));
/// ```
pub trait SocketPath {
    /// Decoded result type.
    type Output: DeserializeOwned;

    /// JSON-RPC method name.
    fn method(&self) -> &str;

    /// JSON-RPC parameters.
    fn params(&self) -> Value;

    /// Builds the request for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the parameters fail to
    /// serialize.
    fn request(&self, id: CorrelationId) -> Result<SocketRequest> {
        SocketRequest::rpc(id, self.method(), self.params())
    }
}
