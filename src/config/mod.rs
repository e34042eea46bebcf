//! Endpoint and transport configuration.
//!
//! Everything here is created once at construction and never mutated
//! afterwards.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent builder with validation |
//! | `endpoint` | Parsed `ws`/`wss` endpoint |
//! | `options` | [`Configuration`] and [`TlsPolicy`] |

// ============================================================================
// Submodules
// ============================================================================

/// Builder for transports and clients.
pub mod builder;

/// Parsed WebSocket endpoint.
pub mod endpoint;

/// Immutable connection configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::WebSocketBuilder;
pub use endpoint::{Endpoint, Scheme};
pub use options::{Configuration, TlsPolicy};
