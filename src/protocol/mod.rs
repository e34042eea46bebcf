//! Socket message types.
//!
//! The engine treats payloads as opaque JSON text and reads only the fields
//! it needs to correlate frames with callers.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Correlated by |
//! |---------|-----------|---------------|
//! | Request | Local → Remote | `id` |
//! | Response | Remote → Local | `id` |
//! | Subscribe ack | Remote → Local | `id`, subscription ID in `result` |
//! | Notification | Remote → Local | `params.subscription` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Correlation field extraction |
//! | `request` | [`SocketRequest`] and [`Response`] |

// ============================================================================
// Submodules
// ============================================================================

/// Correlation field extraction.
pub mod envelope;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::Envelope;
pub use request::{Response, SocketRequest};
