//! ---
//! carlink_section: "02-messaging-data-model"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Message contracts shared by the hub and its boundary."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod groups;
pub mod protocol;
pub mod types;

/// Errors raised while decoding hub protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not name a known invocation.
    #[error("malformed invocation: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    BinaryUnsupported,
}

pub use groups::{Group, DEVICE_GROUP, FRONTEND_GROUP};
pub use protocol::{ClientInvocation, ServerEvent};
pub use types::{CarCommand, CommandKind, TelemetrySnapshot, DEFAULT_HORN_DURATION_MS};
