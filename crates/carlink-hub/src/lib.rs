//! ---
//! carlink_section: "04-connection-hub"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Connection registry, group fan-out and the hub endpoint."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod hub;
pub mod registry;
pub mod sink;
pub mod websocket;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to a persistent connection by the hub endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Failures surfaced to the caller of a hub operation.
///
/// Per-recipient delivery problems never appear here; see [`sink::DeliveryError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// A required payload was absent.
    #[error("missing {0}")]
    InvalidArgument(&'static str),
    /// The connection is not (or no longer) registered with the hub.
    #[error("connection {0} is not connected")]
    UnknownConnection(ConnectionId),
    /// The transport reused an identifier that is still live.
    #[error("connection {0} is already connected")]
    DuplicateConnection(ConnectionId),
    /// Exclusive roles are enforced and the connection already holds the other one.
    #[error("connection already belongs to {0}")]
    RoleConflict(carlink_msg::Group),
    /// Telemetry publishing is restricted to registered devices.
    #[error("only registered devices may publish telemetry")]
    NotADevice,
}

pub use hub::{CarHub, Caller, DeliveryReport, DisconnectCause, HubPolicy};
pub use registry::ConnectionRegistry;
pub use sink::{ChannelSink, ConnectionSink, DeliveryError};
pub use websocket::{hub_router, EndpointSettings};
