//! ---
//! carlink_section: "04-connection-hub"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Connection registry, group fan-out and the hub endpoint."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::sync::Arc;

use carlink_msg::ServerEvent;
use tokio::sync::mpsc;

/// Outcome of a single best-effort send that did not reach the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,
    /// The connection is not draining its queue fast enough.
    #[error("outbound buffer full")]
    BufferFull,
}

/// Outbound half of a connection as seen by the hub.
///
/// `deliver` must not wait on network I/O; it hands the event to whatever
/// drains the connection and reports immediately.
pub trait ConnectionSink: Send + Sync + 'static {
    /// Queue one event for the connection.
    fn deliver(&self, event: Arc<ServerEvent>) -> Result<(), DeliveryError>;
}

/// Sink backed by a bounded queue drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<ServerEvent>>,
}

impl ChannelSink {
    /// Create a sink and the receiver its writer task should drain.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ConnectionSink for ChannelSink {
    fn deliver(&self, event: Arc<ServerEvent>) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
