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
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use carlink_common::config::HubConfig;
use carlink_msg::{ClientInvocation, ProtocolError, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::hub::{CarHub, Caller, DisconnectCause};
use crate::sink::{ChannelSink, ConnectionSink};
use crate::{ConnectionId, HubError};

/// Per-connection transport settings of the hub endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Outbound queue length; events that do not fit are dropped for that
    /// connection only.
    pub outbound_buffer: usize,
    /// Ping interval.
    pub keepalive: Duration,
    /// A connection that sends nothing, pongs included, for this long is
    /// disconnected.
    pub client_timeout: Duration,
}

impl From<&HubConfig> for EndpointSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            outbound_buffer: config.outbound_buffer,
            keepalive: Duration::from_secs(config.keepalive_secs),
            client_timeout: Duration::from_secs(config.client_timeout_secs),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

struct HubEndpointState {
    hub: Arc<CarHub>,
    settings: EndpointSettings,
}

/// Router exposing the hub protocol at `path`.
pub fn hub_router(hub: Arc<CarHub>, path: &str, settings: EndpointSettings) -> Router {
    let state = Arc::new(HubEndpointState { hub, settings });
    Router::new()
        .route(path, get(upgrade_handler))
        .with_state(state)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubEndpointState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| connection_loop(socket, state))
}

async fn connection_loop(socket: WebSocket, state: Arc<HubEndpointState>) {
    let id = ConnectionId::new();
    let settings = state.settings;
    let (sink, mut outbound) = ChannelSink::channel(settings.outbound_buffer);
    if let Err(err) = state.hub.on_connect(id, Arc::new(sink.clone())) {
        warn!(connection = %id, error = %err, "hub refused connection");
        return;
    }

    let (mut writer, mut reader) = socket.split();
    let mut writer_task = tokio::spawn(async move {
        let mut keepalive = interval_at(Instant::now() + settings.keepalive, settings.keepalive);
        loop {
            let message = tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match event.encode() {
                        Ok(text) => Message::Text(text),
                        Err(err) => {
                            warn!(connection = %id, error = %err, "failed to serialise hub event");
                            continue;
                        }
                    }
                }
                _ = keepalive.tick() => Message::Ping(Vec::new()),
            };
            if writer.send(message).await.is_err() {
                break;
            }
        }
        match timeout(settings.keepalive, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(connection = %id, error = %err, "hub socket close failed"),
            Err(_) => debug!(connection = %id, "hub socket close timed out"),
        }
    });

    let cause = loop {
        let frame = match timeout(settings.client_timeout, reader.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                let timeout_ms = u64::try_from(settings.client_timeout.as_millis()).unwrap_or(u64::MAX);
                info!(connection = %id, timeout_ms, "hub client went silent");
                break DisconnectCause::Transport("client timed out".to_owned());
            }
        };
        match frame {
            Some(Ok(Message::Text(text))) => handle_frame(&state.hub, id, &sink, &text),
            Some(Ok(Message::Binary(_))) => {
                reject(&sink, id, &ProtocolError::BinaryUnsupported.to_string())
            }
            Some(Ok(Message::Close(_))) | None => break DisconnectCause::Closed,
            // pongs and client pings only refresh the idle timer
            Some(Ok(_)) => {}
            Some(Err(err)) => break DisconnectCause::Transport(err.to_string()),
        }
    };

    state.hub.on_disconnect(id, cause);
    // the writer drains until the last sink clone is gone
    drop(sink);
    match timeout(settings.client_timeout, &mut writer_task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(connection = %id, error = %err, "hub writer task failed"),
        Err(_) => {
            debug!(connection = %id, "hub writer stuck on a dead socket; aborting");
            writer_task.abort();
        }
    }
}

fn handle_frame(hub: &CarHub, id: ConnectionId, sink: &ChannelSink, text: &str) {
    let invocation = match ClientInvocation::decode(text) {
        Ok(invocation) => invocation,
        Err(err) => {
            warn!(connection = %id, error = %err, "invalid hub invocation");
            reject(sink, id, &err.to_string());
            return;
        }
    };

    let name = invocation.name();
    let caller = Caller::Connection(id);
    let outcome: Result<(), HubError> = match invocation {
        ClientInvocation::RegisterDevice(device_id) => hub.register_device(id, &device_id),
        ClientInvocation::RegisterFrontend(user_id) => hub.register_frontend(id, &user_id),
        ClientInvocation::SendTelemetryData(snapshot) => {
            hub.publish_telemetry(caller, snapshot).map(|_| ())
        }
        ClientInvocation::SendCommand(command) => hub.dispatch_command(caller, command).map(|_| ()),
    };

    if let Err(err) = outcome {
        debug!(connection = %id, invocation = name, error = %err, "hub invocation rejected");
        reject(sink, id, &err.to_string());
    }
}

fn reject(sink: &ChannelSink, id: ConnectionId, reason: &str) {
    if let Err(err) = sink.deliver(Arc::new(ServerEvent::Error(reason.to_owned()))) {
        debug!(connection = %id, error = %err, "could not deliver rejection");
    }
}
