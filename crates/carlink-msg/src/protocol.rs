//! ---
//! carlink_section: "02-messaging-data-model"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Message contracts shared by the hub and its boundary."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
//! Frames exchanged on the persistent hub connection.
//!
//! Every frame is a JSON text message of the shape
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::types::{CarCommand, TelemetrySnapshot};
use crate::ProtocolError;

/// Operation invoked by a client on the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientInvocation {
    /// Join the device group. The payload is an opaque device label.
    #[serde(alias = "RegisterESP32")]
    RegisterDevice(String),
    /// Join the frontend group. The payload is an opaque user label.
    RegisterFrontend(String),
    /// Publish telemetry to the frontend group. `null` is rejected by the hub.
    SendTelemetryData(Option<TelemetrySnapshot>),
    /// Fan a command out to the device group. `null` is rejected by the hub.
    #[serde(alias = "SendCommandToESP32")]
    SendCommand(Option<CarCommand>),
}

impl ClientInvocation {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Invocation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientInvocation::RegisterDevice(_) => "RegisterDevice",
            ClientInvocation::RegisterFrontend(_) => "RegisterFrontend",
            ClientInvocation::SendTelemetryData(_) => "SendTelemetryData",
            ClientInvocation::SendCommand(_) => "SendCommand",
        }
    }
}

/// Event pushed by the hub to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Latest telemetry, broadcast to frontends or replayed on registration.
    ReceiveTelemetry(TelemetrySnapshot),
    /// Command broadcast to devices.
    ReceiveCommand(CarCommand),
    /// Sent to the dispatching caller once the broadcast call returned.
    CommandConfirmed(bool),
    /// Sent to a device after it joined the device group.
    DeviceConnected(String),
    /// Human readable rejection of the caller's last frame.
    Error(String),
}

impl ServerEvent {
    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Event name used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveTelemetry(_) => "ReceiveTelemetry",
            ServerEvent::ReceiveCommand(_) => "ReceiveCommand",
            ServerEvent::CommandConfirmed(_) => "CommandConfirmed",
            ServerEvent::DeviceConnected(_) => "DeviceConnected",
            ServerEvent::Error(_) => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandKind;
    use serde_json::json;

    #[test]
    fn decodes_registration_frames() {
        let frame = json!({"event": "RegisterFrontend", "data": "u1"}).to_string();
        assert_eq!(
            ClientInvocation::decode(&frame).unwrap(),
            ClientInvocation::RegisterFrontend("u1".into())
        );

        let legacy = json!({"event": "RegisterESP32", "data": "esp-7"}).to_string();
        assert_eq!(
            ClientInvocation::decode(&legacy).unwrap(),
            ClientInvocation::RegisterDevice("esp-7".into())
        );
    }

    #[test]
    fn null_payload_decodes_to_none() {
        let frame = json!({"event": "SendTelemetryData", "data": null}).to_string();
        assert_eq!(
            ClientInvocation::decode(&frame).unwrap(),
            ClientInvocation::SendTelemetryData(None)
        );

        let frame = json!({"event": "SendCommandToESP32", "data": null}).to_string();
        assert_eq!(
            ClientInvocation::decode(&frame).unwrap(),
            ClientInvocation::SendCommand(None)
        );
    }

    #[test]
    fn command_invocation_carries_payload() {
        let frame = json!({
            "event": "SendCommand",
            "data": {"commandType": "horn", "value": "on", "duration": null}
        })
        .to_string();
        match ClientInvocation::decode(&frame).unwrap() {
            ClientInvocation::SendCommand(Some(command)) => {
                assert_eq!(command.command_type, CommandKind::Horn);
                assert_eq!(command.duration, None);
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_malformed() {
        let err = ClientInvocation::decode(r#"{"event":"JoinGroup","data":"admins"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(ClientInvocation::decode("not json").is_err());
    }

    #[test]
    fn server_events_encode_with_event_tag() {
        let encoded = ServerEvent::CommandConfirmed(true).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"event": "CommandConfirmed", "data": true}));

        let encoded = ServerEvent::DeviceConnected("esp-1".into()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"event": "DeviceConnected", "data": "esp-1"}));
    }
}
