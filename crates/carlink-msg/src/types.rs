//! ---
//! carlink_section: "02-messaging-data-model"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Message contracts shared by the hub and its boundary."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Horn duration applied when a command carries none or a non-positive one.
pub const DEFAULT_HORN_DURATION_MS: i64 = 1000;

/// Latest reading reported by a vehicle controller.
///
/// The cache stores whatever it is handed; bounds are enforced by the REST
/// boundary before a snapshot reaches the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Battery charge in percent (0-100).
    pub battery_level: f64,
    /// Current draw in amperes (>= 0).
    pub current_consumption: f64,
    /// Vehicle speed (0-200).
    pub speed: f64,
    /// Motor revolutions per minute (0-20000).
    pub motor_rpm: i32,
    /// Capture instant.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySnapshot {
    /// Build a snapshot captured now.
    pub fn new(battery_level: f64, current_consumption: f64, speed: f64, motor_rpm: i32) -> Self {
        Self {
            battery_level,
            current_consumption,
            speed,
            motor_rpm,
            timestamp: Utc::now(),
        }
    }

    /// Override the capture instant.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Actuator addressed by a [`CarCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Drive direction: forward, backward, left, right, stop.
    Move,
    /// Headlights: on, off.
    Lights,
    /// Horn: on, off, with an optional duration.
    Horn,
}

impl CommandKind {
    /// Lowercase wire name, also used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Move => "move",
            CommandKind::Lights => "lights",
            CommandKind::Horn => "horn",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient instruction fanned out to every connected device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarCommand {
    /// Actuator selector.
    pub command_type: CommandKind,
    /// Kind-specific value such as `forward` or `on`.
    pub value: String,
    /// Horn duration in milliseconds.
    #[serde(default)]
    pub duration: Option<i64>,
    /// Creation instant.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CarCommand {
    /// Build a command of any kind created now.
    pub fn new(command_type: CommandKind, value: impl Into<String>) -> Self {
        Self {
            command_type,
            value: value.into(),
            duration: None,
            created_at: Utc::now(),
        }
    }

    /// Movement command (`forward`, `backward`, `left`, `right`, `stop`).
    pub fn movement(direction: impl Into<String>) -> Self {
        Self::new(CommandKind::Move, direction)
    }

    /// Lights command (`on` or `off`).
    pub fn lights(state: impl Into<String>) -> Self {
        Self::new(CommandKind::Lights, state)
    }

    /// Horn activation for `duration` milliseconds.
    pub fn horn(duration: Option<i64>) -> Self {
        Self {
            duration,
            ..Self::new(CommandKind::Horn, "on")
        }
        .normalized()
    }

    /// Apply the horn duration default; other kinds pass through untouched.
    pub fn normalized(mut self) -> Self {
        if self.command_type == CommandKind::Horn {
            self.duration = match self.duration {
                Some(ms) if ms > 0 => Some(ms),
                _ => Some(DEFAULT_HORN_DURATION_MS),
            };
        }
        self
    }
}
