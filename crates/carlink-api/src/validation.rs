//! ---
//! carlink_section: "05-external-interfaces"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "REST boundary and combined relay server."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
//! Field checks applied before a request reaches the hub.

use carlink_msg::{TelemetrySnapshot, DEFAULT_HORN_DURATION_MS};
use serde::Deserialize;

/// Accepted movement directions.
pub const DIRECTIONS: [&str; 5] = ["forward", "backward", "left", "right", "stop"];

const BATTERY_RANGE: (f64, f64) = (0.0, 100.0);
const SPEED_RANGE: (f64, f64) = (0.0, 200.0);
const RPM_RANGE: (i32, i32) = (0, 20_000);

/// Reason a request was refused at the boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Movement direction outside [`DIRECTIONS`].
    #[error("unknown direction '{0}'; expected forward, backward, left, right or stop")]
    UnknownDirection(String),
    /// Light state that is neither on nor off.
    #[error("unknown light state '{0}'; expected on or off")]
    UnknownLightState(String),
    /// Numeric telemetry field outside its bounds.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Wire name of the field.
        field: &'static str,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
        /// Rejected value.
        value: f64,
    },
    /// Field that must not be negative.
    #[error("{field} must not be negative, got {value}")]
    Negative {
        /// Wire name of the field.
        field: &'static str,
        /// Rejected value.
        value: f64,
    },
    /// NaN or infinite value.
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),
}

/// Body of the lights endpoint: `"on"`/`"off"` or a boolean.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LightsRequest {
    /// Textual state, case-insensitive.
    State(String),
    /// `true` for on.
    Flag(bool),
}

/// Trim and lowercase a direction, rejecting anything unknown.
pub fn parse_direction(raw: &str) -> Result<String, ValidationError> {
    let direction = raw.trim().to_lowercase();
    if DIRECTIONS.contains(&direction.as_str()) {
        Ok(direction)
    } else {
        Err(ValidationError::UnknownDirection(raw.trim().to_owned()))
    }
}

/// Normalise a lights request to `on` or `off`.
pub fn parse_light_state(request: &LightsRequest) -> Result<&'static str, ValidationError> {
    match request {
        LightsRequest::Flag(true) => Ok("on"),
        LightsRequest::Flag(false) => Ok("off"),
        LightsRequest::State(raw) => match raw.trim().to_lowercase().as_str() {
            "on" | "true" => Ok("on"),
            "off" | "false" => Ok("off"),
            _ => Err(ValidationError::UnknownLightState(raw.trim().to_owned())),
        },
    }
}

/// Default a missing or non-positive duration and clamp it to `max_ms`.
pub fn horn_duration(requested: Option<i64>, max_ms: u64) -> i64 {
    let max_ms = i64::try_from(max_ms).unwrap_or(i64::MAX);
    match requested {
        Some(ms) if ms > 0 => ms.min(max_ms),
        _ => DEFAULT_HORN_DURATION_MS.min(max_ms),
    }
}

/// Check every telemetry field against its bounds.
pub fn validate_snapshot(snapshot: &TelemetrySnapshot) -> Result<(), ValidationError> {
    check_range("batteryLevel", snapshot.battery_level, BATTERY_RANGE)?;
    check_range("speed", snapshot.speed, SPEED_RANGE)?;

    if !snapshot.current_consumption.is_finite() {
        return Err(ValidationError::NotFinite("currentConsumption"));
    }
    if snapshot.current_consumption < 0.0 {
        return Err(ValidationError::Negative {
            field: "currentConsumption",
            value: snapshot.current_consumption,
        });
    }

    let (min, max) = RPM_RANGE;
    if !(min..=max).contains(&snapshot.motor_rpm) {
        return Err(ValidationError::OutOfRange {
            field: "motorRpm",
            min: f64::from(min),
            max: f64::from(max),
            value: f64::from(snapshot.motor_rpm),
        });
    }
    Ok(())
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite(field));
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}
