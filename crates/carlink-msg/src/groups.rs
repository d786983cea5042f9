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

use serde::{Deserialize, Serialize};

/// Broadcast group joined by vehicle controllers.
pub const DEVICE_GROUP: &str = "device-group";
/// Broadcast group joined by observer/control UIs.
pub const FRONTEND_GROUP: &str = "frontend-group";

/// Process-wide broadcast groups. Clients cannot name their own groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Group {
    /// Members receive [`crate::ServerEvent::ReceiveCommand`].
    #[serde(rename = "device-group")]
    Devices,
    /// Members receive [`crate::ServerEvent::ReceiveTelemetry`].
    #[serde(rename = "frontend-group")]
    Frontends,
}

impl Group {
    /// Every group known to the hub.
    pub const ALL: [Group; 2] = [Group::Devices, Group::Frontends];

    /// Stable group name used in logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Devices => DEVICE_GROUP,
            Group::Frontends => FRONTEND_GROUP,
        }
    }

    /// The group a connection must not also belong to when roles are exclusive.
    pub fn counterpart(&self) -> Group {
        match self {
            Group::Devices => Group::Frontends,
            Group::Frontends => Group::Devices,
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
