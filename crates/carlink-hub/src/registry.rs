//! ---
//! carlink_section: "04-connection-hub"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Connection registry, group fan-out and the hub endpoint."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
//! Live connections and the groups they joined.
//!
//! Membership is recorded once per direction: `groups` maps a group to member
//! ids, and each connection record lists the groups it joined so disconnect
//! cleanup touches only the relevant sets. Everything sits behind one lock
//! that is never held across a send.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use carlink_msg::Group;
use parking_lot::RwLock;

use crate::sink::ConnectionSink;
use crate::{ConnectionId, HubError};

struct ConnectionRecord {
    sink: Arc<dyn ConnectionSink>,
    groups: BTreeSet<Group>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    groups: HashMap<Group, HashSet<ConnectionId>>,
}

/// Authoritative list of live connections and group memberships.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new, group-less connection.
    pub fn insert(&self, id: ConnectionId, sink: Arc<dyn ConnectionSink>) -> Result<(), HubError> {
        let mut state = self.state.write();
        if state.connections.contains_key(&id) {
            return Err(HubError::DuplicateConnection(id));
        }
        state.connections.insert(
            id,
            ConnectionRecord {
                sink,
                groups: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Drop a connection and every membership it held.
    ///
    /// Returns the groups it left, or `None` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> Option<Vec<Group>> {
        let mut state = self.state.write();
        let record = state.connections.remove(&id)?;
        for group in &record.groups {
            if let Some(members) = state.groups.get_mut(group) {
                members.remove(&id);
                if members.is_empty() {
                    state.groups.remove(group);
                }
            }
        }
        Some(record.groups.into_iter().collect())
    }

    /// Add a connection to `group`. Joining twice is a no-op.
    ///
    /// With `exclusive` set, a connection already in the counterpart group is
    /// refused. Returns whether the membership is new.
    pub fn join(&self, id: ConnectionId, group: Group, exclusive: bool) -> Result<bool, HubError> {
        let mut state = self.state.write();
        let record = state
            .connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        if exclusive && record.groups.contains(&group.counterpart()) {
            return Err(HubError::RoleConflict(group.counterpart()));
        }
        if !record.groups.insert(group) {
            return Ok(false);
        }
        state.groups.entry(group).or_default().insert(id);
        Ok(true)
    }

    /// Whether `id` is currently a member of `group`.
    pub fn is_member(&self, id: ConnectionId, group: Group) -> bool {
        self.state
            .read()
            .groups
            .get(&group)
            .is_some_and(|members| members.contains(&id))
    }

    /// Outbound sink of a live connection.
    pub fn sink(&self, id: ConnectionId) -> Option<Arc<dyn ConnectionSink>> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|record| Arc::clone(&record.sink))
    }

    /// Members of `group` paired with their sinks, captured atomically.
    pub fn recipients(&self, group: Group) -> Vec<(ConnectionId, Arc<dyn ConnectionSink>)> {
        let state = self.state.read();
        let Some(members) = state.groups.get(&group) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| {
                state
                    .connections
                    .get(id)
                    .map(|record| (*id, Arc::clone(&record.sink)))
            })
            .collect()
    }

    /// Sorted member ids of `group`.
    pub fn members(&self, group: Group) -> Vec<ConnectionId> {
        let mut members: Vec<_> = self
            .state
            .read()
            .groups
            .get(&group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Groups joined by `id`, or `None` if it is not connected.
    pub fn groups_of(&self, id: ConnectionId) -> Option<Vec<Group>> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|record| record.groups.iter().copied().collect())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of members in `group`.
    pub fn group_size(&self, group: Group) -> usize {
        self.state.read().groups.get(&group).map_or(0, HashSet::len)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &state.connections.len())
            .field("devices", &state.groups.get(&Group::Devices).map_or(0, HashSet::len))
            .field(
                "frontends",
                &state.groups.get(&Group::Frontends).map_or(0, HashSet::len),
            )
            .finish()
    }
}
