//! ---
//! carlink_section: "04-connection-hub"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Connection registry, group fan-out and the hub endpoint."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use carlink_common::config::HubConfig;
use carlink_metrics::HubMetrics;
use carlink_msg::{CarCommand, Group, ServerEvent, TelemetrySnapshot};
use carlink_telemetry::TelemetryCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;
use crate::sink::ConnectionSink;
use crate::{ConnectionId, HubError};

/// Who invoked a hub operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// A persistent connection; replies go back to it alone.
    Connection(ConnectionId),
    /// The validated REST boundary. It has no connection to reply to.
    External,
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Connection(id) => fmt::Display::fmt(id, f),
            Caller::External => f.write_str("external"),
        }
    }
}

/// Why a connection left the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The peer closed the socket or the stream ended.
    Closed,
    /// The transport failed while reading.
    Transport(String),
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::Closed => f.write_str("closed"),
            DisconnectCause::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

/// Optional role checks. Both are off by default, which lets any connection
/// hold both roles and publish telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubPolicy {
    /// Refuse to register a connection into both groups.
    pub exclusive_roles: bool,
    /// Accept `SendTelemetryData` only from members of the device group.
    pub devices_only_telemetry: bool,
}

impl From<&HubConfig> for HubPolicy {
    fn from(config: &HubConfig) -> Self {
        Self {
            exclusive_roles: config.exclusive_roles,
            devices_only_telemetry: config.devices_only_telemetry,
        }
    }
}

/// Per-recipient tally of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Members captured when the broadcast began.
    pub attempted: usize,
    /// Members whose queue accepted the event.
    pub delivered: usize,
    /// Members that could not be reached. Not retried.
    pub failed: usize,
}

/// Routes telemetry to frontends and commands to devices.
pub struct CarHub {
    registry: ConnectionRegistry,
    telemetry: Arc<dyn TelemetryCache>,
    // Orders cache writes against frontend joins so a joiner sees a snapshot
    // either through the replay or through the broadcast, never both.
    replay_gate: Mutex<()>,
    policy: HubPolicy,
    metrics: Option<HubMetrics>,
}

impl CarHub {
    /// Build a hub over the shared telemetry cache.
    pub fn new(telemetry: Arc<dyn TelemetryCache>, policy: HubPolicy) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            telemetry,
            replay_gate: Mutex::new(()),
            policy,
            metrics: None,
        }
    }

    /// Record hub gauges and counters into `metrics`.
    pub fn with_metrics(mut self, metrics: HubMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The telemetry cache this hub writes to.
    pub fn telemetry(&self) -> &Arc<dyn TelemetryCache> {
        &self.telemetry
    }

    /// Active role policy.
    pub fn policy(&self) -> HubPolicy {
        self.policy
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Current members of `group`.
    pub fn members(&self, group: Group) -> Vec<ConnectionId> {
        self.registry.members(group)
    }

    /// Number of members in `group`.
    pub fn group_size(&self, group: Group) -> usize {
        self.registry.group_size(group)
    }

    /// Register a new connection without any group.
    pub fn on_connect(&self, id: ConnectionId, sink: Arc<dyn ConnectionSink>) -> Result<(), HubError> {
        self.registry.insert(id, sink)?;
        info!(connection = %id, "client connected to hub");
        self.refresh_gauges();
        Ok(())
    }

    /// Forget a connection and all of its memberships. Repeated calls are no-ops.
    pub fn on_disconnect(&self, id: ConnectionId, cause: DisconnectCause) {
        match self.registry.remove(id) {
            Some(groups) => {
                let groups: Vec<_> = groups.iter().map(Group::as_str).collect();
                info!(connection = %id, cause = %cause, groups = ?groups, "client disconnected from hub");
                self.refresh_gauges();
            }
            None => debug!(connection = %id, "disconnect for unknown connection ignored"),
        }
    }

    /// Join the device group and acknowledge to the caller only.
    pub fn register_device(&self, id: ConnectionId, device_id: &str) -> Result<(), HubError> {
        let joined = self
            .registry
            .join(id, Group::Devices, self.policy.exclusive_roles)?;
        if joined {
            self.refresh_gauges();
        }
        info!(connection = %id, device_id, "device registered");
        self.send_to(id, ServerEvent::DeviceConnected(device_id.to_owned()));
        Ok(())
    }

    /// Join the frontend group and replay the cached snapshot to the caller.
    ///
    /// Nothing is sent when the cache is still empty.
    pub fn register_frontend(&self, id: ConnectionId, user_id: &str) -> Result<(), HubError> {
        let (joined, cached) = {
            let _gate = self.replay_gate.lock();
            let joined = self
                .registry
                .join(id, Group::Frontends, self.policy.exclusive_roles)?;
            (joined, self.telemetry.latest())
        };
        if joined {
            self.refresh_gauges();
        }
        info!(connection = %id, user_id, "frontend registered");

        if let Some(snapshot) = cached {
            self.send_to(id, ServerEvent::ReceiveTelemetry((*snapshot).clone()));
        }
        Ok(())
    }

    /// Cache `snapshot` and broadcast it to the frontend group.
    pub fn publish_telemetry(
        &self,
        caller: Caller,
        snapshot: Option<TelemetrySnapshot>,
    ) -> Result<DeliveryReport, HubError> {
        let snapshot = snapshot.ok_or(HubError::InvalidArgument("telemetry snapshot"))?;
        if self.policy.devices_only_telemetry {
            if let Caller::Connection(id) = caller {
                if !self.registry.is_member(id, Group::Devices) {
                    return Err(HubError::NotADevice);
                }
            }
        }

        let timestamp = snapshot.timestamp;
        let recipients = {
            let _gate = self.replay_gate.lock();
            self.telemetry.update(snapshot.clone());
            self.registry.recipients(Group::Frontends)
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_telemetry_update();
        }
        let report = self.deliver_all(
            Group::Frontends,
            recipients,
            ServerEvent::ReceiveTelemetry(snapshot),
        );
        debug!(caller = %caller, %timestamp, recipients = report.attempted, "telemetry propagated");
        Ok(report)
    }

    /// Broadcast `command` to the device group, then confirm to the caller.
    ///
    /// The confirmation only means the broadcast call returned; devices do not
    /// acknowledge.
    pub fn dispatch_command(
        &self,
        caller: Caller,
        command: Option<CarCommand>,
    ) -> Result<DeliveryReport, HubError> {
        let command = command
            .ok_or(HubError::InvalidArgument("command"))?
            .normalized();
        let kind = command.command_type;
        let value = command.value.clone();

        let recipients = self.registry.recipients(Group::Devices);
        let report = self.deliver_all(Group::Devices, recipients, ServerEvent::ReceiveCommand(command));
        if let Some(metrics) = &self.metrics {
            metrics.record_command(kind.as_str());
        }
        if let Caller::Connection(id) = caller {
            self.send_to(id, ServerEvent::CommandConfirmed(true));
        }
        info!(caller = %caller, command = %kind, value = %value, recipients = report.attempted, "command dispatched");
        Ok(report)
    }

    /// Deliver one event to every captured member of `group`.
    fn deliver_all(
        &self,
        group: Group,
        recipients: Vec<(ConnectionId, Arc<dyn ConnectionSink>)>,
        event: ServerEvent,
    ) -> DeliveryReport {
        let event = Arc::new(event);
        let mut report = DeliveryReport {
            attempted: recipients.len(),
            ..DeliveryReport::default()
        };

        for (id, sink) in recipients {
            let outcome = sink.deliver(Arc::clone(&event));
            if let Some(metrics) = &self.metrics {
                metrics.record_delivery(event.name(), outcome.is_ok());
            }
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(connection = %id, group = %group, event = event.name(), error = %err, "dropped broadcast to member");
                }
            }
        }
        report
    }

    /// Best-effort send to a single connection.
    fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let name = event.name();
        let Some(sink) = self.registry.sink(id) else {
            debug!(connection = %id, event = name, "reply target no longer connected");
            return false;
        };
        let outcome = sink.deliver(Arc::new(event));
        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(name, outcome.is_ok());
        }
        if let Err(err) = outcome {
            warn!(connection = %id, event = name, error = %err, "dropped reply to caller");
            return false;
        }
        true
    }

    fn refresh_gauges(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.set_connections(self.registry.connection_count());
        for group in Group::ALL {
            metrics.set_group_members(group.as_str(), self.registry.group_size(group));
        }
    }
}

impl fmt::Debug for CarHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarHub")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DeliveryError;
    use carlink_metrics::{new_registry, prometheus::TextEncoder};
    use carlink_msg::{CommandKind, DEFAULT_HORN_DURATION_MS};
    use carlink_telemetry::InMemoryTelemetryCache;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ServerEvent>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<ServerEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl ConnectionSink for RecordingSink {
        fn deliver(&self, event: Arc<ServerEvent>) -> Result<(), DeliveryError> {
            self.events.lock().push((*event).clone());
            Ok(())
        }
    }

    struct ClosedSink;

    impl ConnectionSink for ClosedSink {
        fn deliver(&self, _event: Arc<ServerEvent>) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    fn snapshot(battery: f64, current: f64, speed: f64, rpm: i32) -> TelemetrySnapshot {
        TelemetrySnapshot::new(battery, current, speed, rpm)
    }

    fn hub() -> CarHub {
        CarHub::new(Arc::new(InMemoryTelemetryCache::new()), HubPolicy::default())
    }

    fn connect(hub: &CarHub) -> (ConnectionId, Arc<RecordingSink>) {
        let id = ConnectionId::new();
        let sink = Arc::new(RecordingSink::default());
        hub.on_connect(id, sink.clone()).unwrap();
        (id, sink)
    }

    #[test]
    fn frontend_with_empty_cache_receives_nothing() {
        let hub = hub();
        let (id, sink) = connect(&hub);
        hub.register_frontend(id, "u1").unwrap();
        assert!(sink.take().is_empty());
        assert_eq!(hub.members(Group::Frontends), vec![id]);
    }

    #[test]
    fn late_frontend_receives_cached_snapshot_once() {
        let hub = hub();
        let (first, first_sink) = connect(&hub);
        hub.register_frontend(first, "u1").unwrap();

        let (device, device_sink) = connect(&hub);
        hub.register_device(device, "esp-1").unwrap();
        let reading = snapshot(72.0, 1.4, 12.0, 3000);
        hub.publish_telemetry(Caller::Connection(device), Some(reading.clone()))
            .unwrap();

        assert_eq!(
            first_sink.take(),
            vec![ServerEvent::ReceiveTelemetry(reading.clone())]
        );
        assert_eq!(
            device_sink.take(),
            vec![ServerEvent::DeviceConnected("esp-1".into())]
        );

        let (second, second_sink) = connect(&hub);
        hub.register_frontend(second, "u2").unwrap();
        assert_eq!(
            second_sink.take(),
            vec![ServerEvent::ReceiveTelemetry(reading)]
        );
        assert!(first_sink.take().is_empty());
    }

    #[test]
    fn publish_updates_cache_and_reaches_only_frontends() {
        let hub = hub();
        let (frontend, frontend_sink) = connect(&hub);
        let (device, device_sink) = connect(&hub);
        let (bystander, bystander_sink) = connect(&hub);
        hub.register_frontend(frontend, "u1").unwrap();
        hub.register_device(device, "esp-1").unwrap();
        device_sink.take();

        let reading = snapshot(50.0, 0.2, 3.0, 120);
        let report = hub
            .publish_telemetry(Caller::Connection(bystander), Some(reading.clone()))
            .unwrap();

        assert_eq!(report, DeliveryReport { attempted: 1, delivered: 1, failed: 0 });
        assert_eq!(hub.telemetry().latest().as_deref(), Some(&reading));
        assert_eq!(frontend_sink.take(), vec![ServerEvent::ReceiveTelemetry(reading)]);
        assert!(device_sink.take().is_empty());
        assert!(bystander_sink.take().is_empty());
    }

    #[test]
    fn command_reaches_devices_and_confirms_to_caller_only() {
        let hub = hub();
        let (device_a, sink_a) = connect(&hub);
        let (device_b, sink_b) = connect(&hub);
        let (frontend, frontend_sink) = connect(&hub);
        hub.register_device(device_a, "esp-a").unwrap();
        hub.register_device(device_b, "esp-b").unwrap();
        hub.register_frontend(frontend, "u1").unwrap();
        sink_a.take();
        sink_b.take();

        let command = CarCommand::movement("forward");
        let report = hub
            .dispatch_command(Caller::Connection(frontend), Some(command.clone()))
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(sink_a.take(), vec![ServerEvent::ReceiveCommand(command.clone())]);
        assert_eq!(sink_b.take(), vec![ServerEvent::ReceiveCommand(command)]);
        assert_eq!(frontend_sink.take(), vec![ServerEvent::CommandConfirmed(true)]);
    }

    #[test]
    fn horn_without_duration_is_defaulted_and_confirmed_with_no_devices() {
        let hub = hub();
        let (caller, caller_sink) = connect(&hub);

        let mut horn = CarCommand::new(CommandKind::Horn, "on");
        horn.duration = None;
        let report = hub
            .dispatch_command(Caller::Connection(caller), Some(horn))
            .unwrap();
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(caller_sink.take(), vec![ServerEvent::CommandConfirmed(true)]);

        let (device, device_sink) = connect(&hub);
        hub.register_device(device, "esp-1").unwrap();
        device_sink.take();
        let mut horn = CarCommand::new(CommandKind::Horn, "on");
        horn.duration = Some(0);
        hub.dispatch_command(Caller::Connection(caller), Some(horn))
            .unwrap();
        match device_sink.take().as_slice() {
            [ServerEvent::ReceiveCommand(received)] => {
                assert_eq!(received.duration, Some(DEFAULT_HORN_DURATION_MS));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn horn_without_duration_reaches_device_with_default() {
        let hub = hub();
        let (device, device_sink) = connect(&hub);
        let (frontend, _) = connect(&hub);
        hub.register_device(device, "esp-1").unwrap();
        device_sink.take();

        let mut horn = CarCommand::new(CommandKind::Horn, "on");
        horn.duration = None;
        let report = hub
            .dispatch_command(Caller::Connection(frontend), Some(horn))
            .unwrap();

        assert_eq!(report.delivered, 1);
        match device_sink.take().as_slice() {
            [ServerEvent::ReceiveCommand(received)] => {
                assert_eq!(received.command_type, CommandKind::Horn);
                assert_eq!(received.duration, Some(1000));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    /// Cache that signals once a write landed and then stalls, leaving a window
    /// between the cache write and the broadcast.
    struct StallingCache {
        inner: InMemoryTelemetryCache,
        written: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    }

    impl TelemetryCache for StallingCache {
        fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
            self.inner.latest()
        }

        fn update(&self, snapshot: TelemetrySnapshot) {
            self.inner.update(snapshot);
            if let Some(tx) = self.written.lock().take() {
                tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        }
    }

    #[test]
    fn frontend_joining_mid_publish_gets_snapshot_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let cache = Arc::new(StallingCache {
            inner: InMemoryTelemetryCache::new(),
            written: Mutex::new(Some(tx)),
        });
        let hub = Arc::new(CarHub::new(cache, HubPolicy::default()));
        let (late, late_sink) = connect(&hub);
        let reading = snapshot(72.0, 1.4, 12.0, 3000);

        let publisher = {
            let hub = Arc::clone(&hub);
            let reading = reading.clone();
            std::thread::spawn(move || {
                hub.publish_telemetry(Caller::External, Some(reading)).unwrap();
            })
        };
        rx.recv().unwrap();
        hub.register_frontend(late, "u2").unwrap();
        publisher.join().unwrap();

        assert_eq!(
            late_sink.take(),
            vec![ServerEvent::ReceiveTelemetry(reading)]
        );
    }

    #[test]
    fn missing_payloads_are_rejected_without_broadcast() {
        let hub = hub();
        let (frontend, frontend_sink) = connect(&hub);
        let (device, device_sink) = connect(&hub);
        hub.register_frontend(frontend, "u1").unwrap();
        hub.register_device(device, "esp-1").unwrap();
        device_sink.take();

        assert_eq!(
            hub.publish_telemetry(Caller::Connection(device), None),
            Err(HubError::InvalidArgument("telemetry snapshot"))
        );
        assert_eq!(
            hub.dispatch_command(Caller::Connection(frontend), None),
            Err(HubError::InvalidArgument("command"))
        );
        assert!(hub.telemetry().latest().is_none());
        assert!(frontend_sink.take().is_empty());
        assert!(device_sink.take().is_empty());
    }

    #[test]
    fn disconnect_removes_memberships_and_is_idempotent() {
        let hub = hub();
        let (id, sink) = connect(&hub);
        hub.register_device(id, "esp-1").unwrap();
        hub.register_frontend(id, "u1").unwrap();
        sink.take();

        hub.on_disconnect(id, DisconnectCause::Closed);
        hub.on_disconnect(id, DisconnectCause::Transport("reset".into()));

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.group_size(Group::Devices), 0);
        let report = hub
            .dispatch_command(Caller::External, Some(CarCommand::lights("on")))
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert!(sink.take().is_empty());
        assert_eq!(
            hub.register_frontend(id, "u1"),
            Err(HubError::UnknownConnection(id))
        );
    }

    #[test]
    fn failed_recipient_does_not_abort_broadcast() {
        let hub = hub();
        let dead = ConnectionId::new();
        hub.on_connect(dead, Arc::new(ClosedSink)).unwrap();
        hub.register_frontend(dead, "stale").unwrap();
        let (live, live_sink) = connect(&hub);
        hub.register_frontend(live, "u1").unwrap();

        let report = hub
            .publish_telemetry(Caller::External, Some(snapshot(10.0, 0.0, 0.0, 0)))
            .unwrap();
        assert_eq!(report, DeliveryReport { attempted: 2, delivered: 1, failed: 1 });
        assert_eq!(live_sink.take().len(), 1);
    }

    #[test]
    fn policy_checks_are_opt_in() {
        let permissive = hub();
        let (id, _) = connect(&permissive);
        permissive.register_device(id, "esp-1").unwrap();
        permissive.register_frontend(id, "u1").unwrap();
        let (stranger, _) = connect(&permissive);
        assert!(permissive
            .publish_telemetry(Caller::Connection(stranger), Some(snapshot(1.0, 0.0, 0.0, 0)))
            .is_ok());

        let strict = CarHub::new(
            Arc::new(InMemoryTelemetryCache::new()),
            HubPolicy {
                exclusive_roles: true,
                devices_only_telemetry: true,
            },
        );
        let (id, _) = connect(&strict);
        strict.register_device(id, "esp-1").unwrap();
        assert_eq!(
            strict.register_frontend(id, "u1"),
            Err(HubError::RoleConflict(Group::Devices))
        );
        let (stranger, _) = connect(&strict);
        assert_eq!(
            strict.publish_telemetry(Caller::Connection(stranger), Some(snapshot(1.0, 0.0, 0.0, 0))),
            Err(HubError::NotADevice)
        );
        assert!(strict
            .publish_telemetry(Caller::Connection(id), Some(snapshot(1.0, 0.0, 0.0, 0)))
            .is_ok());
        assert!(strict
            .publish_telemetry(Caller::External, Some(snapshot(1.0, 0.0, 0.0, 0)))
            .is_ok());
    }

    #[test]
    fn metrics_follow_membership() {
        let registry = new_registry();
        let hub = hub().with_metrics(HubMetrics::new(&registry).unwrap());
        let (id, _) = connect(&hub);
        hub.register_frontend(id, "u1").unwrap();
        hub.publish_telemetry(Caller::External, Some(snapshot(5.0, 0.0, 0.0, 0)))
            .unwrap();

        let text = TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("carlink_group_members{group=\"frontend-group\"} 1"));
        assert!(text.contains("carlink_telemetry_updates_total 1"));

        hub.on_disconnect(id, DisconnectCause::Closed);
        let text = TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("carlink_connections 0"));
    }

    #[test]
    fn concurrent_joins_and_broadcasts_never_double_deliver() {
        let hub = Arc::new(hub());
        let (steady, steady_sink) = connect(&hub);
        hub.register_frontend(steady, "steady").unwrap();

        let churn = {
            let hub = Arc::clone(&hub);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let id = ConnectionId::new();
                    hub.on_connect(id, Arc::new(RecordingSink::default())).unwrap();
                    hub.register_frontend(id, "churn").unwrap();
                    hub.on_disconnect(id, DisconnectCause::Closed);
                }
            })
        };
        for i in 0..200 {
            hub.publish_telemetry(Caller::External, Some(snapshot(i as f64, 0.0, 0.0, i)))
                .unwrap();
        }
        churn.join().unwrap();

        assert_eq!(steady_sink.take().len(), 200);
        assert_eq!(hub.members(Group::Frontends), vec![steady]);
    }
}
