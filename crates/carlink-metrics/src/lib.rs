//! ---
//! carlink_section: "06-observability"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Metrics collection and export utilities."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let local_addr = listener.local_addr()?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "carlinkd_starts_total",
            "Total number of times the relay daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "carlinkd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Counters and gauges maintained by the connection hub.
#[derive(Clone, Debug)]
pub struct HubMetrics {
    connections: IntGauge,
    group_members: IntGaugeVec,
    deliveries: IntCounterVec,
    telemetry_updates: IntCounter,
    commands: IntCounterVec,
}

impl HubMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let connections = IntGauge::with_opts(Opts::new(
            "carlink_connections",
            "Live persistent connections held by the hub",
        ))?;
        registry.register(Box::new(connections.clone()))?;

        let group_members = IntGaugeVec::new(
            Opts::new("carlink_group_members", "Current member count per broadcast group"),
            &["group"],
        )?;
        registry.register(Box::new(group_members.clone()))?;

        let deliveries = IntCounterVec::new(
            Opts::new(
                "carlink_deliveries_total",
                "Per-recipient delivery attempts by event and outcome",
            ),
            &["event", "outcome"],
        )?;
        registry.register(Box::new(deliveries.clone()))?;

        let telemetry_updates = IntCounter::with_opts(Opts::new(
            "carlink_telemetry_updates_total",
            "Telemetry snapshots accepted into the cache",
        ))?;
        registry.register(Box::new(telemetry_updates.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new("carlink_commands_total", "Commands dispatched to the device group"),
            &["kind"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        Ok(Self {
            connections,
            group_members,
            deliveries,
            telemetry_updates,
            commands,
        })
    }

    pub fn set_connections(&self, count: usize) {
        self.connections.set(count as i64);
    }

    pub fn set_group_members(&self, group: &str, count: usize) {
        self.group_members
            .with_label_values(&[group])
            .set(count as i64);
    }

    pub fn record_delivery(&self, event: &str, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.deliveries.with_label_values(&[event, outcome]).inc();
    }

    pub fn record_telemetry_update(&self) {
        self.telemetry_updates.inc();
    }

    pub fn record_command(&self, kind: &str) {
        self.commands.with_label_values(&[kind]).inc();
    }
}

pub use prometheus;
