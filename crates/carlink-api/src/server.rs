//! ---
//! carlink_section: "05-external-interfaces"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "REST boundary and combined relay server."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use carlink_common::config::{AppConfig, CorsConfig, CorsMode};
use carlink_hub::{hub_router, CarHub, EndpointSettings};
use carlink_telemetry::TelemetryCache;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::rest::{rest_router, ApiState};

/// Build the cross-origin layer shared by REST routes and the hub endpoint.
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    match config.mode {
        CorsMode::Permissive => Ok(CorsLayer::permissive()),
        CorsMode::AllowList => {
            let origins = config
                .allowed_origins
                .iter()
                .map(|origin| {
                    let origin = origin.trim().trim_end_matches('/');
                    HeaderValue::from_str(origin)
                        .with_context(|| format!("invalid cors origin '{origin}'"))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true))
        }
    }
}

/// Builder for the single listener that serves REST routes and the hub.
pub struct RelayServerBuilder {
    listen: SocketAddr,
    hub_path: String,
    endpoint: EndpointSettings,
    cors: CorsConfig,
    state: Arc<ApiState>,
    hub: Arc<CarHub>,
}

impl RelayServerBuilder {
    /// Construct a builder from the application configuration.
    pub fn new(config: &AppConfig, hub: Arc<CarHub>, telemetry: Arc<dyn TelemetryCache>) -> Self {
        let state = Arc::new(ApiState::new(
            Arc::clone(&hub),
            telemetry,
            config.commands.clone(),
        ));
        Self {
            listen: config.server.listen,
            hub_path: config.server.hub_path.clone(),
            endpoint: EndpointSettings::from(&config.hub),
            cors: config.cors.clone(),
            state,
            hub,
        }
    }

    /// Override the listening address.
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    /// Assemble the full router without binding.
    pub fn router(&self) -> Result<Router> {
        let cors = cors_layer(&self.cors)?;
        Ok(Router::new()
            .merge(rest_router(Arc::clone(&self.state)))
            .merge(hub_router(
                Arc::clone(&self.hub),
                &self.hub_path,
                self.endpoint,
            ))
            .layer(cors)
            .layer(TraceLayer::new_for_http()))
    }

    /// Spawn the server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> Result<RelayServerHandle> {
        let router = self.router()?;
        let listener = TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("failed to bind relay listener {}", self.listen))?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, hub_path = %self.hub_path, "relay server listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "relay server exited with error");
            }
        });

        Ok(RelayServerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`RelayServerBuilder::spawn`].
pub struct RelayServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RelayServerHandle {
    /// Socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}
