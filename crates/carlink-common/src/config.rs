//! ---
//! carlink_section: "01-core-functionality"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Shared primitives and utilities for the relay runtime."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use carlink_msg::DEFAULT_HORN_DURATION_MS;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::logging::LogFormat;

fn default_server_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_hub_path() -> String {
    "/carhub".to_owned()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:4200".to_owned(),
        "https://iotcarc.netlify.app".to_owned(),
    ]
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_client_timeout_secs() -> u64 {
    30
}

fn default_max_horn_duration_ms() -> u64 {
    5000
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Primary configuration object for the relay daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults apply.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CARLINK_CONFIG";

    /// Load configuration from disk, respecting the `CARLINK_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `CARLINK_CONFIG` path must exist. Otherwise the first
    /// existing candidate wins, and defaults apply when none exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        let inspected = candidates
            .iter()
            .map(|p| p.as_ref().display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        warn!(%inspected, "no configuration file found; using built-in defaults");
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.cors.validate()?;
        self.hub.validate()?;
        self.commands.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Listener serving both the REST routes and the hub endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_server_listen(),
            hub_path: default_hub_path(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.hub_path.starts_with('/') || self.hub_path.len() < 2 {
            return Err(anyhow!(
                "server.hub_path '{}' must be an absolute path such as /carhub",
                self.hub_path
            ));
        }
        if self.hub_path.starts_with("/api/") {
            return Err(anyhow!(
                "server.hub_path '{}' collides with the REST routes",
                self.hub_path
            ));
        }
        Ok(())
    }
}

/// Cross-origin policy applied uniformly to REST and hub endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CorsMode {
    /// Any origin, any method, any header.
    Permissive,
    /// Only `allowed_origins`.
    #[default]
    AllowList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub mode: CorsMode,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            mode: CorsMode::default(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl CorsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mode == CorsMode::AllowList && self.allowed_origins.is_empty() {
            return Err(anyhow!(
                "cors.allowed_origins must list at least one origin in allow-list mode"
            ));
        }
        Ok(())
    }
}

/// Hub behaviour knobs. The two role checks default to off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-connection outbound queue length.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default)]
    pub exclusive_roles: bool,
    #[serde(default)]
    pub devices_only_telemetry: bool,
    /// Interval between server pings on idle connections.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Silence after which a connection is dropped from every group.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            exclusive_roles: false,
            devices_only_telemetry: false,
            keepalive_secs: default_keepalive_secs(),
            client_timeout_secs: default_client_timeout_secs(),
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.outbound_buffer == 0 {
            return Err(anyhow!("hub.outbound_buffer must be greater than zero"));
        }
        if self.keepalive_secs == 0 {
            return Err(anyhow!("hub.keepalive_secs must be greater than zero"));
        }
        if self.client_timeout_secs <= self.keepalive_secs {
            return Err(anyhow!(
                "hub.client_timeout_secs ({}) must exceed hub.keepalive_secs ({})",
                self.client_timeout_secs,
                self.keepalive_secs
            ));
        }
        Ok(())
    }
}

/// Limits applied by the REST command endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_max_horn_duration_ms")]
    pub max_horn_duration_ms: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            max_horn_duration_ms: default_max_horn_duration_ms(),
        }
    }
}

impl CommandsConfig {
    pub fn validate(&self) -> Result<()> {
        if i128::from(self.max_horn_duration_ms) < i128::from(DEFAULT_HORN_DURATION_MS) {
            return Err(anyhow!(
                "commands.max_horn_duration_ms must be at least {} ms",
                DEFAULT_HORN_DURATION_MS
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// `EnvFilter` directives used when neither `CARLINK_LOG` nor `RUST_LOG` is set.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.server.hub_path, "/carhub");
        assert_eq!(config.server.listen.port(), 5000);
        assert_eq!(config.cors.mode, CorsMode::AllowList);
        assert!(config
            .cors
            .allowed_origins
            .contains(&"http://localhost:4200".to_owned()));
        assert!(!config.hub.exclusive_roles);
        assert!(!config.hub.devices_only_telemetry);
        assert_eq!(config.commands.max_horn_duration_ms, 5000);
    }

    #[test]
    fn sections_override_defaults() {
        let config: AppConfig = r#"
            [server]
            listen = "127.0.0.1:7000"
            hub_path = "/hub"

            [cors]
            mode = "permissive"

            [hub]
            outbound_buffer = 8
            exclusive_roles = true

            [logging]
            format = "pretty"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.server.listen.port(), 7000);
        assert_eq!(config.server.hub_path, "/hub");
        assert_eq!(config.cors.mode, CorsMode::Permissive);
        assert_eq!(config.hub.outbound_buffer, 8);
        assert!(config.hub.exclusive_roles);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!("[server]\nhub_path = \"carhub\"".parse::<AppConfig>().is_err());
        assert!("[server]\nhub_path = \"/api/hub\"".parse::<AppConfig>().is_err());
        assert!("[hub]\noutbound_buffer = 0".parse::<AppConfig>().is_err());
        assert!("[hub]\nkeepalive_secs = 0".parse::<AppConfig>().is_err());
        assert!("[hub]\nkeepalive_secs = 10\nclient_timeout_secs = 10"
            .parse::<AppConfig>()
            .is_err());
        assert!("[cors]\nallowed_origins = []".parse::<AppConfig>().is_err());
        assert!("[commands]\nmax_horn_duration_ms = 10"
            .parse::<AppConfig>()
            .is_err());
    }

    #[test]
    fn horn_limit_floor_tracks_command_default() {
        let floor = DEFAULT_HORN_DURATION_MS as u64;
        let at_floor = format!("[commands]\nmax_horn_duration_ms = {floor}");
        let below_floor = format!("[commands]\nmax_horn_duration_ms = {}", floor - 1);
        assert!(at_floor.parse::<AppConfig>().is_ok());
        assert!(below_floor.parse::<AppConfig>().is_err());
    }

    #[test]
    fn liveness_timings_have_defaults() {
        let hub = HubConfig::default();
        assert_eq!(hub.keepalive_secs, 15);
        assert_eq!(hub.client_timeout_secs, 30);
    }

    #[test]
    fn first_existing_candidate_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("carlinkd.toml");
        let mut file = fs::File::create(&present).unwrap();
        writeln!(file, "[metrics]\nenabled = false").unwrap();

        let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
        assert_eq!(loaded.source, Some(present));
        assert!(!loaded.config.metrics.enabled);
    }

    #[test]
    fn defaults_apply_without_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_with_source(&[dir.path().join("absent.toml")]).unwrap();
        assert!(loaded.source.is_none());
        assert!(loaded.config.metrics.enabled);
    }
}
