//! ---
//! carlink_section: "01-core-functionality"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Shared primitives and utilities for the relay runtime."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CARLINK_LOG";

/// Relay defaults: hub lifecycle at info, noisy transport crates at warn.
pub const DEFAULT_DIRECTIVES: &str =
    "info,carlink_hub=info,carlink_api=info,tower_http=warn,hyper=warn,tungstenite=warn";

// Writers stop flushing once their guards drop, so they live for the process.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Where the active filter directives came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    CarlinkLog,
    RustLog,
    Config,
    Default,
}

/// Pick filter directives: `CARLINK_LOG`, then `RUST_LOG`, then
/// `[logging] filter`, then [`DEFAULT_DIRECTIVES`]. Blank values are skipped.
pub fn select_directives(
    carlink_log: Option<String>,
    rust_log: Option<String>,
    configured: Option<&str>,
) -> (String, FilterSource) {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if present(&carlink_log) {
        return (carlink_log.unwrap_or_default(), FilterSource::CarlinkLog);
    }
    if present(&rust_log) {
        return (rust_log.unwrap_or_default(), FilterSource::RustLog);
    }
    match configured.filter(|v| !v.trim().is_empty()) {
        Some(directives) => (directives.to_owned(), FilterSource::Config),
        None => (DEFAULT_DIRECTIVES.to_owned(), FilterSource::Default),
    }
}

fn stdout_layer(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .compact()
            .with_writer(writer)
            .boxed(),
    }
}

/// Install the global subscriber: stdout in the configured format plus a
/// daily rolling JSON file named after `service_name` (or `file_prefix`).
///
/// An invalid directive string falls back to [`DEFAULT_DIRECTIVES`] and is
/// reported once the subscriber is up. Repeated calls keep the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = GUARDS.set([file_guard, stdout_guard]);

    let (directives, source) = select_directives(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        config.filter.as_deref(),
    );
    let (filter, rejected) = match EnvFilter::try_new(&directives) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(DEFAULT_DIRECTIVES), Some(err)),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(stdout_layer(config.format, stdout_writer))
        .with(file_layer)
        .with(filter)
        .try_init()
        .ok();

    if let Some(err) = rejected {
        warn!(directives = %directives, source = ?source, error = %err, "invalid log filter; using relay defaults");
    }
    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, filter_source = ?source, "tracing initialised");
    Ok(())
}
