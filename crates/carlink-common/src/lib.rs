//! ---
//! carlink_section: "01-core-functionality"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Shared primitives and utilities for the relay runtime."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
//! Shared configuration loading and tracing setup for the CarLink workspace.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CommandsConfig, CorsConfig, CorsMode, HubConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, ServerConfig,
};
pub use logging::{init_tracing, LogFormat};
