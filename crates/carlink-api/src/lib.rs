//! ---
//! carlink_section: "05-external-interfaces"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "REST boundary and combined relay server."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod error;
pub mod rest;
pub mod server;
pub mod validation;

pub use error::ApiError;
pub use rest::{rest_router, ApiResponse, ApiState, HealthResponse};
pub use server::{cors_layer, RelayServerBuilder, RelayServerHandle};
pub use validation::ValidationError;
