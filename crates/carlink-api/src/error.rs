//! ---
//! carlink_section: "05-external-interfaces"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "REST boundary and combined relay server."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use carlink_hub::HubError;
use tracing::{debug, error};

use crate::rest::ApiResponse;
use crate::validation::ValidationError;

/// Rejections produced by the REST handlers.
///
/// Only the `Display` text of client-facing variants is sent to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A field failed boundary validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The body was not valid JSON for the endpoint.
    #[error("request body is not valid for this endpoint")]
    Malformed(String),
    /// The body was JSON `null` where a payload is required.
    #[error("request body is required")]
    MissingPayload,
    /// Nothing has been stored yet.
    #[error("{0}")]
    NotFound(&'static str),
    /// The hub refused the operation.
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Malformed(_) | ApiError::MissingPayload => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Hub(HubError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            ApiError::Hub(HubError::NotADevice | HubError::RoleConflict(_)) => {
                StatusCode::FORBIDDEN
            }
            ApiError::Hub(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Malformed(detail) => {
                debug!(detail = %detail, "malformed request body");
                self.to_string()
            }
            ApiError::Hub(err) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %err, "hub failure while serving request");
                "request could not be processed".to_owned()
            }
            _ => self.to_string(),
        };
        (status, Json(ApiResponse::rejected(message))).into_response()
    }
}
