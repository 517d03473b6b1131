//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::fleet::FleetError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// A remote master answered with an error or could not be reached
    Upstream(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::NotFound(_) => ApiError::NotFound(err.to_string()),
            FleetError::Validation(msg) | FleetError::Unreachable(msg) => {
                ApiError::BadRequest(msg)
            }
            FleetError::Conflict(msg) => ApiError::Conflict(msg),
            FleetError::Store(StoreError::Database(err)) => ApiError::DatabaseError(err),
            FleetError::Store(other) => ApiError::InternalError(other.to_string()),
            FleetError::Client(err) => ApiError::Upstream(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use butler_client::ClientError;

    #[test]
    fn test_fleet_error_mapping() {
        let status = |err: FleetError| ApiError::from(err).into_response().status();

        assert_eq!(
            status(FleetError::NotFound("Instance x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(FleetError::Unreachable("Cannot connect".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(FleetError::Conflict("taken".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(FleetError::Client(ClientError::from_status(500, "boom"))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_not_found_message() {
        match ApiError::from(FleetError::NotFound("Instance 42".to_string())) {
            ApiError::NotFound(msg) => assert_eq!(msg, "Instance 42 not found"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
