//! Error handling module
//!
//! Top-level error type and HTTP response conversion. Server-side failures
//! never leak their cause to the client; the body carries the request's
//! correlation id instead and the cause is logged under it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregation::AggregationError;
use crate::domain::{DomainError, OperationContext};
use crate::reconcile::ReconcileError;
use crate::store::StoreError;

/// Errors surfaced by the HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

/// Kind of failure, used to pick the status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    BadRequest,
    Unavailable,
    Internal,
}

fn domain_kind(e: &DomainError) -> Kind {
    if e.is_input_error() {
        Kind::BadRequest
    } else {
        Kind::Internal
    }
}

fn store_kind(e: &StoreError) -> Kind {
    if e.is_fatal() {
        Kind::Unavailable
    } else {
        Kind::Internal
    }
}

impl AppError {
    fn kind(&self) -> Kind {
        match self {
            AppError::Aggregation(AggregationError::EmptyUserId) => Kind::BadRequest,
            AppError::Aggregation(AggregationError::Domain(e)) => domain_kind(e),
            AppError::Aggregation(AggregationError::Store(e)) => store_kind(e),
            AppError::Aggregation(AggregationError::Task(_)) => Kind::Internal,
            AppError::Reconcile(ReconcileError::EmptyUserId) => Kind::BadRequest,
            AppError::Reconcile(ReconcileError::Domain(e)) => domain_kind(e),
            AppError::Reconcile(ReconcileError::Store(e)) => store_kind(e),
        }
    }

    /// Attach the request's correlation id
    pub fn in_context(self, context: &OperationContext) -> ApiError {
        ApiError {
            error: self,
            correlation_id: context.correlation_id,
        }
    }
}

/// An `AppError` bound to the request it failed
#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub correlation_id: Option<Uuid>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.error;
        let correlation_id = self.correlation_id;

        let (status, body) = match error.kind() {
            Kind::BadRequest => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error.to_string(),
                    error_code: "invalid_request".to_string(),
                    details: None,
                    correlation_id,
                },
            ),
            Kind::Unavailable => {
                tracing::error!(correlation_id = ?correlation_id, error = %error, "Store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse {
                        error: "Service temporarily unavailable".to_string(),
                        error_code: "store_unavailable".to_string(),
                        details: None,
                        correlation_id,
                    },
                )
            }
            Kind::Internal => {
                tracing::error!(correlation_id = ?correlation_id, error = %error, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "Internal server error".to_string(),
                        error_code: "internal_error".to_string(),
                        details: None,
                        correlation_id,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiError {
            error: self,
            correlation_id: None,
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let bad = AppError::from(AggregationError::Domain(DomainError::InvalidMonth(13)));
        assert_eq!(bad.kind(), Kind::BadRequest);

        let empty = AppError::from(ReconcileError::EmptyUserId);
        assert_eq!(empty.kind(), Kind::BadRequest);

        let down = AppError::from(ReconcileError::Store(StoreError::Unavailable("x".into())));
        assert_eq!(down.kind(), Kind::Unavailable);

        let corrupt = AppError::from(AggregationError::Store(StoreError::decode(
            "transaction",
            "t",
            "bad",
        )));
        assert_eq!(corrupt.kind(), Kind::Internal);

        let config = AppError::from(ReconcileError::Domain(DomainError::invalid_ratio(
            "chat", "above 1",
        )));
        assert_eq!(config.kind(), Kind::Internal);
    }

    #[test]
    fn test_internal_body_is_generic() {
        let id = Uuid::new_v4();
        let response = ApiError {
            error: AppError::from(AggregationError::Task("secret detail".to_string())),
            correlation_id: Some(id),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
