//! Unified error handling for the HTTP layer.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::db::{RepositoryError, Transient};
use crate::identity::IdentityError;
use crate::inventory::StockError;
use crate::orders::OrderError;
use crate::payments::{ProviderError, WebhookError};

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks permission.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Not enough stock for the request.
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// Webhook signature did not verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Payment provider call failed.
    #[error("Payment provider error: {0}")]
    ExternalService(#[from] ProviderError),

    /// Store temporarily unavailable; the caller should retry.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(RepositoryError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InsufficientStock(_) => StatusCode::CONFLICT,
            Self::ExternalService(ProviderError::Timeout) | Self::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ExternalService(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::ExternalService(_) => "external_service_error",
            Self::Unavailable(_) => "service_unavailable",
            Self::Database(_) | Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log server errors with Sentry
        if matches!(
            self,
            Self::Database(_) | Self::Internal(_) | Self::ExternalService(_) | Self::Unavailable(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::ExternalService(_) => "Payment provider unavailable".to_string(),
            Self::Unavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::InsufficientStock(m)
            | Self::InvalidSignature(m) => m.clone(),
        };

        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        if e.is_transient() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Database(e)
        }
    }
}

impl From<StockError> for AppError {
    fn from(e: StockError) -> Self {
        match e {
            StockError::ProductNotFound(_) => Self::NotFound(e.to_string()),
            StockError::InsufficientStock { .. } => Self::InsufficientStock(e.to_string()),
            StockError::Repository(e) => e.into(),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Validation(m) => Self::Validation(m),
            OrderError::Transition(_) => Self::Validation(e.to_string()),
            OrderError::NotFound(_) => Self::NotFound(e.to_string()),
            OrderError::Forbidden(_) => Self::Forbidden(e.to_string()),
            OrderError::Stock(e) => e.into(),
            OrderError::Repository(e) => e.into(),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::Validation(m) => Self::Validation(m),
            CheckoutError::NotFound(_) => Self::NotFound(e.to_string()),
            CheckoutError::Forbidden(_) => Self::Forbidden(e.to_string()),
            CheckoutError::Stock(e) => e.into(),
            CheckoutError::Price(_) => Self::Internal(e.to_string()),
            CheckoutError::Provider(e) => Self::ExternalService(e),
            CheckoutError::Repository(e) => e.into(),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature(_) => Self::InvalidSignature(e.to_string()),
            WebhookError::InvalidPayload(_) => Self::Validation(e.to_string()),
            WebhookError::Repository(e) => Self::Unavailable(e.to_string()),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        Self::Unauthorized(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// Set the Sentry user context for the current request.
pub fn set_sentry_user(user_id: &str) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use shopwright_core::{OrderId, ProductId};

    use super::*;

    fn get_status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order 123".to_string());
        assert_eq!(err.to_string(), "Not found: order 123");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::Validation("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::ExternalService(ProviderError::Timeout)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(AppError::ExternalService(ProviderError::Request("x".to_string()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_domain_errors_map_to_statuses() {
        assert_eq!(
            get_status(OrderError::Forbidden(OrderId::new(1))),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(OrderError::Stock(StockError::InsufficientStock {
                product_id: ProductId::new(1),
                name: "Lamp".to_string(),
                available: 0,
                requested: 1,
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(CheckoutError::NotFound("order 1".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(WebhookError::Repository(RepositoryError::Unavailable(
                "down".to_string()
            ))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(IdentityError::Expired),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_transient_store_errors_are_unavailable() {
        let down = || RepositoryError::Unavailable("pool exhausted".to_string());
        assert_eq!(
            get_status(OrderError::Repository(down())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(StockError::Repository(down())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(CheckoutError::Repository(down())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(RepositoryError::Database(sqlx::Error::PoolTimedOut)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(OrderError::Repository(RepositoryError::DataCorruption(
                "bad status".to_string()
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(OrderError::Repository(RepositoryError::Database(
                sqlx::Error::RowNotFound
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_details_not_exposed() {
        let response = AppError::Database(RepositoryError::DataCorruption(
            "bad row in orders".to_string(),
        ))
        .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "Internal server error");
    }
}
