use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "message": "Insufficient stock for product 550e8400-e29b-41d4-a716-446655440000: requested 3, available 1",
    "timestamp": "2025-06-01T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Reason a coupon code was rejected. Rules are evaluated in this order;
/// the first failing rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum CouponRejection {
    NotFound,
    Inactive,
    Expired,
    LimitReached,
    BelowMinimum { min_order: Decimal },
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "coupon code not found"),
            Self::Inactive => write!(f, "coupon is no longer active"),
            Self::Expired => write!(f, "coupon has expired"),
            Self::LimitReached => write!(f, "coupon usage limit reached"),
            Self::BelowMinimum { min_order } => {
                write!(f, "order subtotal below coupon minimum of {}", min_order)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Price mismatch: {0}")]
    PriceMismatch(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Pre-order limit exceeded: {0}")]
    PreOrderLimitExceeded(String),

    #[error("Coupon rejected: {0}")]
    CouponError(CouponRejection),

    #[error("Invalid order status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::BadRequest(_) | Self::CouponError(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PriceMismatch(_)
            | Self::InsufficientStock(_)
            | Self::PreOrderLimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::PaymentGatewayError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// text to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::PaymentGatewayError(_) => "Payment gateway unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn business_rejections_map_to_unprocessable_entity() {
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::PriceMismatch("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::PreOrderLimitExceeded("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn security_and_infra_errors_hide_details() {
        assert_eq!(
            ServiceError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        let db = ServiceError::DatabaseError(DbErr::Custom("secret table".into()));
        assert_eq!(db.response_message(), "Database error");
    }

    #[test]
    fn coupon_rejection_carries_minimum() {
        let err = ServiceError::CouponError(CouponRejection::BelowMinimum {
            min_order: dec!(30),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.response_message().contains("30"));
    }
}
