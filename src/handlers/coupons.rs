use crate::errors::ServiceError;
use crate::handlers::enforce_rate_limit;
use crate::services::coupons::CouponService;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateCouponResponse {
    pub valid: bool,
    pub code: String,
    pub discount: Decimal,
}

/// Pre-checkout coupon check for the cart UI. Validation never burns a
/// use; redemption happens at confirmed payment.
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon is usable", body = ValidateCouponResponse),
        (status = 400, description = "Coupon rejected, reason in message", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse)
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, ServiceError> {
    enforce_rate_limit(&state.rate_limiter, &headers, "coupon").await?;
    request.validate()?;
    if request.subtotal < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Subtotal must not be negative".to_string(),
        ));
    }
    let check = CouponService::validate(state.db.as_ref(), &request.code, request.subtotal).await?;
    Ok(Json(ValidateCouponResponse {
        valid: true,
        code: check.code,
        discount: check.discount,
    }))
}
