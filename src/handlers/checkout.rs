use crate::errors::ServiceError;
use crate::handlers::enforce_rate_limit;
use crate::services::checkout::{CheckoutOutcome, CheckoutRequest};
use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Pending order and payment session created", body = CheckoutOutcome),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Price, stock, or pre-order rejection", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse)
    ),
    tag = "checkout"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ServiceError> {
    enforce_rate_limit(&state.rate_limiter, &headers, "checkout").await?;
    let outcome = state.checkout.create_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
