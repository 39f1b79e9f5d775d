use crate::errors::ServiceError;
use crate::payments::signature::SIGNATURE_HEADER;
use crate::services::reconciliation::ReconcileOutcome;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::warn;

/// Payment-confirmation webhook. Verification runs on the raw body, so
/// the payload must not be deserialized before it is checked. Everything
/// after the signature check is acknowledged with 200 so the gateway
/// stops retrying deliveries we can never use.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/payment",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery acknowledged"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Signature verification failed", body = crate::errors::ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature_header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServiceError::InvalidSignature)?;

    let outcome = state
        .reconciliation
        .process_event(&body, signature_header)
        .await?;

    let received = match outcome {
        ReconcileOutcome::Completed { ref order_number } => {
            json!({ "received": true, "order_number": order_number })
        }
        ReconcileOutcome::AlreadyProcessed => json!({ "received": true, "duplicate": true }),
        ReconcileOutcome::OrphanSession => {
            warn!("Acknowledged confirmation for unknown session");
            json!({ "received": true })
        }
        ReconcileOutcome::Ignored => json!({ "received": true }),
    };
    Ok(Json(received))
}
