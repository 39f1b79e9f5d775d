use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::handlers::enforce_rate_limit;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_name: String,
    pub product_weight: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub coupon_code: Option<String>,
    pub total: Decimal,
    pub is_pre_order: bool,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

fn order_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        order_number: order.order_number,
        status: order.status,
        email: order.email,
        first_name: order.first_name,
        last_name: order.last_name,
        subtotal: order.subtotal,
        shipping: order.shipping,
        discount: order.discount,
        coupon_code: order.coupon_code,
        total: order.total,
        is_pre_order: order.is_pre_order,
        estimated_delivery: order.estimated_delivery,
        paid_at: order.paid_at,
        shipped_at: order.shipped_at,
        delivered_at: order.delivered_at,
        created_at: order.created_at,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                product_name: item.product_name,
                product_weight: item.product_weight,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            })
            .collect(),
    }
}

async fn load_items(
    state: &AppState,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(state.db.as_ref())
        .await?)
}

#[derive(Debug, Deserialize)]
pub struct TrackOrderQuery {
    pub email: String,
    pub order_number: String,
}

/// Customer order tracking. Both the email and the order number must
/// match, so knowing an order number alone is not enough to read the
/// order.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("email" = String, Query, description = "Email the order was placed with"),
        ("order_number" = String, Query, description = "Order number from the confirmation")
    ),
    responses(
        (status = 200, description = "Order with item snapshots", body = OrderResponse),
        (status = 404, description = "No order for this email and number", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn track_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TrackOrderQuery>,
) -> Result<Json<OrderResponse>, ServiceError> {
    enforce_rate_limit(&state.rate_limiter, &headers, "track").await?;
    let found = order::Entity::find()
        .filter(order::Column::OrderNumber.eq(query.order_number.trim()))
        .filter(order::Column::Email.eq(query.email.trim().to_lowercase()))
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
    let items = load_items(&state, found.id).await?;
    Ok(Json(order_response(found, items)))
}

#[derive(Debug, Deserialize)]
pub struct BySessionQuery {
    pub session_id: String,
}

/// Gateway session ids look like `cs_live_a1B2...`; anything shorter than
/// 30 chars cannot be one and is rejected before touching storage.
fn valid_session_id(id: &str) -> bool {
    id.starts_with("cs_") && (30..=128).contains(&id.len())
}

/// Confirmation-page lookup by payment session id. The id shape is
/// checked before touching storage; session ids are unguessable, which is
/// the access control here, so the lookup is also rate limited against
/// guessing.
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-session",
    params(("session_id" = String, Query, description = "Payment session id")),
    responses(
        (status = 200, description = "Order for this payment session", body = OrderResponse),
        (status = 400, description = "Malformed session id", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many lookups", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn order_by_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BySessionQuery>,
) -> Result<Json<OrderResponse>, ServiceError> {
    enforce_rate_limit(&state.rate_limiter, &headers, "session").await?;
    let session_id = query.session_id.trim();
    if !valid_session_id(session_id) {
        return Err(ServiceError::BadRequest(
            "Invalid session id".to_string(),
        ));
    }
    let found = order::Entity::find()
        .filter(order::Column::PaymentSessionId.eq(session_id))
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
    let items = load_items(&state, found.id).await?;
    Ok(Json(order_response(found, items)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Back-office status update. Transitions outside the state machine are
/// rejected with 409.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Order after the transition", body = OrderResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let updated = state.order_status.update_status(id, request.status).await?;
    let items = load_items(&state, updated.id).await?;
    Ok(Json(order_response(updated, items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Cancelled order", body = OrderResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not cancellable", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let cancelled = state.order_status.cancel_order(id).await?;
    let items = load_items(&state, cancelled.id).await?;
    Ok(Json(order_response(cancelled, items)))
}
