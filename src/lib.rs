/*!
 * Storefront API: the order, inventory, and coupon consistency core behind
 * the shop. Checkout creates PENDING orders and payment sessions; the
 * signed confirmation webhook drives the order state machine and commits
 * stock, pre-order, promo, and coupon counters exactly once.
 */

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod payments;
pub mod rate_limiter;
pub mod services;

use axum::{extract::State, response::Json, routing::get, routing::post, routing::put, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::db::DbPool;
use crate::rate_limiter::RateLimiter;
use crate::services::{CheckoutService, OrderStatusService, ReconciliationService};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub checkout: Arc<CheckoutService>,
    pub order_status: Arc<OrderStatusService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Standard JSON envelope for non-resource endpoints.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Catalog
        .route("/products", get(handlers::products::list_products))
        .route("/products/:id", get(handlers::products::get_product))
        // Checkout
        .route("/checkout", post(handlers::checkout::create_checkout))
        // Coupons
        .route("/coupons/validate", post(handlers::coupons::validate_coupon))
        // Orders
        .route("/orders", get(handlers::orders::track_order))
        .route("/orders/by-session", get(handlers::orders::order_by_session))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        // Payment webhook (no auth, signature-verified)
        .route("/webhooks/payment", post(handlers::webhooks::payment_webhook))
        // Machine-readable API description
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "service": "storefront-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(health_data)))
}
