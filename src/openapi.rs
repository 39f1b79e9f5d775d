use crate::entities::order::OrderStatus;
use crate::entities::product::ProductStatus;
use crate::errors::{CouponRejection, ErrorResponse};
use crate::handlers;
use crate::services::checkout::{CheckoutOutcome, CheckoutRequest, CustomerInfo};
use crate::services::pricing::CartLine;
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::products::list_products,
        handlers::products::get_product,
        handlers::checkout::create_checkout,
        handlers::coupons::validate_coupon,
        handlers::orders::track_order,
        handlers::orders::order_by_session,
        handlers::orders::update_order_status,
        handlers::orders::cancel_order,
        handlers::webhooks::payment_webhook,
    ),
    components(schemas(
        ErrorResponse,
        CouponRejection,
        ProductStatus,
        OrderStatus,
        CartLine,
        CustomerInfo,
        CheckoutRequest,
        CheckoutOutcome,
        handlers::products::ProductResponse,
        handlers::coupons::ValidateCouponRequest,
        handlers::coupons::ValidateCouponResponse,
        handlers::orders::OrderItemResponse,
        handlers::orders::OrderResponse,
        handlers::orders::UpdateStatusRequest,
    )),
    tags(
        (name = "products", description = "Catalog reads"),
        (name = "checkout", description = "Checkout orchestration"),
        (name = "coupons", description = "Coupon validation"),
        (name = "orders", description = "Order tracking and back-office transitions"),
        (name = "webhooks", description = "Payment gateway callbacks"),
    ),
    info(
        title = "Storefront API",
        description = "Order, inventory, and coupon consistency core for the storefront",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
