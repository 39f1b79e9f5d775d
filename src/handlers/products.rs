use crate::entities::product::{self, ProductStatus};
use crate::errors::ServiceError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{EntityTrait, QueryOrder};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Catalog view of a product. Counters stay internal; the storefront only
/// needs availability and pricing.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub weight: String,
    pub status: ProductStatus,
    pub in_stock: bool,
    pub stock: i32,
    pub original_price: Decimal,
    pub current_price: Decimal,
    pub has_promo: bool,
    pub available_date: Option<DateTime<Utc>>,
}

impl From<product::Model> for ProductResponse {
    fn from(p: product::Model) -> Self {
        let in_stock = match p.status {
            ProductStatus::InStock => p.stock > 0,
            ProductStatus::PreOrder => true,
            ProductStatus::OutOfStock => false,
        };
        Self {
            id: p.id,
            name: p.name,
            weight: p.weight,
            status: p.status,
            in_stock,
            stock: p.stock,
            original_price: p.original_price,
            current_price: p.current_price,
            has_promo: p.has_promo,
            available_date: p.available_date,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    responses(
        (status = 200, description = "Catalog listing", body = [ProductResponse])
    ),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductResponse>>, ServiceError> {
    let products = product::Entity::find()
        .order_by_asc(product::Column::CreatedAt)
        .all(state.db.as_ref())
        .await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product detail", body = ProductResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductResponse>, ServiceError> {
    let item = product::Entity::find_by_id(id)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
    Ok(Json(item.into()))
}
