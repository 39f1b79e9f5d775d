use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Catalog product carrying the inventory ledger counters: stock for regular
/// sales, `pre_order_count` for pre-orders, `promo_sold` for the limited
/// promotional price tier.
///
/// Invariants maintained by the inventory service: `stock >= 0`,
/// `promo_sold <= promo_limit` while `has_promo`, and
/// `pre_order_count <= pre_order_limit` when a limit is set.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// Weight-variant label shown alongside the name (e.g. "250g").
    pub weight: String,
    pub status: ProductStatus,
    pub stock: i32,
    pub original_price: Decimal,
    pub current_price: Decimal,
    pub has_promo: bool,
    pub promo_limit: Option<i32>,
    pub promo_sold: i32,
    pub pre_order_limit: Option<i32>,
    pub pre_order_count: i32,
    /// Expected availability date for pre-order products.
    pub available_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    #[sea_orm(string_value = "IN_STOCK")]
    InStock,
    #[sea_orm(string_value = "PRE_ORDER")]
    PreOrder,
    #[sea_orm(string_value = "OUT_OF_STOCK")]
    OutOfStock,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "IN_STOCK",
            Self::PreOrder => "PRE_ORDER",
            Self::OutOfStock => "OUT_OF_STOCK",
        }
    }
}
