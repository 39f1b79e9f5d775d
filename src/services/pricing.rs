use crate::entities::product::{self, ProductStatus};
use crate::errors::ServiceError;
use crate::services::coupons::CouponService;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Orders at or above this subtotal ship free.
pub const SHIPPING_FREE_THRESHOLD: Decimal = dec!(50);
/// Flat shipping fee below the free threshold.
pub const SHIPPING_FLAT_FEE: Decimal = dec!(5.90);
/// Largest accepted gap between the client-displayed unit price and the
/// catalog price.
pub const PRICE_TOLERANCE: Decimal = dec!(0.01);

/// One cart line as submitted by the client. The unit price is only used
/// for tamper detection; charged amounts always come from the catalog.
#[derive(Debug, Clone, serde::Serialize, Deserialize, utoipa::ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Option<Decimal>,
}

/// A cart line joined to its authoritative product row.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product: product::Model,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// Authoritative totals for a cart, recomputed from catalog state.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub is_pre_order: bool,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Derives subtotal, shipping, discount, and total for a cart. Nothing
/// client-supplied is trusted beyond product ids and quantities.
pub struct PricingService;

impl PricingService {
    /// Prices a cart against the catalog. An unusable coupon is a silent
    /// no-discount, not a failure; availability and tamper checks are
    /// hard failures with no side effects.
    #[instrument(skip(conn, lines), fields(line_count = lines.len()))]
    pub async fn price_cart<C: ConnectionTrait>(
        conn: &C,
        lines: &[CartLine],
        coupon_code: Option<&str>,
    ) -> Result<PricedCart, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;
        let mut is_pre_order = false;
        let mut estimated_delivery: Option<DateTime<Utc>> = None;

        for line in lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "Quantity must be positive".to_string(),
                ));
            }
            let item = product::Entity::find_by_id(line.product_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;

            if let Some(client_price) = line.unit_price {
                if (client_price - item.current_price).abs() > PRICE_TOLERANCE {
                    return Err(ServiceError::PriceMismatch(format!(
                        "Price for {} has changed",
                        item.name
                    )));
                }
            }

            Self::check_availability(&item, line.quantity)?;

            if item.status == ProductStatus::PreOrder {
                is_pre_order = true;
                // The order ships once the latest pre-order line arrives.
                estimated_delivery = match (estimated_delivery, item.available_date) {
                    (Some(current), Some(candidate)) => Some(current.max(candidate)),
                    (None, candidate) => candidate,
                    (current, None) => current,
                };
            }

            let total_price = item.current_price * Decimal::from(line.quantity);
            subtotal += total_price;
            priced.push(PricedLine {
                unit_price: item.current_price,
                total_price,
                quantity: line.quantity,
                product: item,
            });
        }
        subtotal = subtotal.round_dp(2);

        let shipping = Self::shipping_fee(subtotal);

        let mut discount = Decimal::ZERO;
        let mut applied_code = None;
        if let Some(code) = coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            match CouponService::validate(conn, code, subtotal).await {
                Ok(check) => {
                    discount = check.discount;
                    applied_code = Some(check.code);
                }
                Err(ServiceError::CouponError(reason)) => {
                    debug!(code, %reason, "Coupon unusable, pricing without discount");
                }
                Err(e) => return Err(e),
            }
        }

        let total = (subtotal + shipping - discount).max(Decimal::ZERO).round_dp(2);
        Ok(PricedCart {
            lines: priced,
            subtotal,
            shipping,
            discount,
            total,
            coupon_code: applied_code,
            is_pre_order,
            estimated_delivery,
        })
    }

    pub fn shipping_fee(subtotal: Decimal) -> Decimal {
        if subtotal >= SHIPPING_FREE_THRESHOLD {
            Decimal::ZERO
        } else {
            SHIPPING_FLAT_FEE
        }
    }

    fn check_availability(item: &product::Model, quantity: i32) -> Result<(), ServiceError> {
        match item.status {
            ProductStatus::InStock => {
                if item.stock < quantity {
                    Err(ServiceError::InsufficientStock(format!(
                        "Only {} units of {} left",
                        item.stock, item.name
                    )))
                } else {
                    Ok(())
                }
            }
            ProductStatus::PreOrder => {
                if let Some(limit) = item.pre_order_limit {
                    if item.pre_order_count + quantity > limit {
                        return Err(ServiceError::PreOrderLimitExceeded(format!(
                            "Pre-order limit reached for {}",
                            item.name
                        )));
                    }
                }
                Ok(())
            }
            ProductStatus::OutOfStock => Err(ServiceError::InsufficientStock(format!(
                "{} is out of stock",
                item.name
            ))),
        }
    }
}
