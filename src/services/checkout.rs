use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{PaymentGateway, SessionLineItem, SessionRequest};
use crate::services::pricing::{CartLine, PricedCart, PricingService};
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Abandoned PENDING orders older than this are swept before a new
/// checkout for the same email.
const STALE_PENDING_MINUTES: i64 = 5;

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CustomerInfo {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, utoipa::ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<CartLine>,
    #[validate]
    pub customer: CustomerInfo,
    pub coupon_code: Option<String>,
}

/// What the client needs to continue: the order reference and where to
/// send the customer to pay.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub session_id: String,
    pub payment_url: String,
    pub total: Decimal,
}

/// Composes pricing, coupon revalidation, the payment gateway, and order
/// persistence into one checkout operation. Inventory is not reserved
/// here; the ledger is only touched at confirmed payment.
pub struct CheckoutService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    base_url: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        base_url: String,
    ) -> Self {
        Self {
            db,
            gateway,
            events,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Creates a PENDING order and its payment session. Any pricing or
    /// availability failure aborts before anything is written; a bad
    /// coupon is dropped silently rather than blocking the purchase.
    #[instrument(skip(self, request), fields(email = %request.customer.email))]
    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;
        // Emails are matched case-insensitively at tracking time, store
        // the canonical form.
        let email = request.customer.email.trim().to_lowercase();

        self.sweep_stale_pending(&email).await?;

        let cart =
            PricingService::price_cart(self.db.as_ref(), &request.items, request.coupon_code.as_deref())
                .await?;

        let order_number = generate_order_number();
        let session = self
            .gateway
            .create_session(self.session_request(&order_number, &email, &cart)?)
            .await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;
        let customer = &request.customer;
        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            status: Set(OrderStatus::Pending),
            email: Set(email.clone()),
            first_name: Set(customer.first_name.clone()),
            last_name: Set(customer.last_name.clone()),
            phone: Set(customer.phone.clone()),
            address: Set(customer.address.clone()),
            city: Set(customer.city.clone()),
            postal_code: Set(customer.postal_code.clone()),
            country: Set(customer.country.clone()),
            subtotal: Set(cart.subtotal),
            shipping: Set(cart.shipping),
            discount: Set(cart.discount),
            coupon_code: Set(cart.coupon_code.clone()),
            total: Set(cart.total),
            payment_session_id: Set(Some(session.session_id.clone())),
            payment_intent_id: Set(None),
            is_pre_order: Set(cart.is_pre_order),
            estimated_delivery: Set(cart.estimated_delivery),
            notification_sent: Set(false),
            paid_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for line in &cart.lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.total_price),
                product_name: Set(line.product.name.clone()),
                product_weight: Set(line.product.weight.clone()),
                product_status: Set(line.product.status.as_str().to_string()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        info!(
            %order_id,
            %order_number,
            total = %cart.total,
            is_pre_order = cart.is_pre_order,
            "Checkout created"
        );
        self.events
            .send_or_log(Event::OrderCreated {
                order_id,
                order_number: order_number.clone(),
            })
            .await;

        Ok(CheckoutOutcome {
            order_id,
            order_number,
            session_id: session.session_id,
            payment_url: session.url,
            total: cart.total,
        })
    }

    fn session_request(
        &self,
        order_number: &str,
        email: &str,
        cart: &PricedCart,
    ) -> Result<SessionRequest, ServiceError> {
        let mut line_items = Vec::with_capacity(cart.lines.len() + 1);
        for line in &cart.lines {
            line_items.push(SessionLineItem {
                name: format!("{} - {}", line.product.name, line.product.weight),
                amount_cents: to_cents(line.unit_price)?,
                quantity: i64::from(line.quantity),
            });
        }
        if cart.shipping > Decimal::ZERO {
            line_items.push(SessionLineItem {
                name: "Shipping".to_string(),
                amount_cents: to_cents(cart.shipping)?,
                quantity: 1,
            });
        }

        Ok(SessionRequest {
            order_number: order_number.to_string(),
            customer_email: email.to_string(),
            line_items,
            discount_cents: to_cents(cart.discount)?,
            total_cents: to_cents(cart.total)?,
            success_url: format!(
                "{}/confirmation?session_id={{CHECKOUT_SESSION_ID}}",
                self.base_url
            ),
            cancel_url: format!("{}/checkout", self.base_url),
        })
    }

    /// Best-effort cleanup of abandoned checkouts for this email. Item
    /// rows go with the order via the cascade constraint.
    async fn sweep_stale_pending(&self, email: &str) -> Result<(), ServiceError> {
        let cutoff = Utc::now() - Duration::minutes(STALE_PENDING_MINUTES);
        let result = order::Entity::delete_many()
            .filter(order::Column::Email.eq(email))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaidAt.is_null())
            .filter(order::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            debug!(email, removed = result.rows_affected, "Swept stale pending orders");
        }
        Ok(())
    }
}

/// `ORD-YYYYMMDD-XXXXXX`, shown to customers and unique-constrained.
fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

fn to_cents(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {}", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_number_shape() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn cents_conversion_rounds_half_up() {
        assert_eq!(to_cents(dec!(5.90)).unwrap(), 590);
        assert_eq!(to_cents(dec!(12.345)).unwrap(), 1235);
        assert_eq!(to_cents(dec!(0)).unwrap(), 0);
    }
}
