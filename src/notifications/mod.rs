use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Line shown in customer-facing notifications; built from the frozen
/// order-item snapshots, never from the live catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLine {
    pub name: String,
    pub weight: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub customer_name: String,
    pub email: String,
    pub items: Vec<NotificationLine>,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub is_pre_order: bool,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityNotice {
    pub order_number: String,
    pub customer_name: String,
    pub email: String,
    pub items: Vec<NotificationLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingNotice {
    pub order_number: String,
    pub customer_name: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// External notification collaborator (email). Callers treat every method as
/// fire-and-forget: failures are logged and never propagated into order
/// processing.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmation(&self, msg: OrderConfirmation) -> Result<(), NotificationError>;
    async fn availability_notice(&self, msg: AvailabilityNotice) -> Result<(), NotificationError>;
    async fn shipping_notice(&self, msg: ShippingNotice) -> Result<(), NotificationError>;
}

/// Notifier that records deliveries in the log stream only. Stands in for
/// the real mail collaborator in development and tests.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmation(&self, msg: OrderConfirmation) -> Result<(), NotificationError> {
        info!(
            order_number = %msg.order_number,
            email = %msg.email,
            total = %msg.total,
            is_pre_order = msg.is_pre_order,
            "Order confirmation notification"
        );
        Ok(())
    }

    async fn availability_notice(&self, msg: AvailabilityNotice) -> Result<(), NotificationError> {
        info!(
            order_number = %msg.order_number,
            email = %msg.email,
            items = msg.items.len(),
            "Pre-order availability notification"
        );
        Ok(())
    }

    async fn shipping_notice(&self, msg: ShippingNotice) -> Result<(), NotificationError> {
        info!(
            order_number = %msg.order_number,
            email = %msg.email,
            "Shipping notification"
        );
        Ok(())
    }
}
