use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::entities::product::ProductStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::notifications::{AvailabilityNotice, NotificationLine, Notifier, ShippingNotice};
use crate::services::inventory::InventoryService;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Statuses whose cancellation must hand committed inventory back. A
/// PENDING order never reserved anything, so it releases nothing.
const RELEASE_ON_CANCEL: [OrderStatus; 3] = [
    OrderStatus::Paid,
    OrderStatus::PreOrder,
    OrderStatus::Processing,
];

/// Whether `from → to` is a legal order status transition.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, PreOrder)
            | (Pending, Cancelled)
            | (Paid, Processing)
            | (Paid, Cancelled)
            | (PreOrder, Processing)
            | (PreOrder, Cancelled)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, Delivered)
    )
}

/// Drives order status transitions and their side effects: inventory
/// release on cancellation, timestamp stamping, and the one-shot pre-order
/// availability notification.
pub struct OrderStatusService {
    db: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    events: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DbPool>, notifier: Arc<dyn Notifier>, events: EventSender) -> Self {
        Self {
            db,
            notifier,
            events,
        }
    }

    /// Transitions an order to `new_status`, applying all transition side
    /// effects atomically with the status change. Notifications go out
    /// only after the transaction commits.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let current = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let old_status = current.status;

        if !can_transition(old_status, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: old_status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        if new_status == OrderStatus::Cancelled && RELEASE_ON_CANCEL.contains(&old_status) {
            Self::release_items(&txn, &items).await?;
        }

        // Availability notice fires at most once per pre-order, on the
        // first transition out of PRE_ORDER toward fulfilment.
        let notify_available = current.is_pre_order
            && old_status == OrderStatus::PreOrder
            && matches!(new_status, OrderStatus::Processing | OrderStatus::Shipped)
            && !current.notification_sent;

        let now = Utc::now();
        let mut active: order::ActiveModel = current.clone().into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(now));
        match new_status {
            OrderStatus::Paid | OrderStatus::PreOrder => {
                if current.paid_at.is_none() {
                    active.paid_at = Set(Some(now));
                }
            }
            OrderStatus::Shipped => active.shipped_at = Set(Some(now)),
            OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
            _ => {}
        }
        if notify_available {
            active.notification_sent = Set(true);
        }
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(
            %order_id,
            order_number = %updated.order_number,
            from = old_status.as_str(),
            to = new_status.as_str(),
            "Order status updated"
        );
        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await;
        if new_status == OrderStatus::Cancelled {
            self.events
                .send_or_log(Event::OrderCancelled { order_id })
                .await;
        }

        if notify_available {
            let notice = AvailabilityNotice {
                order_number: updated.order_number.clone(),
                customer_name: format!("{} {}", updated.first_name, updated.last_name),
                email: updated.email.clone(),
                items: notification_lines(&items),
            };
            if let Err(e) = self.notifier.availability_notice(notice).await {
                error!(%order_id, error = %e, "Availability notification failed");
            }
        }
        if new_status == OrderStatus::Shipped {
            let notice = ShippingNotice {
                order_number: updated.order_number.clone(),
                customer_name: format!("{} {}", updated.first_name, updated.last_name),
                email: updated.email.clone(),
            };
            if let Err(e) = self.notifier.shipping_notice(notice).await {
                error!(%order_id, error = %e, "Shipping notification failed");
            }
        }

        Ok(updated)
    }

    /// Cancels an order. The status check inside the transaction makes a
    /// second cancellation fail with `InvalidTransition` instead of
    /// releasing inventory twice.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.update_status(order_id, OrderStatus::Cancelled).await
    }

    async fn release_items<C: ConnectionTrait>(
        conn: &C,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        for item in items {
            // The item snapshot, re-stamped at payment confirmation, names
            // the counter that was actually committed; the live product
            // row may have changed status since.
            let was_pre_order = item.product_status == ProductStatus::PreOrder.as_str();
            if let Err(e) =
                InventoryService::release(conn, item.product_id, item.quantity, was_pre_order).await
            {
                warn!(
                    product_id = %item.product_id,
                    error = %e,
                    "Inventory release failed for cancelled item"
                );
            }
        }
        Ok(())
    }
}

pub(crate) fn notification_lines(items: &[order_item::Model]) -> Vec<NotificationLine> {
    items
        .iter()
        .map(|item| NotificationLine {
            name: item.product_name.clone(),
            weight: item.product_weight.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
        .collect()
}
