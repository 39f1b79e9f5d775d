use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus};
use crate::entities::order_item;
use crate::entities::product::ProductStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::notifications::{Notifier, OrderConfirmation};
use crate::payments::signature;
use crate::services::coupons::CouponService;
use crate::services::inventory::InventoryService;
use crate::services::order_status::{can_transition, notification_lines};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// The only event type that drives reconciliation.
const SESSION_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: SessionObject,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    payment_intent: Option<String>,
}

/// What a delivery amounted to. Everything except `Completed` means the
/// delivery was acknowledged without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed {
        order_number: String,
    },
    /// The order already carries this payment; repeated deliveries are
    /// expected and harmless.
    AlreadyProcessed,
    /// No order references the session. Acknowledged so the gateway stops
    /// retrying; resolved from logs.
    OrphanSession,
    /// An event type we do not consume, or an order no longer eligible
    /// for payment confirmation.
    Ignored,
}

/// Consumes signed payment-confirmation events and applies the paid-order
/// side effects exactly once. Delivery is at-least-once; the durable
/// `paid_at` flag on the order is the sole idempotency gate.
pub struct ReconciliationService {
    db: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    events: EventSender,
    webhook_secret: String,
    tolerance_secs: i64,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DbPool>,
        notifier: Arc<dyn Notifier>,
        events: EventSender,
        webhook_secret: String,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            db,
            notifier,
            events,
            webhook_secret,
            tolerance_secs,
        }
    }

    /// Verifies and dispatches a raw webhook delivery. Signature failures
    /// are fail-closed; nothing is parsed before verification.
    #[instrument(skip(self, payload, signature_header))]
    pub async fn process_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        signature::verify(
            &self.webhook_secret,
            signature_header,
            payload,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("malformed event payload: {}", e)))?;

        if event.event_type != SESSION_COMPLETED {
            debug!(event_type = %event.event_type, "Ignoring webhook event type");
            return Ok(ReconcileOutcome::Ignored);
        }

        self.reconcile_session(&event.data.object.id, event.data.object.payment_intent.as_deref())
            .await
    }

    /// Marks the order behind `session_id` as paid and commits inventory,
    /// promo, and coupon counters in one transaction.
    #[instrument(skip(self))]
    pub async fn reconcile_session(
        &self,
        session_id: &str,
        payment_intent_id: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let current = order::Entity::find()
            .filter(order::Column::PaymentSessionId.eq(session_id))
            .one(self.db.as_ref())
            .await?;
        let current = match current {
            Some(order) => order,
            None => {
                warn!(session_id, "Confirmation for unknown payment session");
                return Ok(ReconcileOutcome::OrphanSession);
            }
        };

        // Idempotency gate. The gateway delivers at-least-once.
        if current.paid_at.is_some() || current.status == OrderStatus::Paid {
            info!(
                order_number = %current.order_number,
                "Confirmation already processed, acknowledging duplicate"
            );
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let target = if current.is_pre_order {
            OrderStatus::PreOrder
        } else {
            OrderStatus::Paid
        };
        if !can_transition(current.status, target) {
            warn!(
                order_number = %current.order_number,
                status = current.status.as_str(),
                "Order no longer eligible for payment confirmation"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        let txn = self.db.begin().await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(current.id))
            .all(&txn)
            .await?;

        let now = Utc::now();
        let order_id = current.id;
        let order_number = current.order_number.clone();
        let coupon_code = current.coupon_code.clone();

        let mut active: order::ActiveModel = current.clone().into();
        active.status = Set(target);
        active.paid_at = Set(Some(now));
        active.payment_intent_id = Set(payment_intent_id.map(str::to_string));
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        let mut pending_events = Vec::new();
        for item in &items {
            Self::commit_item(&txn, item, &mut pending_events).await?;
        }

        let mut coupon_redeemed = false;
        if let Some(code) = coupon_code.as_deref() {
            coupon_redeemed = CouponService::redeem(&txn, code).await?;
        }

        txn.commit().await?;

        info!(
            %order_id,
            %order_number,
            status = target.as_str(),
            "Payment confirmed and reconciled"
        );
        self.events
            .send_or_log(Event::OrderPaid {
                order_id,
                order_number: order_number.clone(),
            })
            .await;
        for event in pending_events {
            self.events.send_or_log(event).await;
        }
        if coupon_redeemed {
            if let Some(code) = coupon_code {
                self.events.send_or_log(Event::CouponRedeemed { code }).await;
            }
        }

        let confirmation = OrderConfirmation {
            order_number: order_number.clone(),
            customer_name: format!("{} {}", updated.first_name, updated.last_name),
            email: updated.email.clone(),
            items: notification_lines(&items),
            subtotal: updated.subtotal,
            shipping: updated.shipping,
            discount: updated.discount,
            total: updated.total,
            is_pre_order: updated.is_pre_order,
            estimated_delivery: updated.estimated_delivery,
        };
        if let Err(e) = self.notifier.order_confirmation(confirmation).await {
            // State is durable; nothing to roll back for a lost email.
            error!(%order_number, error = %e, "Order confirmation notification failed");
        }

        Ok(ReconcileOutcome::Completed { order_number })
    }

    /// Commits one order line against the ledger. The payment already
    /// succeeded, so a shortfall degrades (clamp, skip, log) instead of
    /// aborting the transaction.
    async fn commit_item<C: ConnectionTrait>(
        conn: &C,
        item: &order_item::Model,
        pending_events: &mut Vec<Event>,
    ) -> Result<(), ServiceError> {
        match InventoryService::reserve_or_commit(conn, item.product_id, item.quantity).await {
            Ok(outcome) => {
                // Cancellation releases against the item snapshot, so it
                // must record the counter actually committed here, not the
                // product status at order time.
                let committed = if outcome.was_pre_order {
                    ProductStatus::PreOrder
                } else {
                    ProductStatus::InStock
                };
                if item.product_status != committed.as_str() {
                    order_item::Entity::update_many()
                        .col_expr(
                            order_item::Column::ProductStatus,
                            Expr::value(committed.as_str()),
                        )
                        .filter(order_item::Column::Id.eq(item.id))
                        .exec(conn)
                        .await?;
                }
                if outcome.depleted {
                    pending_events.push(Event::StockDepleted {
                        product_id: item.product_id,
                    });
                }
            }
            Err(ServiceError::InsufficientStock(_)) => {
                InventoryService::clamp_stock_to_zero(conn, item.product_id).await?;
                pending_events.push(Event::StockDepleted {
                    product_id: item.product_id,
                });
            }
            Err(ServiceError::PreOrderLimitExceeded(_)) => {
                warn!(
                    product_id = %item.product_id,
                    "Pre-order counter full at confirmation, leaving counter as is"
                );
            }
            Err(ServiceError::NotFound(_)) => {
                warn!(
                    product_id = %item.product_id,
                    "Product removed since order creation, skipping ledger commit"
                );
            }
            Err(e) => return Err(e),
        }

        if InventoryService::record_promo_sale(conn, item.product_id, item.quantity).await? {
            pending_events.push(Event::PromoExpired {
                product_id: item.product_id,
            });
        }
        Ok(())
    }
}
