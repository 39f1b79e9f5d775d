use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the services. Consumed by a single in-process
/// task that logs them; side effects stay in the services themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderPaid {
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
    },
    StockDepleted {
        product_id: Uuid,
    },
    PromoExpired {
        product_id: Uuid,
    },
    CouponRedeemed {
        code: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget variant; a full or closed channel is logged, never
    /// surfaced to the caller.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(error = %e, event = ?event, "Dropping domain event");
        }
    }
}

/// Drains the event channel until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPaid {
                order_id,
                order_number,
            } => {
                info!(order_id = %order_id, order_number = %order_number, "Order paid");
            }
            Event::StockDepleted { product_id } => {
                warn!(product_id = %product_id, "Product stock depleted");
            }
            Event::PromoExpired { product_id } => {
                info!(product_id = %product_id, "Promotional price tier exhausted");
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }
}
