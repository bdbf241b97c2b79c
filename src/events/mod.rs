use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends after the business write has committed; a closed channel is only logged.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Things that happened in the checkout core that other parts of the backend care about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        payment_status: String,
        order_status: String,
    },
    PickupTokenIssued {
        order_id: Uuid,
        order_number: String,
        email: String,
        token: String,
    },
    PickupTokenConsumed {
        order_id: Uuid,
        order_number: String,
    },
    PaymentAttemptCreated {
        order_id: Uuid,
        reference: String,
    },
    PaymentReconciled {
        order_id: Uuid,
        reference: String,
        status: String,
    },
    InventoryAdjusted {
        product_id: String,
        variant: String,
        size: String,
        delta: i32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::PickupTokenIssued { .. } => "pickup_token_issued",
            Event::PickupTokenConsumed { .. } => "pickup_token_consumed",
            Event::PaymentAttemptCreated { .. } => "payment_attempt_created",
            Event::PaymentReconciled { .. } => "payment_reconciled",
            Event::InventoryAdjusted { .. } => "inventory_adjusted",
        }
    }
}

/// Outbound delivery of customer/staff notifications (email, chat, ...).
///
/// Formatting and transport live outside this crate; implementors only receive events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<(), String>;
}

/// Notifier that only writes the event to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &Event) -> Result<(), String> {
        info!(event = event.name(), payload = ?event, "notification");
        Ok(())
    }
}

/// Drains the event channel until every sender is gone.
///
/// Notification failures never reach the request that produced the event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Arc<dyn Notifier>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::InventoryAdjusted {
                product_id,
                variant,
                size,
                delta,
            } => {
                // stock bookkeeping only, nobody is notified
                info!(%product_id, %variant, %size, delta, "inventory adjusted");
                continue;
            }
            Event::PaymentReconciled {
                order_id, status, ..
            } if status == "failed" => {
                warn!(%order_id, "payment failed");
            }
            _ => {}
        }

        if let Err(e) = notifier.notify(&event).await {
            error!(event = event.name(), error = %e, "Failed to deliver notification");
        }
    }

    warn!("Event processing loop has ended");
}
