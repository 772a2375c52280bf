use async_trait::async_trait;
use futures::future::join_all;
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

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain events never roll back the operation that produced them.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events emitted by checkout, settlement and fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        total: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderRefunded {
        order_id: Uuid,
        refund_id: String,
        amount: i64,
    },
    /// Payment was captured but the order could not be persisted.
    SettlementFailed {
        gateway_order_id: String,
        gateway_payment_id: String,
        reason: String,
    },
    PaymentWebhookReceived {
        event_type: String,
        gateway_order_id: Option<String>,
        gateway_payment_id: Option<String>,
    },
    StockAdjusted {
        sku: String,
        old_quantity: i32,
        new_quantity: i32,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderRefunded { .. } => "order_refunded",
            Event::SettlementFailed { .. } => "settlement_failed",
            Event::PaymentWebhookReceived { .. } => "payment_webhook_received",
            Event::StockAdjusted { .. } => "stock_adjusted",
        }
    }
}

// Handlers registered with `process_events` see every event in order.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel, logging each event and fanning it out to handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("storefront.events.processed", 1, "event" => event.name());

        match &event {
            Event::OrderPlaced {
                order_id,
                order_number,
                total,
                ..
            } => {
                info!(%order_id, %order_number, total, "order placed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderRefunded {
                order_id,
                refund_id,
                amount,
            } => {
                info!(%order_id, %refund_id, amount, "order refunded");
            }
            Event::SettlementFailed {
                gateway_order_id,
                gateway_payment_id,
                reason,
            } => {
                // Captured payment without an order: needs manual reconciliation.
                error!(%gateway_order_id, %gateway_payment_id, %reason, "settlement failed after capture");
            }
            Event::PaymentWebhookReceived {
                event_type,
                gateway_order_id,
                gateway_payment_id,
            } => {
                info!(
                    %event_type,
                    gateway_order_id = gateway_order_id.as_deref().unwrap_or("-"),
                    gateway_payment_id = gateway_payment_id.as_deref().unwrap_or("-"),
                    "payment webhook received"
                );
            }
            Event::StockAdjusted {
                sku,
                old_quantity,
                new_quantity,
            } => {
                info!(%sku, old_quantity, new_quantity, "stock adjusted");
            }
        }

        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for err in results.into_iter().filter_map(Result::err) {
            error!(event = event.name(), error = %err, "event handler failed");
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle_event(&self, _event: &Event) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handlers_receive_every_event() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let handler = Arc::new(Counting(AtomicUsize::new(0)));

        sender
            .send(Event::StockAdjusted {
                sku: "TEE-M".into(),
                old_quantity: 1,
                new_quantity: 4,
            })
            .await
            .unwrap();
        sender
            .send(Event::OrderStatusChanged {
                order_id: Uuid::new_v4(),
                old_status: "processing".into(),
                new_status: "shipped".into(),
            })
            .await
            .unwrap();
        drop(sender);

        process_events(rx, vec![handler.clone() as Arc<dyn EventHandler>]).await;
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSender::new(tx)
            .send_or_log(Event::StockAdjusted {
                sku: "TEE-M".into(),
                old_quantity: 0,
                new_quantity: 1,
            })
            .await;
    }
}
