use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Summary handed to the notifier once an order is settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub total: i64,
    pub currency: String,
    pub item_count: usize,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> Result<(), ServiceError>;
}

/// Writes confirmations to the log; mail delivery lives elsewhere.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmed(&self, confirmation: &OrderConfirmation) -> Result<(), ServiceError> {
        info!(
            order_id = %confirmation.order_id,
            order_number = %confirmation.order_number,
            customer_id = %confirmation.customer_id,
            total = confirmation.total,
            currency = %confirmation.currency,
            items = confirmation.item_count,
            "order confirmation queued"
        );
        Ok(())
    }
}
