//! Asynchronous gateway notifications.
//!
//! Webhooks are observational only. The synchronous verification call owns
//! every mutation; here events are authenticated, reconciled against the
//! staging store and published for logging.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    errors::{CheckoutError, ServiceError},
    events::{Event, EventSender},
    services::{gateway, staging::StagingStore},
};

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<EntityWrapper<WebhookPayment>>,
    pub order: Option<EntityWrapper<WebhookOrder>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityWrapper<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookOrder {
    pub id: String,
    #[serde(default)]
    pub amount_paid: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    /// Verification for this gateway order has not happened yet
    AwaitingVerification,
    /// No staged checkout remains for this gateway order
    AlreadySettledOrExpired,
    Failed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WebhookReceipt {
    pub event: String,
    pub disposition: WebhookDisposition,
}

#[derive(Clone)]
pub struct WebhookIngestor {
    staging: Arc<dyn StagingStore>,
    event_sender: EventSender,
    secret: String,
}

impl WebhookIngestor {
    pub fn new(staging: Arc<dyn StagingStore>, event_sender: EventSender, secret: String) -> Self {
        Self {
            staging,
            event_sender,
            secret,
        }
    }

    /// Authenticates `body` against `signature` and dispatches by event type.
    #[instrument(skip_all)]
    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookReceipt, ServiceError> {
        let authentic = !self.secret.is_empty()
            && signature.map_or(false, |sig| gateway::verify_webhook_signature(body, sig, &self.secret));
        if !authentic {
            warn!("rejected webhook with missing or invalid signature");
            metrics::counter!("payments.webhooks_rejected", 1);
            return Err(CheckoutError::InvalidSignature.into());
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {e}")))?;

        let payment = envelope.payload.payment.as_ref().map(|p| &p.entity);
        let gateway_order_id = payment
            .and_then(|p| p.order_id.clone())
            .or_else(|| envelope.payload.order.as_ref().map(|o| o.entity.id.clone()));
        let gateway_payment_id = payment.map(|p| p.id.clone());

        let disposition = match envelope.event.as_str() {
            "payment.captured" | "payment.authorized" | "order.paid" => {
                self.reconcile(&envelope.event, gateway_order_id.as_deref()).await?
            }
            "payment.failed" => {
                warn!(
                    gateway_payment_id = gateway_payment_id.as_deref().unwrap_or("-"),
                    reason = payment
                        .and_then(|p| p.error_description.as_deref())
                        .unwrap_or("unknown"),
                    "gateway reported failed payment"
                );
                WebhookDisposition::Failed
            }
            other => {
                debug!(event = other, "ignoring webhook event");
                WebhookDisposition::Ignored
            }
        };

        metrics::counter!("payments.webhooks_received", 1, "event" => envelope.event.clone());
        self.event_sender
            .send_or_log(Event::PaymentWebhookReceived {
                event_type: envelope.event.clone(),
                gateway_order_id,
                gateway_payment_id,
            })
            .await;

        Ok(WebhookReceipt {
            event: envelope.event,
            disposition,
        })
    }

    async fn reconcile(
        &self,
        event: &str,
        gateway_order_id: Option<&str>,
    ) -> Result<WebhookDisposition, ServiceError> {
        let Some(gateway_order_id) = gateway_order_id else {
            return Ok(WebhookDisposition::Ignored);
        };

        // peek only: consuming the entry here would break the client's verification call
        if self.staging.peek(gateway_order_id).await?.is_some() {
            info!(event, gateway_order_id, "payment confirmed by gateway ahead of verification");
            Ok(WebhookDisposition::AwaitingVerification)
        } else {
            info!(event, gateway_order_id, "payment confirmation for settled or expired checkout");
            Ok(WebhookDisposition::AlreadySettledOrExpired)
        }
    }
}
