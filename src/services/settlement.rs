//! Payment verification and order finalization.
//!
//! One verification attempt walks these stages in order:
//!
//! `Staged → SignatureVerified → GatewayStatusConfirmed → AmountVerified →
//! StockRevalidated → Persisted → Settled`
//!
//! Any stage may fail. The staged snapshot is consumed before the first
//! check, so a failed attempt can never be retried with the same gateway
//! order. Stock is decremented in the same transaction that writes the
//! order; the remaining side effects run after commit as independent,
//! individually logged steps that never undo the order.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::{CheckoutError, ServiceError},
    events::{Event, EventSender},
    services::{
        cart::CartService,
        coupons::CouponValidator,
        gateway::{self, GatewayPayment, PaymentGateway},
        notifications::{Notifier, OrderConfirmation},
        orders::{OrderService, OrderView},
        payment_methods::PaymentMethodVault,
        staging::{StagedOrder, StagingStore},
        stock::StockLedger,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStage {
    Staged,
    SignatureVerified,
    GatewayStatusConfirmed,
    AmountVerified,
    StockRevalidated,
    Persisted,
    Settled,
}

/// Side effects run after the order is committed, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum PostCommitStep {
    IncrementCouponUsage,
    ClearCart,
    VaultPaymentMethod,
    NotifyCustomer,
}

#[derive(Debug, Clone)]
pub struct VerifyPaymentCommand {
    pub customer_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct Settlement {
    pub order: OrderView,
    /// Post-commit steps that failed; the order stands regardless.
    pub failed_steps: Vec<PostCommitStep>,
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    staging: Arc<dyn StagingStore>,
    gateway: Arc<dyn PaymentGateway>,
    coupons: CouponValidator,
    cart: CartService,
    vault: PaymentMethodVault,
    notifier: Arc<dyn Notifier>,
    event_sender: EventSender,
    key_secret: String,
}

impl SettlementService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        staging: Arc<dyn StagingStore>,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponValidator,
        cart: CartService,
        vault: PaymentMethodVault,
        notifier: Arc<dyn Notifier>,
        event_sender: EventSender,
        key_secret: String,
    ) -> Self {
        Self {
            db,
            staging,
            gateway,
            coupons,
            cart,
            vault,
            notifier,
            event_sender,
            key_secret,
        }
    }

    #[instrument(
        skip(self, command),
        fields(
            customer_id = %command.customer_id,
            gateway_order_id = %command.gateway_order_id,
            gateway_payment_id = %command.gateway_payment_id
        )
    )]
    pub async fn verify(&self, command: VerifyPaymentCommand) -> Result<Settlement, ServiceError> {
        // Ownership is checked before consuming so a foreign caller cannot burn the entry.
        let peeked = self
            .staging
            .peek(&command.gateway_order_id)
            .await?
            .ok_or(CheckoutError::OrderAlreadyProcessedOrExpired)?;
        if peeked.customer_id != command.customer_id {
            warn!("verification attempted by a customer who does not own the staged order");
            return Err(CheckoutError::Unauthorized.into());
        }

        let staged = self
            .staging
            .take(&command.gateway_order_id)
            .await?
            .ok_or(CheckoutError::OrderAlreadyProcessedOrExpired)?;

        let mut stage = SettlementStage::Staged;
        match self.finalize(&staged, &command, &mut stage).await {
            Ok(settlement) => Ok(settlement),
            Err(err) => {
                let reason = err.checkout_code().unwrap_or("internal");
                warn!(%stage, reason, error = %err, "settlement failed");
                metrics::counter!("checkout.settlement_failed", 1, "reason" => reason);

                // Charged but no order was committed.
                if (SettlementStage::AmountVerified..SettlementStage::Persisted).contains(&stage) {
                    error!(%stage, "payment captured but order not created; refund required");
                    self.event_sender
                        .send_or_log(Event::SettlementFailed {
                            gateway_order_id: command.gateway_order_id.clone(),
                            gateway_payment_id: command.gateway_payment_id.clone(),
                            reason: err.to_string(),
                        })
                        .await;
                }
                Err(err)
            }
        }
    }

    async fn finalize(
        &self,
        staged: &StagedOrder,
        command: &VerifyPaymentCommand,
        stage: &mut SettlementStage,
    ) -> Result<Settlement, ServiceError> {
        if !gateway::verify_payment_signature(
            &command.gateway_order_id,
            &command.gateway_payment_id,
            &command.signature,
            &self.key_secret,
        ) {
            return Err(CheckoutError::InvalidSignature.into());
        }
        *stage = SettlementStage::SignatureVerified;

        let payment = self.gateway.fetch_payment(&command.gateway_payment_id).await?;
        if !payment.is_successful() {
            return Err(CheckoutError::PaymentNotSuccessful {
                status: payment.status,
            }
            .into());
        }
        *stage = SettlementStage::GatewayStatusConfirmed;

        if payment.amount != staged.pricing.total {
            return Err(CheckoutError::AmountMismatch {
                expected: staged.pricing.total,
                paid: payment.amount,
            }
            .into());
        }
        *stage = SettlementStage::AmountVerified;

        let txn = self.db.begin().await?;
        for item in &staged.items {
            // Conditional update: a shortfall fails here and the transaction rolls back.
            if let Err(err) = StockLedger::decrement_in(&txn, &item.sku, item.quantity).await {
                warn!(
                    sku = %item.sku,
                    requested = item.quantity,
                    stock_at_staging = item.stock_at_staging,
                    error = %err,
                    "stock moved between staging and settlement"
                );
                return Err(err);
            }
        }
        *stage = SettlementStage::StockRevalidated;

        let persisted = OrderService::persist_in(&txn, staged, &payment).await?;
        txn.commit().await?;
        let order = persisted.model;
        *stage = SettlementStage::Persisted;
        info!(order_id = %order.id, order_number = %order.order_number, "order persisted");

        let failed_steps = self.run_post_commit(staged, &payment, &order).await;

        *stage = SettlementStage::Settled;
        metrics::counter!("checkout.orders_settled", 1);
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_id: order.customer_id,
                total: order.total,
            })
            .await;

        Ok(Settlement {
            order: persisted.view,
            failed_steps,
        })
    }

    async fn run_post_commit(
        &self,
        staged: &StagedOrder,
        payment: &GatewayPayment,
        order: &crate::entities::order::Model,
    ) -> Vec<PostCommitStep> {
        let mut failed = Vec::new();
        for step in PostCommitStep::iter() {
            let outcome = match step {
                PostCommitStep::IncrementCouponUsage => match &staged.coupon {
                    Some(coupon) => self.coupons.increment_usage(&coupon.code).await,
                    None => Ok(()),
                },
                PostCommitStep::ClearCart => self.cart.clear_active(staged.customer_id).await.map(|_| ()),
                PostCommitStep::VaultPaymentMethod => match payment.method.as_deref() {
                    Some(method) => self
                        .vault
                        .save(staged.customer_id, method, &payment.id)
                        .await
                        .map(|_| ()),
                    None => Ok(()),
                },
                PostCommitStep::NotifyCustomer => {
                    self.notifier
                        .order_confirmed(&OrderConfirmation {
                            order_id: order.id,
                            order_number: order.order_number.clone(),
                            customer_id: order.customer_id,
                            total: order.total,
                            currency: order.currency.clone(),
                            item_count: staged.items.len(),
                        })
                        .await
                }
            };

            if let Err(err) = outcome {
                warn!(order_id = %order.id, %step, error = %err, "post-commit step failed");
                metrics::counter!("checkout.post_commit_failed", 1, "step" => step.to_string());
                failed.push(step);
            }
        }
        failed
    }
}
