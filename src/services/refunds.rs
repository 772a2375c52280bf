use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::order,
    errors::{CheckoutError, ServiceError},
    events::{Event, EventSender},
    services::{
        fulfillment::{apply_transition_in, OrderStatus, StatusTransition},
        gateway::PaymentGateway,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Authorized,
    Captured,
    PartiallyRefunded,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RefundOutcome {
    pub order_id: Uuid,
    pub refund_id: String,
    pub amount: i64,
    pub refunded_total: i64,
    pub payment_status: String,
    pub order_status: OrderStatus,
}

/// Works out how much to refund, rejecting anything the payment cannot cover.
pub fn refundable_amount(order: &order::Model, requested: Option<i64>) -> Result<i64, CheckoutError> {
    match order.payment_status.parse::<PaymentStatus>() {
        Ok(PaymentStatus::Captured | PaymentStatus::PartiallyRefunded) => {}
        _ => {
            return Err(CheckoutError::RefundRejected(format!(
                "payment is {}",
                order.payment_status
            )))
        }
    }

    let remaining = order.total - order.refunded_amount;
    let amount = requested.unwrap_or(remaining);
    if amount <= 0 {
        return Err(CheckoutError::RefundRejected("amount must be positive".into()));
    }
    if amount > remaining {
        return Err(CheckoutError::RefundRejected(format!(
            "amount {amount} exceeds refundable balance {remaining}"
        )));
    }
    Ok(amount)
}

#[derive(Clone)]
pub struct RefundService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl RefundService {
    pub fn new(db: Arc<DatabaseConnection>, gateway: Arc<dyn PaymentGateway>, event_sender: EventSender) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Refunds all or part of a captured payment through the gateway.
    ///
    /// A full refund of a cancelled order also moves it to `refunded`.
    #[instrument(skip(self, reason))]
    pub async fn refund(
        &self,
        order_id: Uuid,
        amount: Option<i64>,
        reason: Option<String>,
    ) -> Result<RefundOutcome, ServiceError> {
        let current = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let amount = refundable_amount(&current, amount)?;
        self.reserve(&current, amount).await?;

        let refund = match self.gateway.refund(&current.gateway_payment_id, amount).await {
            Ok(refund) => refund,
            Err(err) => {
                self.release(order_id, amount).await;
                return Err(err);
            }
        };

        let txn = self.db.begin().await?;
        let current = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        // The reservation already counted this refund.
        let refunded_total = current.refunded_amount;
        let fully_refunded = refunded_total >= current.total;
        let payment_status = if fully_refunded {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        let was_cancelled = current.status == OrderStatus::Cancelled.to_string();

        let mut active: order::ActiveModel = current.into();
        active.payment_status = Set(payment_status.to_string());
        active.updated_at = Set(Utc::now());
        let mut updated = active.update(&txn).await?;

        if fully_refunded && was_cancelled {
            let transition = apply_transition_in(
                &txn,
                updated.clone(),
                OrderStatus::Refunded,
                StatusTransition {
                    description: reason.or_else(|| Some(format!("Refund {} issued", refund.id))),
                    ..Default::default()
                },
            )
            .await;
            match transition {
                Ok((moved, _)) => updated = moved,
                // Money already went back; a concurrent refund moved the order first.
                Err(err) if err.checkout_code() == Some("invalid_status_transition") => {
                    warn!(%order_id, "order left cancelled state during refund");
                }
                Err(err) => return Err(err),
            }
        }
        txn.commit().await?;

        info!(refund_id = %refund.id, amount, refunded_total, "refund recorded");
        self.event_sender
            .send_or_log(Event::OrderRefunded {
                order_id,
                refund_id: refund.id.clone(),
                amount,
            })
            .await;

        Ok(RefundOutcome {
            order_id,
            refund_id: refund.id,
            amount,
            refunded_total,
            payment_status: updated.payment_status,
            order_status: OrderStatus::parse_stored(&updated.status)?,
        })
    }
}

impl RefundService {
    /// Adds `amount` to the refunded balance only while it still fits under the total.
    async fn reserve(&self, current: &order::Model, amount: i64) -> Result<(), ServiceError> {
        let reserved = order::Entity::update_many()
            .col_expr(
                order::Column::RefundedAmount,
                Expr::col(order::Column::RefundedAmount).add(amount),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(current.id))
            .filter(order::Column::PaymentStatus.is_in([
                PaymentStatus::Captured.to_string(),
                PaymentStatus::PartiallyRefunded.to_string(),
            ]))
            .filter(Expr::col(order::Column::RefundedAmount).lte(Expr::col(order::Column::Total).sub(amount)))
            .exec(&*self.db)
            .await?;

        if reserved.rows_affected == 0 {
            let latest = order::Entity::find_by_id(current.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", current.id)))?;
            warn!(order_id = %current.id, amount, refunded = latest.refunded_amount, "refund reservation refused");
            refundable_amount(&latest, Some(amount))?;
            return Err(CheckoutError::RefundRejected(
                "another refund for this order is in progress".into(),
            )
            .into());
        }
        Ok(())
    }

    async fn release(&self, order_id: Uuid, amount: i64) {
        let released = order::Entity::update_many()
            .col_expr(
                order::Column::RefundedAmount,
                Expr::col(order::Column::RefundedAmount).sub(amount),
            )
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await;
        if let Err(err) = released {
            error!(%order_id, amount, error = %err, "failed to release refund reservation");
        }
    }
}
