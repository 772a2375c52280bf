use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{order, order_timeline},
    errors::{CheckoutError, ServiceError},
    events::{Event, EventSender},
    services::orders::{OrderService, OrderView},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, ToSchema,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Packed,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Statuses reachable in one step from `self`.
    pub fn allowed_next(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Packed, Cancelled],
            Packed => &[Shipped, Cancelled],
            Shipped => &[OutForDelivery],
            OutForDelivery => &[Delivered],
            Delivered => &[],
            Cancelled => &[Refunded],
            Refunded => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Human-facing timeline title.
    pub fn title(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Packed => "Packed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::OutForDelivery => "Out for delivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunded => "Refunded",
        }
    }

    pub fn parse_stored(raw: &str) -> Result<Self, ServiceError> {
        OrderStatus::from_str(raw)
            .map_err(|_| ServiceError::InternalError(format!("unknown stored order status '{raw}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TimelineState {
    Complete,
    Current,
    Pending,
}

/// Admin request to move an order forward.
#[derive(Debug, Clone, Default)]
pub struct StatusTransition {
    pub description: Option<String>,
    pub tracking_number: Option<String>,
    pub courier: Option<String>,
}

/// Appends a timeline entry, demoting the previous current entry to complete.
pub async fn append_timeline_in<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    title: &str,
    description: Option<String>,
    state: TimelineState,
) -> Result<order_timeline::Model, ServiceError> {
    order_timeline::Entity::update_many()
        .col_expr(
            order_timeline::Column::State,
            Expr::value(TimelineState::Complete.to_string()),
        )
        .filter(order_timeline::Column::OrderId.eq(order_id))
        .filter(order_timeline::Column::State.eq(TimelineState::Current.to_string()))
        .exec(conn)
        .await?;

    let position = order_timeline::Entity::find()
        .filter(order_timeline::Column::OrderId.eq(order_id))
        .count(conn)
        .await?;

    let entry = order_timeline::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        position: Set(position as i32),
        title: Set(title.to_string()),
        description: Set(description),
        state: Set(state.to_string()),
        created_at: Set(Utc::now()),
    };
    Ok(entry.insert(conn).await?)
}

/// Validates and applies one transition on an already-loaded order.
pub(crate) async fn apply_transition_in<C: ConnectionTrait>(
    conn: &C,
    current: order::Model,
    next: OrderStatus,
    change: StatusTransition,
) -> Result<(order::Model, OrderStatus), ServiceError> {
    let from = OrderStatus::parse_stored(&current.status)?;
    if !from.can_transition_to(next) {
        warn!(order_id = %current.id, %from, to = %next, "rejected status transition");
        return Err(CheckoutError::InvalidStatusTransition {
            from: from.to_string(),
            to: next.to_string(),
        }
        .into());
    }

    let order_id = current.id;
    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(next.to_string()))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
    if let Some(tracking) = change.tracking_number.filter(|t| !t.trim().is_empty()) {
        update = update.col_expr(order::Column::TrackingNumber, Expr::value(tracking));
    }
    if let Some(courier) = change.courier.filter(|c| !c.trim().is_empty()) {
        update = update.col_expr(order::Column::Courier, Expr::value(courier));
    }

    // Guarded on the status we validated against; a concurrent change wins.
    let result = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(current.status.as_str()))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(order_id = %order_id, %from, to = %next, "status changed underneath transition");
        return Err(CheckoutError::InvalidStatusTransition {
            from: from.to_string(),
            to: next.to_string(),
        }
        .into());
    }

    let updated = order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    let state = if next.is_terminal() {
        TimelineState::Complete
    } else {
        TimelineState::Current
    };
    append_timeline_in(conn, order_id, next.title(), change.description, state).await?;

    Ok((updated, from))
}

/// Admin-driven order lifecycle after settlement.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    orders: OrderService,
    event_sender: EventSender,
}

impl FulfillmentService {
    pub fn new(db: Arc<DatabaseConnection>, orders: OrderService, event_sender: EventSender) -> Self {
        Self {
            db,
            orders,
            event_sender,
        }
    }

    #[instrument(skip(self, change), fields(order_id = %order_id, to = %next))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        change: StatusTransition,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;

        let current = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let (_, from) = apply_transition_in(&txn, current, next, change).await?;
        txn.commit().await?;

        info!(%from, to = %next, "order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.to_string(),
                new_status: next.to_string(),
            })
            .await;

        self.orders.find(order_id).await
    }
}
