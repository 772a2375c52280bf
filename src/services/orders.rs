use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{order, order_item, order_timeline},
    errors::ServiceError,
    services::{
        fulfillment::{OrderStatus, TimelineState},
        gateway::GatewayPayment,
        pricing::PriceBreakdown,
        staging::{ShippingSnapshot, StagedOrder},
    },
};

const ORDER_NUMBER_ATTEMPTS: usize = 5;
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub sku: String,
    pub title: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TimelineEntryView {
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentView {
    pub method: Option<String>,
    pub transaction_id: String,
    pub gateway_order_id: String,
    pub status: String,
    pub paid_at: DateTime<Utc>,
    pub refunded_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub items: Vec<OrderItemView>,
    pub pricing: PriceBreakdown,
    pub currency: String,
    pub shipping_address: ShippingSnapshot,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
    pub payment: PaymentView,
    pub tracking_number: Option<String>,
    pub courier: Option<String>,
    pub timeline: Vec<TimelineEntryView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    fn assemble(
        order: order::Model,
        items: Vec<order_item::Model>,
        timeline: Vec<order_timeline::Model>,
    ) -> Result<Self, ServiceError> {
        let shipping_address: ShippingSnapshot = serde_json::from_value(order.shipping_address)?;
        Ok(Self {
            id: order.id,
            order_number: order.order_number,
            customer_id: order.customer_id,
            status: OrderStatus::parse_stored(&order.status)?,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    sku: item.variant_sku,
                    title: item.title,
                    size: item.size,
                    color: item.color,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    subtotal: item.subtotal,
                })
                .collect(),
            pricing: PriceBreakdown {
                subtotal: order.subtotal,
                discount: order.discount,
                shipping: order.shipping,
                tax: order.tax,
                total: order.total,
            },
            currency: order.currency,
            shipping_address,
            coupon_code: order.coupon_code,
            notes: order.notes,
            payment: PaymentView {
                method: order.payment_method,
                transaction_id: order.gateway_payment_id,
                gateway_order_id: order.gateway_order_id,
                status: order.payment_status,
                paid_at: order.paid_at,
                refunded_amount: order.refunded_amount,
            },
            tracking_number: order.tracking_number,
            courier: order.courier,
            timeline: timeline
                .into_iter()
                .map(|entry| TimelineEntryView {
                    title: entry.title,
                    description: entry.description,
                    state: entry.state,
                    created_at: entry.created_at,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}

/// A freshly written order and the view returned to the customer.
#[derive(Debug, Clone)]
pub struct PersistedOrder {
    pub model: order::Model,
    pub view: OrderView,
}

/// Generates a candidate like `ORD-20240501093015-K3Z9QX`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_NUMBER_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn unique_order_number<C: ConnectionTrait>(conn: &C) -> Result<String, ServiceError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = generate_order_number(Utc::now());
            let taken = order::Entity::find()
                .filter(order::Column::OrderNumber.eq(candidate.as_str()))
                .count(conn)
                .await?
                > 0;
            if !taken {
                return Ok(candidate);
            }
            debug!(%candidate, "order number collision, retrying");
        }
        Err(ServiceError::InternalError(
            "could not allocate a unique order number".to_string(),
        ))
    }

    /// Writes the order, its items and the opening timeline on `conn`.
    ///
    /// The view is assembled from the inserted rows, so nothing needs to be
    /// read back once the caller commits.
    pub async fn persist_in<C: ConnectionTrait>(
        conn: &C,
        staged: &StagedOrder,
        payment: &GatewayPayment,
    ) -> Result<PersistedOrder, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = Self::unique_order_number(conn).await?;

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(staged.customer_id),
            status: Set(OrderStatus::Confirmed.to_string()),
            subtotal: Set(staged.pricing.subtotal),
            discount: Set(staged.pricing.discount),
            shipping: Set(staged.pricing.shipping),
            tax: Set(staged.pricing.tax),
            total: Set(staged.pricing.total),
            currency: Set(staged.currency.clone()),
            shipping_address: Set(serde_json::to_value(&staged.shipping_address)?),
            coupon_code: Set(staged.coupon.as_ref().map(|c| c.code.clone())),
            notes: Set(staged.notes.clone()),
            payment_method: Set(payment.method.clone()),
            gateway_order_id: Set(staged.gateway_order_id.clone()),
            gateway_payment_id: Set(payment.id.clone()),
            payment_status: Set(payment.status.clone()),
            paid_at: Set(now),
            refunded_amount: Set(0),
            tracking_number: Set(None),
            courier: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        let mut items = Vec::with_capacity(staged.items.len());
        for item in &staged.items {
            let inserted = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                variant_sku: Set(item.sku.clone()),
                title: Set(item.title.clone()),
                size: Set(item.size.clone()),
                color: Set(item.color.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                subtotal: Set(item.subtotal),
            }
            .insert(conn)
            .await?;
            items.push(inserted);
        }

        let opening = [
            ("Order received", TimelineState::Complete),
            ("Payment confirmed", TimelineState::Complete),
            ("Processing", TimelineState::Current),
        ];
        let mut timeline = Vec::with_capacity(opening.len());
        for (position, (title, state)) in opening.into_iter().enumerate() {
            let entry = order_timeline::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                position: Set(position as i32),
                title: Set(title.to_string()),
                description: Set(None),
                state: Set(state.to_string()),
                created_at: Set(now),
            }
            .insert(conn)
            .await?;
            timeline.push(entry);
        }

        let view = OrderView::assemble(order.clone(), items, timeline)?;
        Ok(PersistedOrder { model: order, view })
    }

    pub async fn find_model(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn find(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.find_model(order_id).await?;
        let items = order
            .find_related(order_item::Entity)
            .all(&*self.db)
            .await?;
        let timeline = order
            .find_related(order_timeline::Entity)
            .order_by_asc(order_timeline::Column::Position)
            .all(&*self.db)
            .await?;
        OrderView::assemble(order, items, timeline)
    }

    pub async fn find_by_payment_id(&self, gateway_payment_id: &str) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::GatewayPaymentId.eq(gateway_payment_id))
            .one(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_numbers_are_timestamped_with_random_suffix() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 15).unwrap();
        let number = generate_order_number(now);

        assert!(number.starts_with("ORD-20240501093015-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), ORDER_NUMBER_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
