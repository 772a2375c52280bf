use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    entities::product_variant::{self, Column, Entity as ProductVariant},
    errors::{CheckoutError, ServiceError},
    events::{Event, EventSender},
};

#[derive(Debug, Clone)]
pub struct Availability {
    pub available: bool,
    pub stock_level: i32,
    pub variant: product_variant::Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StockAdjustment {
    pub sku: String,
    pub old_quantity: i32,
    pub new_quantity: i32,
}

/// Variant stock reads and guarded writes.
///
/// Every write is a single conditional `UPDATE` so concurrent orders against
/// the same SKU can never drive the stock level below zero.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    pub async fn find_variant_in<C: ConnectionTrait>(
        conn: &C,
        sku: &str,
    ) -> Result<Option<product_variant::Model>, ServiceError> {
        Ok(ProductVariant::find()
            .filter(Column::Sku.eq(sku))
            .one(conn)
            .await?)
    }

    pub async fn find_variant(&self, sku: &str) -> Result<Option<product_variant::Model>, ServiceError> {
        Self::find_variant_in(&*self.db, sku).await
    }

    /// Advisory check; stock may move before the order settles.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        sku: &str,
        quantity: i32,
    ) -> Result<Availability, ServiceError> {
        let variant = self
            .find_variant(sku)
            .await?
            .ok_or_else(|| CheckoutError::VariantNotFound(sku.to_string()))?;

        Ok(Availability {
            available: variant.stock_level >= quantity,
            stock_level: variant.stock_level,
            variant,
        })
    }

    /// Atomically removes `quantity` units, returning the new stock level.
    ///
    /// Runs on whatever connection it is given, so the caller can make it part
    /// of a larger transaction.
    pub async fn decrement_in<C: ConnectionTrait>(
        conn: &C,
        sku: &str,
        quantity: i32,
    ) -> Result<i32, ServiceError> {
        if quantity <= 0 {
            return Err(CheckoutError::InvalidLineItem(format!(
                "quantity must be positive, got {quantity}"
            ))
            .into());
        }

        let result = ProductVariant::update_many()
            .col_expr(Column::StockLevel, Expr::col(Column::StockLevel).sub(quantity))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Sku.eq(sku))
            .filter(Column::StockLevel.gte(quantity))
            .exec(conn)
            .await?;

        let variant = Self::find_variant_in(conn, sku)
            .await?
            .ok_or_else(|| CheckoutError::VariantNotFound(sku.to_string()))?;

        if result.rows_affected == 0 {
            warn!(sku, requested = quantity, available = variant.stock_level, "stock decrement refused");
            return Err(CheckoutError::InsufficientStock {
                sku: sku.to_string(),
                title: variant.title,
                requested: quantity,
                available: variant.stock_level,
            }
            .into());
        }

        Ok(variant.stock_level)
    }

    /// Applies a signed admin correction; refuses any change that would go negative.
    #[instrument(skip(self))]
    pub async fn adjust(&self, sku: &str, delta: i32) -> Result<StockAdjustment, ServiceError> {
        let mut update = ProductVariant::update_many()
            .col_expr(Column::StockLevel, Expr::col(Column::StockLevel).add(delta))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Sku.eq(sku));
        if delta < 0 {
            update = update.filter(Column::StockLevel.gte(-delta));
        }
        let result = update.exec(&*self.db).await?;

        let variant = self
            .find_variant(sku)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {sku} not found")))?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Adjustment of {delta} would make stock for {sku} negative (current {})",
                variant.stock_level
            )));
        }

        let adjustment = StockAdjustment {
            sku: sku.to_string(),
            old_quantity: variant.stock_level - delta,
            new_quantity: variant.stock_level,
        };
        info!(sku, delta, new_quantity = adjustment.new_quantity, "stock adjusted");

        self.event_sender
            .send_or_log(Event::StockAdjusted {
                sku: adjustment.sku.clone(),
                old_quantity: adjustment.old_quantity,
                new_quantity: adjustment.new_quantity,
            })
            .await;

        Ok(adjustment)
    }
}
