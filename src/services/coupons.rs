use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Condition, Expr},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use tracing::{instrument, warn};

use crate::{
    entities::coupon::{self, Column, Entity as Coupon},
    errors::{CheckoutError, ServiceError},
    services::pricing::{CouponTerms, DiscountKind},
};

#[derive(Clone)]
pub struct CouponValidator {
    db: Arc<DatabaseConnection>,
}

/// Checks the active flag, validity window and usage cap of a coupon.
pub fn check_redeemable(coupon: &coupon::Model, now: DateTime<Utc>) -> Result<(), CheckoutError> {
    if !coupon.is_active {
        return Err(CheckoutError::CouponInactive(coupon.code.clone()));
    }
    if coupon.valid_from.map_or(false, |from| now < from)
        || coupon.valid_until.map_or(false, |until| now > until)
    {
        return Err(CheckoutError::CouponExpired(coupon.code.clone()));
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return Err(CheckoutError::CouponUsageExceeded(coupon.code.clone()));
        }
    }
    Ok(())
}

impl CouponValidator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a coupon and returns the terms to freeze into a staged order.
    #[instrument(skip(self))]
    pub async fn validate(&self, code: &str) -> Result<CouponTerms, ServiceError> {
        let code = code.trim();
        let coupon = Coupon::find()
            .filter(Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| CheckoutError::CouponNotFound(code.to_string()))?;

        check_redeemable(&coupon, Utc::now())?;

        let kind = DiscountKind::from_str(&coupon.discount_type).map_err(|_| {
            ServiceError::InternalError(format!(
                "coupon {} has unknown discount type {}",
                coupon.code, coupon.discount_type
            ))
        })?;

        Ok(CouponTerms {
            code: coupon.code,
            kind,
            value: coupon.discount_value,
            max_discount: coupon.max_discount,
        })
    }

    /// Bumps `used_count` by one unless that would pass the usage limit.
    pub async fn increment_usage_in<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<(), ServiceError> {
        let result = Coupon::update_many()
            .col_expr(Column::UsedCount, Expr::col(Column::UsedCount).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Code.eq(code))
            .filter(
                Condition::any()
                    .add(Column::UsageLimit.is_null())
                    .add(Expr::col(Column::UsedCount).lt(Expr::col(Column::UsageLimit))),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(code, "coupon usage not incremented");
            return Err(CheckoutError::CouponUsageExceeded(code.to_string()).into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn increment_usage(&self, code: &str) -> Result<(), ServiceError> {
        Self::increment_usage_in(&*self.db, code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use uuid::Uuid;

    fn coupon(is_active: bool, from_days: Option<i64>, until_days: Option<i64>, limit: Option<i32>, used: i32) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            discount_type: "percentage".into(),
            discount_value: 10,
            max_discount: Some(150),
            valid_from: from_days.map(|d| now + Duration::days(d)),
            valid_until: until_days.map(|d| now + Duration::days(d)),
            usage_limit: limit,
            used_count: used,
            is_active,
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest]
    #[case(coupon(true, None, None, None, 0), None)]
    #[case(coupon(true, Some(-1), Some(1), Some(5), 4), None)]
    #[case(coupon(false, None, None, None, 0), Some("coupon_inactive"))]
    #[case(coupon(true, Some(1), None, None, 0), Some("coupon_expired"))]
    #[case(coupon(true, None, Some(-1), None, 0), Some("coupon_expired"))]
    #[case(coupon(true, None, None, Some(5), 5), Some("coupon_usage_exceeded"))]
    fn redeemability(#[case] coupon: coupon::Model, #[case] expected: Option<&str>) {
        let outcome = check_redeemable(&coupon, Utc::now()).err().map(|e| e.code());
        assert_eq!(outcome, expected);
    }
}
