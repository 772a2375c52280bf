//! Server-side order pricing.
//!
//! Every amount is an integer in the smallest currency unit. Each stage
//! rounds half-up on its own, so the breakdown always adds up exactly.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

use crate::config::PricingConfig;
use crate::errors::CheckoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

/// The coupon terms frozen into a staged order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CouponTerms {
    pub code: String,
    pub kind: DiscountKind,
    /// Whole percentage points, or minor units for fixed coupons
    pub value: i64,
    pub max_discount: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmount {
    pub unit_price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal: i64,
    pub discount: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
}

/// Shipping and tax rules applied on top of the cart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PricingRules {
    pub shipping_fee: i64,
    pub free_shipping_threshold: Option<i64>,
    pub tax_rate_bps: u32,
}

impl From<&PricingConfig> for PricingRules {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            shipping_fee: cfg.shipping_fee,
            free_shipping_threshold: cfg.free_shipping_threshold,
            tax_rate_bps: cfg.tax_rate_bps,
        }
    }
}

fn round_half_up(value: Decimal) -> Result<i64, CheckoutError> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| CheckoutError::InvalidLineItem("amount out of range".to_string()))
}

/// Sum of `unit_price * quantity` over all lines.
pub fn subtotal(lines: &[LineAmount]) -> Result<i64, CheckoutError> {
    lines.iter().try_fold(0i64, |acc, line| {
        if line.unit_price < 0 {
            return Err(CheckoutError::InvalidLineItem(format!(
                "negative unit price {}",
                line.unit_price
            )));
        }
        if line.quantity <= 0 {
            return Err(CheckoutError::InvalidLineItem(format!(
                "quantity must be positive, got {}",
                line.quantity
            )));
        }
        line.unit_price
            .checked_mul(i64::from(line.quantity))
            .and_then(|amount| acc.checked_add(amount))
            .ok_or_else(|| CheckoutError::InvalidLineItem("line total overflows".to_string()))
    })
}

/// Discount granted by `coupon` on `subtotal`, never above the subtotal or the coupon ceiling.
pub fn discount(subtotal: i64, coupon: &CouponTerms) -> Result<i64, CheckoutError> {
    let raw = match coupon.kind {
        DiscountKind::Percentage => {
            round_half_up(Decimal::from(subtotal) * Decimal::from(coupon.value) / Decimal::from(100))?
        }
        DiscountKind::Fixed => coupon.value.min(subtotal),
    };

    let capped = match coupon.max_discount {
        Some(ceiling) => raw.min(ceiling),
        None => raw,
    };

    Ok(capped.clamp(0, subtotal))
}

/// Prices a cart. Fails with `InvalidOrderTotal` when nothing would be charged.
pub fn price(
    lines: &[LineAmount],
    coupon: Option<&CouponTerms>,
    rules: &PricingRules,
) -> Result<PriceBreakdown, CheckoutError> {
    let subtotal = subtotal(lines)?;
    let discount = match coupon {
        Some(c) => discount(subtotal, c)?,
        None => 0,
    };

    let shipping = match rules.free_shipping_threshold {
        Some(threshold) if subtotal >= threshold => 0,
        _ => rules.shipping_fee.max(0),
    };

    let taxable = subtotal - discount;
    let tax = round_half_up(
        Decimal::from(taxable) * Decimal::from(rules.tax_rate_bps) / Decimal::from(10_000),
    )?;

    let total = taxable + shipping + tax;
    if total <= 0 {
        return Err(CheckoutError::InvalidOrderTotal { total });
    }

    Ok(PriceBreakdown {
        subtotal,
        discount,
        shipping,
        tax,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn half_units_round_away_from_zero() {
        assert_eq!(round_half_up(dec!(12.5)).unwrap(), 13);
        assert_eq!(round_half_up(dec!(12.49)).unwrap(), 12);
        assert_eq!(round_half_up(dec!(0.5)).unwrap(), 1);
    }

    fn percent(value: i64, max: Option<i64>) -> CouponTerms {
        CouponTerms {
            code: "SAVE".into(),
            kind: DiscountKind::Percentage,
            value,
            max_discount: max,
        }
    }

    fn fixed(value: i64, max: Option<i64>) -> CouponTerms {
        CouponTerms {
            code: "FLAT".into(),
            kind: DiscountKind::Fixed,
            value,
            max_discount: max,
        }
    }

    fn line(unit_price: i64, quantity: i32) -> LineAmount {
        LineAmount {
            unit_price,
            quantity,
        }
    }

    #[test]
    fn percentage_discount_is_capped_by_ceiling() {
        let breakdown = price(
            &[line(500, 2), line(1000, 1)],
            Some(&percent(10, Some(150))),
            &PricingRules::default(),
        )
        .unwrap();

        assert_eq!(breakdown.subtotal, 2000);
        assert_eq!(breakdown.discount, 150);
        assert_eq!(breakdown.shipping, 0);
        assert_eq!(breakdown.tax, 0);
        assert_eq!(breakdown.total, 1850);
    }

    #[test]
    fn percentage_discount_rounds_half_up() {
        assert_eq!(discount(1005, &percent(10, None)).unwrap(), 101);
        assert_eq!(discount(1004, &percent(10, None)).unwrap(), 100);
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        assert_eq!(discount(300, &fixed(500, None)).unwrap(), 300);
        assert_eq!(discount(300, &fixed(500, Some(200))).unwrap(), 200);
    }

    #[test]
    fn fully_discounted_order_is_rejected() {
        let err = price(&[line(300, 1)], Some(&fixed(300, None)), &PricingRules::default())
            .unwrap_err();
        assert_matches!(err, CheckoutError::InvalidOrderTotal { total: 0 });
    }

    #[test]
    fn shipping_waived_at_threshold_and_tax_on_discounted_amount() {
        let rules = PricingRules {
            shipping_fee: 99,
            free_shipping_threshold: Some(2000),
            tax_rate_bps: 1800,
        };

        let below = price(&[line(1000, 1)], None, &rules).unwrap();
        assert_eq!(below.shipping, 99);
        assert_eq!(below.tax, 180);
        assert_eq!(below.total, 1000 + 99 + 180);

        let at = price(&[line(1000, 2)], Some(&fixed(100, None)), &rules).unwrap();
        assert_eq!(at.shipping, 0);
        assert_eq!(at.tax, 342);
        assert_eq!(at.total, 1900 + 342);
    }

    #[test]
    fn invalid_lines_are_rejected() {
        assert_matches!(
            price(&[line(-1, 1)], None, &PricingRules::default()),
            Err(CheckoutError::InvalidLineItem(_))
        );
        assert_matches!(
            price(&[line(100, -2)], None, &PricingRules::default()),
            Err(CheckoutError::InvalidLineItem(_))
        );
        assert_matches!(
            price(&[], None, &PricingRules::default()),
            Err(CheckoutError::InvalidOrderTotal { total: 0 })
        );
    }

    fn coupon_strategy() -> impl Strategy<Value = Option<CouponTerms>> {
        prop_oneof![
            Just(None),
            (0i64..=100, proptest::option::of(0i64..50_000)).prop_map(|(v, m)| Some(percent(v, m))),
            (0i64..200_000, proptest::option::of(0i64..50_000)).prop_map(|(v, m)| Some(fixed(v, m))),
        ]
    }

    proptest! {
        #[test]
        fn breakdown_always_balances(
            lines in proptest::collection::vec((1i64..100_000, 1i32..20), 1..8),
            coupon in coupon_strategy(),
            shipping_fee in 0i64..1_000,
            tax_rate_bps in 0u32..3_000,
        ) {
            let lines: Vec<LineAmount> = lines.into_iter().map(|(p, q)| line(p, q)).collect();
            let rules = PricingRules { shipping_fee, free_shipping_threshold: None, tax_rate_bps };

            match price(&lines, coupon.as_ref(), &rules) {
                Ok(b) => {
                    prop_assert_eq!(b.total, b.subtotal - b.discount + b.shipping + b.tax);
                    prop_assert!(b.discount >= 0);
                    prop_assert!(b.discount <= b.subtotal);
                    if let Some(max) = coupon.as_ref().and_then(|c| c.max_discount) {
                        prop_assert!(b.discount <= max);
                    }
                    prop_assert!(b.total > 0);
                }
                Err(CheckoutError::InvalidOrderTotal { total }) => prop_assert!(total <= 0),
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
