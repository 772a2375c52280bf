use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::{CheckoutError, ServiceError},
    services::{
        cart::CartService,
        coupons::CouponValidator,
        gateway::{CreateGatewayOrder, PaymentGateway},
        pricing::{self, LineAmount, PriceBreakdown, PricingRules},
        staging::{ShippingSnapshot, StagedLineItem, StagedOrder, StagingStore},
        stock::StockLedger,
    },
};

#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

/// What the client needs to open the gateway's payment widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GatewayCheckout {
    pub gateway_order_id: String,
    pub key_id: String,
    pub amount: i64,
    pub currency: String,
    pub pricing: PriceBreakdown,
}

/// Prices a cart on the server, opens a gateway order and stages the snapshot.
#[derive(Clone)]
pub struct CheckoutService {
    cart: CartService,
    stock: StockLedger,
    coupons: CouponValidator,
    gateway: Arc<dyn PaymentGateway>,
    staging: Arc<dyn StagingStore>,
    rules: PricingRules,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        cart: CartService,
        stock: StockLedger,
        coupons: CouponValidator,
        gateway: Arc<dyn PaymentGateway>,
        staging: Arc<dyn StagingStore>,
        rules: PricingRules,
        currency: String,
    ) -> Self {
        Self {
            cart,
            stock,
            coupons,
            gateway,
            staging,
            rules,
            currency,
        }
    }

    /// Resolves every active cart line against the live variant record.
    async fn resolve_items(&self, customer_id: Uuid) -> Result<Vec<StagedLineItem>, ServiceError> {
        let lines = self.cart.active_items(customer_id).await?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart.into());
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity <= 0 {
                return Err(CheckoutError::InvalidLineItem(format!(
                    "{} has quantity {}",
                    line.variant_sku, line.quantity
                ))
                .into());
            }

            let availability = self
                .stock
                .check_availability(&line.variant_sku, line.quantity)
                .await?;
            let variant = availability.variant;
            if !availability.available {
                return Err(CheckoutError::InsufficientStock {
                    sku: variant.sku,
                    title: variant.title,
                    requested: line.quantity,
                    available: availability.stock_level,
                }
                .into());
            }

            // Checkout always charges the live price, never the cart snapshot.
            let subtotal = pricing::subtotal(&[LineAmount {
                unit_price: variant.price,
                quantity: line.quantity,
            }])?;

            items.push(StagedLineItem {
                product_id: line.product_id,
                sku: variant.sku,
                title: variant.title,
                size: variant.size,
                color: variant.color,
                unit_price: variant.price,
                quantity: line.quantity,
                subtotal,
                stock_at_staging: variant.stock_level,
            });
        }
        Ok(items)
    }

    #[instrument(skip(self, command), fields(customer_id = %command.customer_id))]
    pub async fn create_order(&self, command: CreateOrderCommand) -> Result<GatewayCheckout, ServiceError> {
        let address = self
            .cart
            .address_for(command.customer_id, command.address_id)
            .await?
            .ok_or(CheckoutError::AddressNotFound)?;

        let items = self.resolve_items(command.customer_id).await?;

        let coupon = match command
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
        {
            Some(code) => Some(self.coupons.validate(code).await?),
            None => None,
        };

        let lines: Vec<LineAmount> = items
            .iter()
            .map(|item| LineAmount {
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();
        let breakdown = pricing::price(&lines, coupon.as_ref(), &self.rules)?;

        let gateway_order = self
            .gateway
            .create_order(&CreateGatewayOrder {
                amount: breakdown.total,
                currency: self.currency.clone(),
                receipt: format!("rcpt_{}", Uuid::new_v4().simple()),
                notes: serde_json::json!({ "customer_id": command.customer_id }),
            })
            .await?;

        if gateway_order.amount != breakdown.total {
            warn!(
                gateway_amount = gateway_order.amount,
                expected = breakdown.total,
                "gateway order amount differs from staged total"
            );
        }

        let staged = StagedOrder {
            gateway_order_id: gateway_order.id.clone(),
            customer_id: command.customer_id,
            items,
            pricing: breakdown,
            currency: self.currency.clone(),
            shipping_address: ShippingSnapshot::from(address),
            coupon,
            notes: command.notes,
            created_at: Utc::now(),
        };
        self.staging.put(staged).await?;

        metrics::counter!("checkout.orders_staged", 1);
        info!(gateway_order_id = %gateway_order.id, total = breakdown.total, "checkout staged");

        Ok(GatewayCheckout {
            gateway_order_id: gateway_order.id,
            key_id: self.gateway.key_id().to_string(),
            amount: breakdown.total,
            currency: self.currency.clone(),
            pricing: breakdown,
        })
    }

    /// Owner of the staged checkout for `gateway_order_id`, if one is still pending.
    pub async fn staged_owner(&self, gateway_order_id: &str) -> Result<Option<Uuid>, ServiceError> {
        Ok(self
            .staging
            .peek(gateway_order_id)
            .await?
            .map(|staged| staged.customer_id))
    }

    /// Drops the caller's staged order after a client-reported payment failure.
    #[instrument(skip(self))]
    pub async fn discard(
        &self,
        customer_id: Uuid,
        gateway_order_id: &str,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        let staged = self
            .staging
            .peek(gateway_order_id)
            .await?
            .ok_or(CheckoutError::OrderAlreadyProcessedOrExpired)?;
        if staged.customer_id != customer_id {
            return Err(CheckoutError::Unauthorized.into());
        }

        self.staging.take(gateway_order_id).await?;
        warn!(
            gateway_order_id,
            reason = reason.unwrap_or("unspecified"),
            "staged order discarded after client-side payment failure"
        );
        metrics::counter!("checkout.orders_abandoned", 1);
        Ok(())
    }
}
