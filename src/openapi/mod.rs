use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    errors::ErrorResponse,
    handlers::{health, inventory, orders, payment_webhooks, payments},
    services::{
        checkout::GatewayCheckout,
        fulfillment::OrderStatus,
        orders::{OrderItemView, OrderView, PaymentView, TimelineEntryView},
        pricing::PriceBreakdown,
        refunds::RefundOutcome,
        staging::ShippingSnapshot,
        stock::StockAdjustment,
        webhooks::{WebhookDisposition, WebhookReceipt},
    },
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront Checkout API

Server-priced checkout, gateway payment verification and order fulfillment.

## Authentication

Every endpoint except the gateway webhook and `/health` requires a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

The webhook is authenticated by an HMAC-SHA256 of the raw body in the
`x-razorpay-signature` header.

## Amounts

All amounts are integers in the currency's minor unit.
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Checkout, verification, refunds and gateway webhooks"),
        (name = "Orders", description = "Order lookup and fulfillment transitions"),
        (name = "Inventory", description = "Stock adjustments"),
        (name = "Health", description = "Service health")
    ),
    paths(
        payments::create_order,
        payments::verify_payment,
        payments::payment_status,
        payments::payment_failure,
        payments::refund_payment,
        payment_webhooks::payment_webhook,
        orders::get_order,
        orders::update_order_status,
        inventory::adjust_stock,
        health::health_check,
    ),
    components(
        schemas(
            ErrorResponse,
            payments::CreateOrderRequest,
            payments::VerifyPaymentRequest,
            payments::VerifyPaymentResponse,
            payments::PaymentFailureRequest,
            payments::RefundRequest,
            payments::PaymentStatusResponse,
            orders::UpdateOrderStatusRequest,
            inventory::AdjustStockRequest,
            health::HealthResponse,
            GatewayCheckout,
            PriceBreakdown,
            OrderView,
            OrderItemView,
            PaymentView,
            TimelineEntryView,
            ShippingSnapshot,
            OrderStatus,
            RefundOutcome,
            StockAdjustment,
            WebhookReceipt,
            WebhookDisposition,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Serves the generated OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
