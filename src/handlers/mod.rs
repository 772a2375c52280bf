pub mod health;
pub mod inventory;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        cart::CartService,
        checkout::CheckoutService,
        coupons::CouponValidator,
        fulfillment::FulfillmentService,
        gateway::PaymentGateway,
        notifications::Notifier,
        orders::OrderService,
        payment_methods::PaymentMethodVault,
        pricing::PricingRules,
        refunds::RefundService,
        settlement::SettlementService,
        staging::StagingStore,
        stock::StockLedger,
        webhooks::WebhookIngestor,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub refunds: Arc<RefundService>,
    pub webhooks: Arc<WebhookIngestor>,
    pub orders: Arc<OrderService>,
    pub stock: Arc<StockLedger>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppServices {
    /// Wires every service against one database pool, staging store and gateway.
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        staging: Arc<dyn StagingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cart = CartService::new(db.clone());
        let stock = StockLedger::new(db.clone(), event_sender.clone());
        let coupons = CouponValidator::new(db.clone());
        let orders = OrderService::new(db.clone());
        let vault = PaymentMethodVault::new(db.clone());

        let checkout = CheckoutService::new(
            cart.clone(),
            stock.clone(),
            coupons.clone(),
            gateway.clone(),
            staging.clone(),
            PricingRules::from(&config.pricing),
            config.pricing.currency.clone(),
        );

        let settlement = SettlementService::new(
            db.clone(),
            staging.clone(),
            gateway.clone(),
            coupons,
            cart,
            vault,
            notifier,
            event_sender.clone(),
            config.gateway.key_secret.clone(),
        );

        let fulfillment = FulfillmentService::new(db.clone(), orders.clone(), event_sender.clone());
        let refunds = RefundService::new(db, gateway.clone(), event_sender.clone());
        let webhooks = WebhookIngestor::new(
            staging,
            event_sender,
            config.gateway.webhook_secret.clone(),
        );

        Self {
            checkout: Arc::new(checkout),
            settlement: Arc::new(settlement),
            fulfillment: Arc::new(fulfillment),
            refunds: Arc::new(refunds),
            webhooks: Arc::new(webhooks),
            orders: Arc::new(orders),
            stock: Arc::new(stock),
            gateway,
        }
    }
}
