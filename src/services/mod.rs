pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod fulfillment;
pub mod gateway;
pub mod notifications;
pub mod orders;
pub mod payment_methods;
pub mod pricing;
pub mod refunds;
pub mod settlement;
pub mod staging;
pub mod stock;
pub mod webhooks;
