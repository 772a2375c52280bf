pub mod cart_item;
pub mod coupon;
pub mod customer_address;
pub mod order;
pub mod order_item;
pub mod order_timeline;
pub mod payment_method;
pub mod product_variant;
