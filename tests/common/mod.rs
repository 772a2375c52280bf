#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, OnceLock,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait,
};
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService, ADMIN_ROLE, CUSTOMER_ROLE},
    build_router,
    config::AppConfig,
    db,
    entities::{cart_item, coupon, customer_address, order, product_variant},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        gateway::{self, CreateGatewayOrder, GatewayOrder, GatewayPayment, GatewayRefund, PaymentGateway},
        notifications::{LogNotifier, Notifier, OrderConfirmation},
        staging::InMemoryStagingStore,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const KEY_SECRET: &str = "test_gateway_key_secret";
pub const WEBHOOK_SECRET: &str = "test_gateway_webhook_secret";
const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// In-process stand-in for the payment processor.
///
/// Orders and payments live in maps; `capture` plays the part of the
/// customer completing payment in the gateway widget.
#[derive(Default)]
pub struct FakeGateway {
    orders: DashMap<String, GatewayOrder>,
    payments: DashMap<String, GatewayPayment>,
    pub refunds: Mutex<Vec<GatewayRefund>>,
    pub orders_created: AtomicUsize,
}

impl FakeGateway {
    /// Captures the full order amount and returns `(payment_id, signature)`.
    pub fn capture(&self, gateway_order_id: &str) -> (String, String) {
        let amount = self
            .orders
            .get(gateway_order_id)
            .map(|o| o.amount)
            .expect("gateway order exists");
        self.capture_with(gateway_order_id, amount, "captured")
    }

    /// Records a payment with an arbitrary amount and status.
    pub fn capture_with(&self, gateway_order_id: &str, amount: i64, status: &str) -> (String, String) {
        let payment_id = format!("pay_{}", Uuid::new_v4().simple());
        self.payments.insert(
            payment_id.clone(),
            GatewayPayment {
                id: payment_id.clone(),
                order_id: Some(gateway_order_id.to_string()),
                amount,
                currency: "INR".to_string(),
                status: status.to_string(),
                method: Some("card".to_string()),
            },
        );
        let signature = gateway::sign_payment(gateway_order_id, &payment_id, KEY_SECRET);
        (payment_id, signature)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str {
        "rzp_test_key"
    }

    async fn create_order(&self, request: &CreateGatewayOrder) -> Result<GatewayOrder, ServiceError> {
        self.orders_created.fetch_add(1, Ordering::SeqCst);
        let order = GatewayOrder {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount: request.amount,
            currency: request.currency.clone(),
            status: "created".to_string(),
        };
        self.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        self.payments
            .get(payment_id)
            .map(|p| p.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {payment_id} not found")))
    }

    async fn refund(&self, payment_id: &str, amount: i64) -> Result<GatewayRefund, ServiceError> {
        let refund = GatewayRefund {
            id: format!("rfnd_{}", Uuid::new_v4().simple()),
            payment_id: payment_id.to_string(),
            amount,
            status: "processed".to_string(),
        };
        self.refunds.lock().expect("refund log").push(refund.clone());
        Ok(refund)
    }
}

/// Notifier whose delivery always fails.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn order_confirmed(&self, _confirmation: &OrderConfirmation) -> Result<(), ServiceError> {
        Err(ServiceError::ServiceUnavailable("mail relay down".into()))
    }
}

/// Notifier that drops a table the moment the confirmation goes out, so any
/// read of that table after commit fails.
pub struct DropTableNotifier {
    pub db: OnceLock<Arc<DatabaseConnection>>,
    pub table: &'static str,
}

impl DropTableNotifier {
    pub fn new(table: &'static str) -> Self {
        Self {
            db: OnceLock::new(),
            table,
        }
    }
}

#[async_trait]
impl Notifier for DropTableNotifier {
    async fn order_confirmed(&self, _confirmation: &OrderConfirmation) -> Result<(), ServiceError> {
        let db = self.db.get().expect("notifier wired to database");
        db.execute_unprepared(&format!("DROP TABLE {}", self.table))
            .await
            .expect("drop table");
        Ok(())
    }
}

/// Helper harness for spinning up the full router against an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub staging: Arc<InMemoryStagingStore>,
    auth: Arc<AuthService>,
    admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier)).await
    }

    /// Construct a test application with fresh database state.
    pub async fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
            JWT_SECRET.to_string(),
            "development".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.gateway.key_secret = KEY_SECRET.to_string();
        cfg.gateway.webhook_secret = WEBHOOK_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx, Vec::new()));

        let gateway = Arc::new(FakeGateway::default());
        let staging = Arc::new(InMemoryStagingStore::new(cfg.staging.ttl()));

        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            event_sender.clone(),
            staging.clone(),
            gateway.clone(),
            notifier,
        );

        let auth = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(3600),
        )));
        let admin_token = auth
            .issue_token(Uuid::new_v4(), Some("ops@example.com".into()), &[ADMIN_ROLE])
            .expect("admin token");

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth: auth.clone(),
        };

        Self {
            router: build_router(state.clone()),
            state,
            gateway,
            staging,
            auth,
            admin_token,
            _event_task: event_task,
        }
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Bearer token for a shopper.
    pub fn token_for(&self, customer_id: Uuid) -> String {
        self.auth
            .issue_token(customer_id, Some("shopper@example.com".into()), &[CUSTOMER_ROLE])
            .expect("customer token")
    }

    /// Send a JSON request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw body, as the gateway does for webhooks.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_variant(&self, sku: &str, price: i64, stock: i32) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            title: Set(format!("Tee {sku}")),
            size: Set(Some("M".to_string())),
            color: Set(Some("Black".to_string())),
            price: Set(price),
            stock_level: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed variant")
    }

    pub async fn seed_address(&self, customer_id: Uuid) -> Uuid {
        customer_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            full_name: Set("Asha Rao".to_string()),
            phone: Set(Some("+91 90000 00000".to_string())),
            line1: Set("12 MG Road".to_string()),
            line2: Set(None),
            city: Set("Bengaluru".to_string()),
            state: Set("KA".to_string()),
            postal_code: Set("560001".to_string()),
            country: Set("IN".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address")
        .id
    }

    pub async fn add_to_cart(&self, customer_id: Uuid, variant: &product_variant::Model, quantity: i32) {
        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            product_id: Set(variant.product_id),
            variant_sku: Set(variant.sku.clone()),
            unit_price: Set(variant.price),
            quantity: Set(quantity),
            saved_for_later: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed cart item");
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: &str,
        value: i64,
        max_discount: Option<i64>,
        usage_limit: Option<i32>,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(discount_type.to_string()),
            discount_value: Set(value),
            max_discount: Set(max_discount),
            valid_from: Set(None),
            valid_until: Set(None),
            usage_limit: Set(usage_limit),
            used_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    pub async fn stock_of(&self, variant_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .expect("query variant")
            .expect("variant exists")
            .stock_level
    }

    pub async fn coupon_usage(&self, coupon_id: Uuid) -> i32 {
        coupon::Entity::find_by_id(coupon_id)
            .one(&*self.state.db)
            .await
            .expect("query coupon")
            .expect("coupon exists")
            .used_count
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn cart_size(&self, customer_id: Uuid) -> usize {
        use sea_orm::{ColumnTrait, QueryFilter};
        cart_item::Entity::find()
            .filter(cart_item::Column::CustomerId.eq(customer_id))
            .all(&*self.state.db)
            .await
            .expect("query cart")
            .len()
    }

    /// Runs create-order for the customer and returns the gateway order id.
    pub async fn create_order(&self, token: &str, address_id: Uuid, coupon: Option<&str>) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/v1/payments/create-order",
                Some(serde_json::json!({
                    "address_id": address_id,
                    "coupon_code": coupon,
                })),
                Some(token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        body["data"]["gateway_order_id"]
            .as_str()
            .expect("gateway order id")
            .to_string()
    }

    pub async fn verify(
        &self,
        token: &str,
        gateway_order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> axum::response::Response {
        self.request(
            Method::POST,
            "/api/v1/payments/verify-payment",
            Some(serde_json::json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": payment_id,
                "razorpay_signature": signature,
            })),
            Some(token),
        )
        .await
    }
}

/// An order that went through checkout and verification.
pub struct SettledOrder {
    pub customer_id: Uuid,
    pub token: String,
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub payment_id: String,
    pub total: i64,
}

impl TestApp {
    /// Checks out one unit of a fresh variant and verifies the payment.
    pub async fn settled_order(&self, sku: &str, price: i64) -> SettledOrder {
        let customer_id = Uuid::new_v4();
        let token = self.token_for(customer_id);
        let address = self.seed_address(customer_id).await;
        let variant = self.seed_variant(sku, price, 10).await;
        self.add_to_cart(customer_id, &variant, 1).await;

        let gateway_order_id = self.create_order(&token, address, None).await;
        let (payment_id, signature) = self.gateway.capture(&gateway_order_id);
        let response = self.verify(&token, &gateway_order_id, &payment_id, &signature).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        let order = &body["data"]["order"];

        SettledOrder {
            customer_id,
            token,
            order_id: order["id"].as_str().and_then(|id| id.parse().ok()).expect("order id"),
            gateway_order_id,
            payment_id,
            total: order["pricing"]["total"].as_i64().expect("order total"),
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
