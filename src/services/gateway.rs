use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

use crate::{config::GatewayConfig, errors::ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Gateway payment states that count as money received.
const SUCCESSFUL_STATUSES: &[&str] = &["captured", "authorized"];

const MAX_GATEWAY_ID_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGatewayOrder {
    pub amount: i64,
    pub currency: String,
    /// Our own reference, echoed back by the gateway
    pub receipt: String,
    #[serde(default)]
    pub notes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub method: Option<String>,
}

impl GatewayPayment {
    pub fn is_successful(&self) -> bool {
        SUCCESSFUL_STATUSES.contains(&self.status.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: String,
}

/// The calls the storefront makes against the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the client so it can open the payment widget.
    fn key_id(&self) -> &str;

    async fn create_order(&self, request: &CreateGatewayOrder) -> Result<GatewayOrder, ServiceError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError>;

    async fn refund(&self, payment_id: &str, amount: i64) -> Result<GatewayRefund, ServiceError>;
}

/// HTTP client for a Razorpay-compatible orders/payments API.
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ServiceError::GatewayError(format!("malformed {what} response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        error!(%status, %body, "gateway rejected {what} request");
        match status {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(format!("{what} not found at gateway"))),
            StatusCode::BAD_REQUEST => Err(ServiceError::BadRequest(format!("gateway rejected {what} request"))),
            _ => Err(ServiceError::GatewayError(format!("{what} request failed with {status}"))),
        }
    }
}

/// Gateway ids are opaque `prefix_token` strings; anything else never reaches a URL.
pub fn is_gateway_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_GATEWAY_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn checked_id<'a>(id: &'a str, what: &str) -> Result<&'a str, ServiceError> {
    if is_gateway_id(id) {
        Ok(id)
    } else {
        Err(ServiceError::BadRequest(format!("malformed {what} id")))
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    ServiceError::GatewayError(format!("transport failure: {e}"))
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    #[instrument(skip(self, request), fields(amount = request.amount, receipt = %request.receipt))]
    async fn create_order(&self, request: &CreateGatewayOrder) -> Result<GatewayOrder, ServiceError> {
        let response = self
            .client
            .post(self.url("/v1/orders"))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let order: GatewayOrder = Self::read(response, "order").await?;
        debug!(gateway_order_id = %order.id, "gateway order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{}", checked_id(payment_id, "payment")?)))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(transport_error)?;

        Self::read(response, "payment").await
    }

    #[instrument(skip(self))]
    async fn refund(&self, payment_id: &str, amount: i64) -> Result<GatewayRefund, ServiceError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/payments/{}/refund", checked_id(payment_id, "payment")?)))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::json!({ "amount": amount }))
            .send()
            .await
            .map_err(transport_error)?;

        Self::read(response, "refund").await
    }
}

fn mac(secret: &str, message: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(mac)
}

fn verify_hex(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    // verify_slice compares in constant time
    mac(secret, message).map_or(false, |m| m.verify_slice(&signature).is_ok())
}

fn sign_hex(secret: &str, message: &[u8]) -> String {
    mac(secret, message)
        .map(|m| hex::encode(m.finalize().into_bytes()))
        .unwrap_or_default()
}

fn payment_message(order_id: &str, payment_id: &str) -> String {
    format!("{order_id}|{payment_id}")
}

/// Checks the client-returned signature over `order_id|payment_id`.
pub fn verify_payment_signature(order_id: &str, payment_id: &str, signature: &str, secret: &str) -> bool {
    verify_hex(secret, payment_message(order_id, payment_id).as_bytes(), signature)
}

pub fn sign_payment(order_id: &str, payment_id: &str, secret: &str) -> String {
    sign_hex(secret, payment_message(order_id, payment_id).as_bytes())
}

/// Checks a webhook signature computed over the exact raw request body.
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    verify_hex(secret, body, signature)
}

pub fn sign_webhook(body: &[u8], secret: &str) -> String {
    sign_hex(secret, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use wiremock::matchers::{basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "gateway_test_secret";

    fn gateway(server: &MockServer) -> RazorpayGateway {
        RazorpayGateway::new(&GatewayConfig {
            base_url: server.uri(),
            key_id: "rzp_test_key".into(),
            key_secret: SECRET.into(),
            webhook_secret: "whsec".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn correct_signature_accepts() {
        let sig = sign_payment("order_A1", "pay_B2", SECRET);
        assert!(verify_payment_signature("order_A1", "pay_B2", &sig, SECRET));
    }

    #[test]
    fn signature_is_bound_to_pair_and_secret() {
        let sig = sign_payment("order_A1", "pay_B2", SECRET);
        assert!(!verify_payment_signature("order_A1", "pay_B3", &sig, SECRET));
        assert!(!verify_payment_signature("order_A2", "pay_B2", &sig, SECRET));
        assert!(!verify_payment_signature("order_A1", "pay_B2", &sig, "other"));
        assert!(!verify_payment_signature("order_A1", "pay_B2", "not-hex", SECRET));
        assert!(!verify_payment_signature("order_A1", "pay_B2", "", SECRET));
    }

    proptest! {
        #[test]
        fn flipping_any_signature_byte_rejects(index in 0usize..32, flip in 1u8..=255) {
            let sig = sign_payment("order_P", "pay_Q", SECRET);
            let mut bytes = hex::decode(&sig).unwrap();
            bytes[index] ^= flip;
            prop_assert!(!verify_payment_signature("order_P", "pay_Q", &hex::encode(bytes), SECRET));
        }
    }

    #[test]
    fn webhook_signature_covers_raw_body() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = sign_webhook(body, "whsec");
        assert!(verify_webhook_signature(body, &sig, "whsec"));
        assert!(!verify_webhook_signature(br#"{"event":"payment.failed"}"#, &sig, "whsec"));
    }

    #[tokio::test]
    async fn create_order_posts_amount_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(basic_auth("rzp_test_key", SECRET))
            .and(body_json(serde_json::json!({
                "amount": 1850,
                "currency": "INR",
                "receipt": "rcpt_1",
                "notes": {}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "order_XYZ",
                "amount": 1850,
                "currency": "INR",
                "status": "created"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order = gateway(&server)
            .create_order(&CreateGatewayOrder {
                amount: 1850,
                currency: "INR".into(),
                receipt: "rcpt_1".into(),
                notes: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(order.id, "order_XYZ");
    }

    #[tokio::test]
    async fn fetch_payment_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/pay_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pay_1",
                "order_id": "order_1",
                "amount": 1800,
                "currency": "INR",
                "status": "captured",
                "method": "upi",
                "entity": "payment"
            })))
            .mount(&server)
            .await;

        let payment = gateway(&server).fetch_payment("pay_1").await.unwrap();
        assert!(payment.is_successful());
        assert_eq!(payment.amount, 1800);
        assert_eq!(payment.method.as_deref(), Some("upi"));
    }

    #[tokio::test]
    async fn gateway_failures_become_service_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payments/pay_9/refund"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gw = gateway(&server);
        assert_matches!(gw.fetch_payment("missing").await, Err(ServiceError::NotFound(_)));
        assert_matches!(gw.refund("pay_9", 100).await, Err(ServiceError::GatewayError(_)));
    }

    #[tokio::test]
    async fn ids_that_would_leave_the_payments_path_never_reach_the_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/order_victim"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "order_victim",
                "amount": 99900,
                "currency": "INR",
                "status": "paid"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let gw = gateway(&server);
        for id in ["../orders/order_victim", "pay_1/../../orders/order_victim", "pay 1", "pay_1?x=1", ""] {
            assert_matches!(gw.fetch_payment(id).await, Err(ServiceError::BadRequest(_)), "id {id:?}");
            assert_matches!(gw.refund(id, 100).await, Err(ServiceError::BadRequest(_)), "id {id:?}");
        }
    }

    #[test]
    fn gateway_id_shape() {
        assert!(is_gateway_id("pay_29QQoUBi66xm2f"));
        assert!(is_gateway_id("order_EKwxwAgItmmXdp"));
        assert!(!is_gateway_id("pay-1"));
        assert!(!is_gateway_id("..%2Forders"));
        assert!(!is_gateway_id(&"a".repeat(65)));
    }
}
