use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Payment amount 1800 does not match order total 1850",
    "code": "amount_mismatch",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error code for checkout failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Failures of the checkout, settlement and fulfillment flows.
///
/// Every variant is a business outcome the caller can act on; infrastructure
/// failures travel as [`ServiceError`] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("Order total must be greater than zero (computed {total})")]
    InvalidOrderTotal { total: i64 },

    #[error("Insufficient stock for {title} ({sku}): requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        title: String,
        requested: i32,
        available: i32,
    },

    #[error("Product variant {0} is no longer available")]
    VariantNotFound(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Shipping address not found")]
    AddressNotFound,

    #[error("Coupon {0} not found")]
    CouponNotFound(String),

    #[error("Coupon {0} is not active")]
    CouponInactive(String),

    #[error("Coupon {0} has expired or is not yet valid")]
    CouponExpired(String),

    #[error("Coupon {0} has reached its usage limit")]
    CouponUsageExceeded(String),

    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error("Payment was not successful (gateway status: {status})")]
    PaymentNotSuccessful { status: String },

    #[error("Payment amount {paid} does not match order total {expected}")]
    AmountMismatch { expected: i64, paid: i64 },

    #[error("Staged order belongs to another customer")]
    Unauthorized,

    #[error("Order has already been processed or the checkout session expired")]
    OrderAlreadyProcessedOrExpired,

    #[error("Cannot transition order from '{from}' to '{to}'")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Refund rejected: {0}")]
    RefundRejected(String),
}

impl CheckoutError {
    /// Stable machine-readable code, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLineItem(_) => "invalid_line_item",
            Self::InvalidOrderTotal { .. } => "invalid_order_total",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::VariantNotFound(_) => "variant_not_found",
            Self::EmptyCart => "empty_cart",
            Self::AddressNotFound => "address_not_found",
            Self::CouponNotFound(_) => "coupon_not_found",
            Self::CouponInactive(_) => "coupon_inactive",
            Self::CouponExpired(_) => "coupon_expired",
            Self::CouponUsageExceeded(_) => "coupon_usage_exceeded",
            Self::InvalidSignature => "invalid_signature",
            Self::PaymentNotSuccessful { .. } => "payment_not_successful",
            Self::AmountMismatch { .. } => "amount_mismatch",
            Self::Unauthorized => "unauthorized",
            Self::OrderAlreadyProcessedOrExpired => "order_already_processed_or_expired",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::RefundRejected(_) => "refund_rejected",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::OrderAlreadyProcessedOrExpired => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::CacheError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Checkout(err) => err.status_code(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => "Internal server error".to_string(),
            Self::GatewayError(_) => "Payment gateway unavailable".to_string(),
            Self::Checkout(err) => err.to_string(),
            _ => self.to_string(),
        }
    }

    /// The checkout failure code, when this error carries one.
    pub fn checkout_code(&self) -> Option<&'static str> {
        match self {
            Self::Checkout(err) => Some(err.code()),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.checkout_code().map(str::to_string),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
