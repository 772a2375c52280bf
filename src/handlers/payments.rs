use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::{
        checkout::{CreateOrderCommand, GatewayCheckout},
        gateway::is_gateway_id,
        orders::OrderView,
        refunds::RefundOutcome,
        settlement::VerifyPaymentCommand,
    },
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub address_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "razorpay_order_id")]
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    #[validate(length(min = 1))]
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub order: OrderView,
    /// Post-settlement steps that did not complete; the order stands regardless
    pub incomplete_steps: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PaymentFailureRequest {
    #[serde(alias = "razorpay_order_id")]
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefundRequest {
    pub order_id: Uuid,
    /// Minor units; omitted means the remaining balance
    pub amount: Option<i64>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub payment_id: String,
    pub gateway_order_id: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub method: Option<String>,
}

/// Creates a payment-gateway order for the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Gateway order created and checkout staged", body = crate::ApiResponse<GatewayCheckout>),
        (status = 400, description = "Invalid cart, address, coupon or stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GatewayCheckout>>), ServiceError> {
    request.validate()?;

    let checkout = state
        .services
        .checkout
        .create_order(CreateOrderCommand {
            customer_id: user.user_id,
            address_id: request.address_id,
            coupon_code: request.coupon_code,
            notes: request.notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(checkout))))
}

/// Verifies a completed payment and finalizes the order
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify-payment",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 201, description = "Order placed", body = crate::ApiResponse<VerifyPaymentResponse>),
        (status = 400, description = "Signature, amount or stock check failed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staged order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already processed or expired", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<VerifyPaymentResponse>>), ServiceError> {
    request.validate()?;

    let settlement = state
        .services
        .settlement
        .verify(VerifyPaymentCommand {
            customer_id: user.user_id,
            gateway_order_id: request.gateway_order_id,
            gateway_payment_id: request.gateway_payment_id,
            signature: request.signature,
        })
        .await?;

    let response = VerifyPaymentResponse {
        order: settlement.order,
        incomplete_steps: settlement
            .failed_steps
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Reports the gateway's view of a payment
#[utoipa::path(
    get,
    path = "/api/v1/payments/status/{payment_id}",
    params(
        ("payment_id" = String, Path, description = "Gateway payment ID")
    ),
    responses(
        (status = 200, description = "Payment status", body = crate::ApiResponse<PaymentStatusResponse>),
        (status = 400, description = "Malformed payment id", body = crate::errors::ErrorResponse),
        (status = 403, description = "Payment belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(payment_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    if !is_gateway_id(&payment_id) {
        return Err(ServiceError::BadRequest("malformed payment id".to_string()));
    }

    let settled_owner = state
        .services
        .orders
        .find_by_payment_id(&payment_id)
        .await?
        .map(|order| order.customer_id);
    if let Some(owner) = settled_owner {
        if !user.can_access(owner) {
            return Err(ServiceError::Forbidden(
                "payment belongs to another customer".to_string(),
            ));
        }
    }

    let payment = state.services.gateway.fetch_payment(&payment_id).await?;

    // Not settled yet: only the customer holding the staged checkout may look.
    if settled_owner.is_none() && !user.is_admin() {
        let staged_owner = match payment.order_id.as_deref() {
            Some(gateway_order_id) => state.services.checkout.staged_owner(gateway_order_id).await?,
            None => None,
        };
        if staged_owner != Some(user.user_id) {
            return Err(ServiceError::NotFound(format!("Payment {payment_id} not found")));
        }
    }
    Ok(Json(ApiResponse::success(PaymentStatusResponse {
        payment_id: payment.id,
        gateway_order_id: payment.order_id,
        status: payment.status,
        amount: payment.amount,
        currency: payment.currency,
        method: payment.method,
    })))
}

/// Discards the caller's staged checkout after a client-side payment failure
#[utoipa::path(
    post,
    path = "/api/v1/payments/failure",
    request_body = PaymentFailureRequest,
    responses(
        (status = 200, description = "Staged checkout discarded"),
        (status = 403, description = "Staged order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already processed or expired", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_failure(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<PaymentFailureRequest>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    request.validate()?;

    state
        .services
        .checkout
        .discard(user.user_id, &request.gateway_order_id, request.reason.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(())))
}

/// Refunds all or part of an order's payment (admin only)
#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    request_body = RefundRequest,
    responses(
        (status = 201, description = "Refund issued", body = crate::ApiResponse<RefundOutcome>),
        (status = 400, description = "Refund rejected", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RefundOutcome>>), ServiceError> {
    request.validate()?;

    info!(admin_id = %user.user_id, order_id = %request.order_id, "refund requested");
    let outcome = state
        .services
        .refunds
        .refund(request.order_id, request.amount, request.reason)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome))))
}

/// Customer-facing payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-order", post(create_order))
        .route("/verify-payment", post(verify_payment))
        .route("/status/:payment_id", get(payment_status))
        .route("/failure", post(payment_failure))
}

/// Payment routes that require the admin role
pub fn payment_admin_routes() -> Router<AppState> {
    Router::new().route("/refund", post(refund_payment))
}
