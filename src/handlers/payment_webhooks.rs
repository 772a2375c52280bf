use axum::{extract::State, http::HeaderMap, response::Json};
use bytes::Bytes;

use crate::{errors::ServiceError, services::webhooks::WebhookReceipt, ApiResponse, AppState};

/// Header carrying the hex HMAC-SHA256 of the raw request body
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-razorpay-signature";

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = crate::ApiResponse<WebhookReceipt>),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookReceipt>>, ServiceError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let receipt = state.services.webhooks.ingest(&body, signature).await?;
    Ok(Json(ApiResponse::success(receipt)))
}
