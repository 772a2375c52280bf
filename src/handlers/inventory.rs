use axum::{
    extract::{Json, Path, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    auth::AuthenticatedUser, errors::ServiceError, services::stock::StockAdjustment, ApiResponse,
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdjustStockRequest {
    /// Signed change applied to the variant's stock level
    #[validate(custom = "validate_non_zero")]
    pub delta: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

fn validate_non_zero(delta: i32) -> Result<(), ValidationError> {
    if delta == 0 {
        return Err(ValidationError::new("delta_must_be_non_zero"));
    }
    Ok(())
}

/// Adjust a variant's stock level (admin only)
#[utoipa::path(
    post,
    path = "/api/v1/inventory/{sku}/adjust",
    params(
        ("sku" = String, Path, description = "Variant SKU")
    ),
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "Stock adjusted", body = crate::ApiResponse<StockAdjustment>),
        (status = 400, description = "Unknown SKU or adjustment would go negative", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Inventory"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(sku): Path<String>,
    Json(request): Json<AdjustStockRequest>,
) -> Result<Json<ApiResponse<StockAdjustment>>, ServiceError> {
    request.validate()?;

    info!(
        admin_id = %user.user_id,
        sku = %sku,
        delta = request.delta,
        reason = request.reason.as_deref().unwrap_or("-"),
        "stock adjustment requested"
    );
    let adjustment = state.services.stock.adjust(&sku, request.delta).await?;
    Ok(Json(ApiResponse::success(adjustment)))
}

pub fn inventory_admin_routes() -> Router<AppState> {
    Router::new().route("/:sku/adjust", post(adjust_stock))
}
