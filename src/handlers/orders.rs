use axum::{
    extract::{Json, Path, State},
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::{
        fulfillment::{OrderStatus, StatusTransition},
        orders::OrderView,
    },
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub courier: Option<String>,
}

/// Get an order by ID
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order found", body = crate::ApiResponse<OrderView>),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let order = state.services.orders.find(order_id).await?;
    if !user.can_access(order.customer_id) {
        return Err(ServiceError::Forbidden(
            "order belongs to another customer".to_string(),
        ));
    }
    Ok(Json(ApiResponse::success(order)))
}

/// Move an order through its fulfillment lifecycle (admin only)
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::ApiResponse<OrderView>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    request.validate()?;

    info!(admin_id = %user.user_id, %order_id, status = %request.status, "status change requested");
    let order = state
        .services
        .fulfillment
        .transition(
            order_id,
            request.status,
            StatusTransition {
                description: request.description,
                tracking_number: request.tracking_number,
                courier: request.courier,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(order)))
}

pub fn order_routes() -> Router<AppState> {
    Router::new().route("/:id", get(get_order))
}

pub fn order_admin_routes() -> Router<AppState> {
    Router::new().route("/:id/status", patch(update_order_status))
}
