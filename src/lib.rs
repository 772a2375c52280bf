//! Storefront API Library
//!
//! Server-priced checkout, payment-gateway settlement and order fulfillment
//! for the storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use std::{sync::Arc, time::Duration};

use axum::{http::HeaderValue, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService, ADMIN_ROLE};

/// Upper bound on a single request, gateway round-trips included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

// Common response wrappers
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Versioned API. The webhook is authenticated by its body signature, every
/// other route by bearer token.
pub fn api_v1_routes(auth: Arc<AuthService>) -> Router<AppState> {
    let payments = handlers::payments::payment_routes()
        .with_auth(auth.clone())
        .merge(handlers::payments::payment_admin_routes().with_role(ADMIN_ROLE, auth.clone()))
        .route(
            "/webhook",
            axum::routing::post(handlers::payment_webhooks::payment_webhook),
        );

    let orders = handlers::orders::order_routes()
        .with_auth(auth.clone())
        .merge(handlers::orders::order_admin_routes().with_role(ADMIN_ROLE, auth.clone()));

    let inventory =
        handlers::inventory::inventory_admin_routes().with_role(ADMIN_ROLE, auth);

    Router::new()
        .nest("/payments", payments)
        .nest("/orders", orders)
        .nest("/inventory", inventory)
}

/// CORS from explicit origins, or permissive where the configuration allows it.
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("no CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

/// Full application router with the shared middleware stack applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes(state.auth.clone()))
        .with_state(state)
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        // Outermost, so every span and error body carries the request id
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}
