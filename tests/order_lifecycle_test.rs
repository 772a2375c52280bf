mod common;

use axum::http::{Method, StatusCode};
use common::{read_json, TestApp};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use serde_json::json;
use storefront_api::entities::order;
use uuid::Uuid;

async fn set_status(app: &TestApp, order_id: Uuid, status: &str) {
    let model = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: order::ActiveModel = model.into();
    active.status = Set(status.to_string());
    active.update(&*app.state.db).await.unwrap();
}

async fn transition(app: &TestApp, order_id: Uuid, body: serde_json::Value) -> axum::response::Response {
    app.request(
        Method::PATCH,
        &format!("/api/v1/orders/{order_id}/status"),
        Some(body),
        Some(app.admin_token()),
    )
    .await
}

async fn refund(app: &TestApp, order_id: Uuid, amount: i64) -> axum::response::Response {
    app.request(
        Method::POST,
        "/api/v1/payments/refund",
        Some(json!({ "order_id": order_id, "amount": amount })),
        Some(app.admin_token()),
    )
    .await
}

#[tokio::test]
async fn order_walks_full_fulfillment_sequence() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-SEQ-M", 999).await;
    set_status(&app, settled.order_id, "pending").await;

    let mut timeline_len = 3;
    for status in [
        "confirmed",
        "processing",
        "packed",
        "shipped",
        "out-for-delivery",
        "delivered",
    ] {
        let mut body = json!({ "status": status });
        if status == "shipped" {
            body["tracking_number"] = json!("AWB123456");
            body["courier"] = json!("BlueDart");
        }
        let response = transition(&app, settled.order_id, body).await;
        assert_eq!(response.status(), StatusCode::OK, "transition to {status}");
        let order = read_json(response).await["data"].clone();

        timeline_len += 1;
        assert_eq!(order["status"], status);
        assert_eq!(order["timeline"].as_array().unwrap().len(), timeline_len);
        let states: Vec<&str> = order["timeline"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["state"].as_str().unwrap())
            .collect();
        assert!(states.iter().filter(|s| **s == "current").count() <= 1);
    }

    let order = app.state.services.orders.find(settled.order_id).await.unwrap();
    assert_eq!(order.tracking_number.as_deref(), Some("AWB123456"));
    assert_eq!(order.courier.as_deref(), Some("BlueDart"));

    let response = transition(&app, settled.order_id, json!({ "status": "processing" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "invalid_status_transition");
}

#[tokio::test]
async fn concurrent_transitions_from_same_status_apply_once() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-RCE-M", 800).await;

    let (first, second) = tokio::join!(
        transition(&app, settled.order_id, json!({ "status": "processing" })),
        transition(&app, settled.order_id, json!({ "status": "processing" })),
    );
    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST]);

    let order = app.state.services.orders.find(settled.order_id).await.unwrap();
    assert_eq!(order.status.to_string(), "processing");
    assert_eq!(order.timeline.len(), 4);
}

#[tokio::test]
async fn transitions_leave_stock_alone() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-STK-M", 400).await;
    let variant = app
        .state
        .services
        .stock
        .find_variant("TEE-STK-M")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variant.stock_level, 9);

    let response = transition(&app, settled.order_id, json!({ "status": "cancelled" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.stock_of(variant.id).await, 9);
}

#[tokio::test]
async fn status_changes_require_admin() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-ADM-M", 300).await;

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}/status", settled.order_id),
            Some(json!({ "status": "processing" })),
            Some(&settled.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let response = transition(&app, Uuid::new_v4(), json!({ "status": "processing" })).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn orders_are_visible_to_owner_and_admin_only() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-VIS-M", 250).await;
    let uri = format!("/api/v1/orders/{}", settled.order_id);

    let owner = app.request(Method::GET, &uri, None, Some(&settled.token)).await;
    assert_eq!(owner.status(), StatusCode::OK);
    let body = read_json(owner).await;
    assert_eq!(body["data"]["customer_id"], settled.customer_id.to_string());
    assert_eq!(body["data"]["shipping_address"]["city"], "Bengaluru");

    let admin = app.request(Method::GET, &uri, None, Some(app.admin_token())).await;
    assert_eq!(admin.status(), StatusCode::OK);

    let stranger = app.token_for(Uuid::new_v4());
    let response = app.request(Method::GET, &uri, None, Some(&stranger)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn full_refund_of_cancelled_order_moves_it_to_refunded() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-RFD-M", 1500).await;

    let response = transition(&app, settled.order_id, json!({ "status": "cancelled" })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/refund",
            Some(json!({ "order_id": settled.order_id, "reason": "customer cancelled" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["data"]["amount"], settled.total);
    assert_eq!(body["data"]["payment_status"], "refunded");
    assert_eq!(body["data"]["order_status"], "refunded");

    let refunds = app.gateway.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_id, settled.payment_id);
}

#[tokio::test]
async fn partial_refunds_accumulate_and_cannot_exceed_total() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-PRT-M", 1000).await;

    let response = refund(&app, settled.order_id, 400).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["data"]["payment_status"], "partially_refunded");
    assert_eq!(body["data"]["order_status"], "confirmed");

    let response = refund(&app, settled.order_id, settled.total).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "refund_rejected");

    let response = refund(&app, settled.order_id, settled.total - 400).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_json(response).await["data"]["refunded_total"], settled.total);
}

#[tokio::test]
async fn concurrent_partial_refunds_never_exceed_total() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-CRF-M", 1000).await;
    let share = settled.total * 6 / 10;

    let (first, second) = tokio::join!(
        refund(&app, settled.order_id, share),
        refund(&app, settled.order_id, share),
    );
    let mut statuses = vec![first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);

    let order = app.state.services.orders.find_model(settled.order_id).await.unwrap();
    assert_eq!(order.refunded_amount, share);
    assert_eq!(order.payment_status, "partially_refunded");
    assert_eq!(app.gateway.refunds.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn refunds_require_admin() {
    let app = TestApp::new().await;
    let settled = app.settled_order("TEE-RAD-M", 1000).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/refund",
            Some(json!({ "order_id": settled.order_id })),
            Some(&settled.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.gateway.refunds.lock().unwrap().is_empty());
}
