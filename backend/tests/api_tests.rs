//! HTTP API tests over the in-memory backend

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use inventory_engine::{create_app, AppState, Config};

fn app(fx: &Fixture) -> Router {
    create_app(AppState {
        services: fx.services.clone(),
        config: Arc::new(Config::default()),
        db: None,
    })
}

/// Decimals travel as JSON strings
fn num(value: &Value) -> rust_decimal::Decimal {
    dec(value.as_str().unwrap())
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_memory_storage() {
    let fx = Fixture::new();
    let (status, body) = send(app(&fx), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_hold_lifecycle_over_http() {
    let fx = Fixture::new();
    fx.stock(COFFEE, "100", "G").await;
    fx.recipe(ESPRESSO, &[(COFFEE, "30", "G")]).await;

    let (status, hold) = send(
        app(&fx),
        "POST",
        "/api/v1/holds",
        Some(json!({
            "branch_id": BRANCH,
            "cart_id": "6f1c9a52-52f8-4d1e-9a0e-3c2b8f4b7a10",
            "items": [{ "product_detail_id": ESPRESSO, "quantity": "1" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let hold_id = hold["hold_id"].as_str().unwrap().to_string();

    let (status, stock) = send(app(&fx), "GET", &format!("/api/v1/stock/{BRANCH}/{COFFEE}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&stock["available"]), dec("70"));

    let order_id = "0b7e2c1d-4a5f-4e8b-9c3d-2f1a6b7c8d9e";
    let (status, _) = send(
        app(&fx),
        "POST",
        "/api/v1/holds/commit",
        Some(json!({ "hold_id": hold_id, "order_id": order_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, lookup) = send(app(&fx), "GET", &format!("/api/v1/holds/by-order/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lookup["hold_id"], hold_id.as_str());

    let (status, error) = send(
        app(&fx),
        "POST",
        "/api/v1/holds/commit",
        Some(json!({ "hold_id": hold_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "NO_ACTIVE_HOLD");
}

#[tokio::test]
async fn test_insufficient_stock_response_lists_shortages() {
    let fx = Fixture::new();
    fx.stock(COFFEE, "10", "G").await;
    fx.recipe(ESPRESSO, &[(COFFEE, "30", "G")]).await;

    let (status, error) = send(
        app(&fx),
        "POST",
        "/api/v1/holds",
        Some(json!({
            "branch_id": BRANCH,
            "guest_id": "6f1c9a52-52f8-4d1e-9a0e-3c2b8f4b7a10",
            "items": [{ "product_detail_id": ESPRESSO, "quantity": "1" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["code"], "INSUFFICIENT_STOCK");
    assert_eq!(error["error"]["details"]["shortages"][0]["ingredient_id"], COFFEE);
}

#[tokio::test]
async fn test_blocked_manager_adjustment_is_locked() {
    let fx = Fixture::new();
    fx.stock(COFFEE, "100", "G").await;
    fx.hours((0, 0), (23, 59)).await;

    let (status, error) = send(
        app(&fx),
        "POST",
        "/api/v1/adjustments/manager",
        Some(json!({
            "branch_id": BRANCH,
            "ingredient_id": COFFEE,
            "physical_quantity": "90",
            "recorded_by": "manager"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(error["error"]["code"], "ADJUSTMENT_BLOCKED_DURING_BUSINESS");
}

#[tokio::test]
async fn test_receipt_then_cost_and_conversion() {
    let fx = Fixture::new();
    fx.metric_units().await;

    let (status, outcome) = send(
        app(&fx),
        "POST",
        "/api/v1/receipts",
        Some(json!({
            "branch_id": BRANCH,
            "ingredient_id": COFFEE,
            "quantity": "2",
            "unit_code": "KG",
            "unit_price": "25"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["stock"]["unit"], "KG");

    let (status, cost) = send(app(&fx), "GET", &format!("/api/v1/costs/{BRANCH}/{COFFEE}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&cost["avg_cost"]), dec("25"));

    let (status, converted) = send(
        app(&fx),
        "POST",
        "/api/v1/conversions/convert",
        Some(json!({
            "ingredient_id": COFFEE,
            "from_unit": "KG",
            "to_unit": "G",
            "quantity": "0.25"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&converted["quantity"]), dec("250"));
    assert_eq!(num(&converted["factor"]), dec("1000"));
}

#[tokio::test]
async fn test_set_stock_cannot_drop_below_reserved() {
    let fx = Fixture::new();
    fx.stock(COFFEE, "100", "G").await;
    fx.services
        .ledger
        .reserve(key(COFFEE), dec("60"), at(2024, 6, 1, 9, 0))
        .await
        .unwrap();

    let uri = format!("/api/v1/stock/{BRANCH}/{COFFEE}");
    let (status, _) = send(
        app(&fx),
        "PUT",
        &uri,
        Some(json!({ "quantity": "50", "unit": "G" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Reserved grams cannot be reinterpreted as kilograms
    let (status, body) = send(
        app(&fx),
        "PUT",
        &uri,
        Some(json!({ "quantity": "150", "unit": "kg" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(fx.current(COFFEE).await.unit, "G");
    assert_eq!(body["error"]["field"], "unit");

    let (status, stock) = send(
        app(&fx),
        "PUT",
        &uri,
        Some(json!({ "quantity": "150", "unit": "G", "threshold": "20" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&stock["reserved_quantity"]), dec("60"));
    assert_eq!(num(&stock["available"]), dec("90"));
}
