//! In-process HTTP tests: the production router over the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use tillpoint_api::app::build_app;
use tillpoint_api::app::services::AppServices;
use tillpoint_infra::EngineConfig;

fn app() -> Router {
    build_app(Arc::new(AppServices::in_memory(EngineConfig::default())))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with_headers(app, method, uri, body, &[]).await
}

async fn send_with_headers(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_product(app: &Router, sku: &str, price: &str, stock: i64) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/products",
        Some(json!({ "sku": sku, "name": format!("Product {sku}"), "unitPrice": price, "stockQuantity": stock })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let (status, _) = send(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn checkout_then_oversell() {
    let app = app();
    let p1 = create_product(&app, "P1", "10.00", 5).await;

    let (status, sale) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": p1, "quantity": 3 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{sale}");
    assert_eq!(sale["totalAmount"], "30.00");
    assert_eq!(sale["lineItems"][0]["productId"], p1.as_str());
    assert_eq!(sale["lineItems"][0]["quantity"], 3);
    assert_eq!(sale["lineItems"][0]["unitPriceAtSale"], "10.00");
    assert!(sale["saleId"].is_string());
    assert!(sale["createdAt"].is_string());

    let (_, product) = send(&app, "GET", &format!("/products/{p1}"), None).await;
    assert_eq!(product["stockQuantity"], 2);

    let (status, err) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": p1, "quantity": 3 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "insufficient_stock");

    let sale_id = sale["saleId"].as_str().unwrap();
    let (status, fetched) = send(&app, "GET", &format!("/sales/{sale_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["totalAmount"], "30.00");

    let (status, listed) = send(&app, "GET", "/sales", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn error_kinds_map_to_statuses() {
    let app = app();
    let p1 = create_product(&app, "P1", "1.00", 5).await;

    let (status, err) = send(&app, "POST", "/sales", Some(json!({ "items": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid_input");

    let (status, _) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": p1, "quantity": 0 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": "not-a-uuid", "quantity": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = "01890a5d-ac96-774b-bcce-b302099a8057";
    let (status, err) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": p1, "quantity": 2 }, { "productId": missing, "quantity": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "product_not_found");

    let (_, product) = send(&app, "GET", &format!("/products/{p1}"), None).await;
    assert_eq!(product["stockQuantity"], 5);

    let (status, _) = send(&app, "GET", &format!("/sales/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn idempotency_header_replays_the_first_sale() {
    let app = app();
    let p1 = create_product(&app, "P1", "2.50", 5).await;
    let body = json!({ "items": [{ "productId": p1, "quantity": 2 }] });

    let (status, first) = send_with_headers(
        &app,
        "POST",
        "/sales",
        Some(body.clone()),
        &[("Idempotency-Key", "till-3-0042")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": p1, "quantity": 2 }], "idempotencyKey": "till-3-0042" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["saleId"], second["saleId"]);

    let (_, product) = send(&app, "GET", &format!("/products/{p1}"), None).await;
    assert_eq!(product["stockQuantity"], 3);
}

#[tokio::test]
async fn catalog_edits_keep_sale_history_intact() {
    let app = app();
    let p1 = create_product(&app, "P1", "10.00", 5).await;
    let unsold = create_product(&app, "P2", "1.00", 1).await;

    let (status, _) = send(&app, "POST", "/products", Some(json!({ "sku": "P1", "name": "Dup", "unitPrice": "1.00" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, sale) = send(
        &app,
        "POST",
        "/sales",
        Some(json!({ "items": [{ "productId": p1, "quantity": 1 }] })),
    )
    .await;

    let (status, updated) = send(
        &app,
        "PATCH",
        &format!("/products/{p1}"),
        Some(json!({ "unitPrice": "12.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["unitPrice"], "12.00");
    assert_eq!(updated["stockQuantity"], 4);

    let sale_id = sale["saleId"].as_str().unwrap();
    let (_, fetched) = send(&app, "GET", &format!("/sales/{sale_id}"), None).await;
    assert_eq!(fetched["lineItems"][0]["unitPriceAtSale"], "10.00");

    let (status, err) = send(&app, "DELETE", &format!("/products/{p1}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "product_referenced");

    let (status, _) = send(&app, "DELETE", &format!("/products/{unsold}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/products/{unsold}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = app();
    let p1 = create_product(&app, "P1", "1.00", 5).await;

    let cases = [
        ("/sales", json!({ "items": [{ "productId": p1, "quantity": 1.5 }] })),
        ("/sales", json!({ "idempotencyKey": "abc" })),
        ("/products", json!({ "sku": "P2", "name": "No price" })),
    ];
    for (uri, body) in cases {
        let (status, err) = send(&app, "POST", uri, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(err["error"], "invalid_input");
        assert!(err["message"].is_string());
    }

    let (status, err) = send(
        &app,
        "PATCH",
        &format!("/products/{p1}"),
        Some(json!({ "unitPrice": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid_input");

    let (_, product) = send(&app, "GET", &format!("/products/{p1}"), None).await;
    assert_eq!(product["stockQuantity"], 5);
}
