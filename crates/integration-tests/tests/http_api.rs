//! Router-level tests: authentication, status codes and JSON shapes.

#![allow(clippy::unwrap_used)]

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use shopwright_integration_tests::{TestContext, session_completed, sign, token};
use shopwright_server::payments::SIGNATURE_HEADER;

async fn send(ctx: &TestContext, request: Request<Body>) -> (StatusCode, Value) {
    let response = ctx.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, bearer: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn order_body(product_id: i32, quantity: u32) -> Value {
    json!({
        "orderItems": [{ "productId": product_id, "quantity": quantity }],
        "shippingAddress": {
            "line_1": "42 Galle Rd",
            "city": "Colombo",
            "phone": "+94 11 234 5678"
        }
    })
}

#[tokio::test]
async fn test_health_endpoints() {
    let ctx = TestContext::new();

    let (status, _) = send(&ctx, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&ctx, get("/health/ready", None)).await;
    assert_eq!(status, StatusCode::OK);

    ctx.store.set_unavailable(true);
    let (status, _) = send(&ctx, get("/health/ready", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_orders_require_token() {
    let ctx = TestContext::new();

    let (status, body) = send(&ctx, get("/api/orders/user", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&ctx, get("/api/orders/user", Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_store_outage_on_orders_returns_503() {
    let ctx = TestContext::new();
    let product = ctx.product("Kettle", "45.00", 5).await;
    let alice = token("alice", false);
    ctx.store.set_unavailable(true);

    let (status, body) = send(&ctx, get("/api/orders/user", Some(&alice))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_unavailable");

    let (status, _) = send(
        &ctx,
        json_request("POST", "/api/orders", &alice, &order_body(product.as_i32(), 1)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    ctx.store.set_unavailable(false);
    assert_eq!(ctx.stock(product).await, 5);
}

#[tokio::test]
async fn test_create_and_read_order() {
    let ctx = TestContext::new();
    let product = ctx.product("Kettle", "45.00", 5).await;
    let alice = token("alice", false);

    let (status, created) = send(
        &ctx,
        json_request("POST", "/api/orders", &alice, &order_body(product.as_i32(), 2)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["orderStatus"], "PENDING");
    assert_eq!(created["paymentStatus"], "PENDING");
    assert_eq!(created["items"][0]["product"]["name"], "Kettle");
    let id = created["id"].as_i64().unwrap();

    let (status, read) = send(&ctx, get(&format!("/api/orders/{id}"), Some(&alice))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["shippingAddress"]["city"], "Colombo");

    let (status, list) = send(&ctx, get("/api/orders/user", Some(&alice))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let bob = token("bob", false);
    let (status, body) = send(&ctx, get(&format!("/api/orders/{id}"), Some(&bob))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_create_order_errors() {
    let ctx = TestContext::new();
    let product = ctx.product("Kettle", "45.00", 1).await;
    let alice = token("alice", false);

    let (status, body) = send(
        &ctx,
        json_request("POST", "/api/orders", &alice, &order_body(product.as_i32(), 2)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_stock");

    let (status, _) = send(
        &ctx,
        json_request("POST", "/api/orders", &alice, &order_body(9999, 1)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &ctx,
        json_request("POST", "/api/orders", &alice, &json!({ "orderItems": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let ctx = TestContext::new();
    let product = ctx.product("Lamp", "25.00", 5).await;
    let order = ctx.place_order("alice", &[(product, 2)]).await;

    let customer = token("alice", false);
    let (status, _) = send(&ctx, get("/api/orders/admin/all", Some(&customer))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = token("root", true);
    let (status, all) = send(&ctx, get("/api/orders/admin/all", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (status, updated) = send(
        &ctx,
        json_request(
            "PUT",
            &format!("/api/orders/admin/{}", order.id),
            &admin,
            &json!({ "paymentStatus": "PAID" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["paymentStatus"], "PAID");
    assert_eq!(ctx.stock(product).await, 3);

    let (status, shipped) = send(
        &ctx,
        json_request(
            "PUT",
            &format!("/api/orders/admin/{}", order.id),
            &admin,
            &json!({ "orderStatus": "SHIPPED" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipped["orderStatus"], "SHIPPED");

    let (status, body) = send(
        &ctx,
        json_request(
            "PUT",
            &format!("/api/orders/admin/{}", order.id),
            &admin,
            &json!({ "orderStatus": "PENDING" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, report) = send(&ctx, get("/api/orders/admin/sales?days=7", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report[0]["orderCount"], 1);

    let (status, _) = send(&ctx, get("/api/orders/admin/sales?days=0", Some(&admin))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_signature_and_ack() {
    let ctx = TestContext::new();
    let product = ctx.product("Tea", "8.00", 5).await;
    let order = ctx.place_order("alice", &[(product, 1)]).await;
    let (payload, header) = sign(&session_completed("evt_http", order.id));

    let forged = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header(SIGNATURE_HEADER, "t=1,v1=00")
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, body) = send(&ctx, forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_signature");
    assert_eq!(ctx.stock(product).await, 5);

    let signed = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header(SIGNATURE_HEADER, header)
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = send(&ctx, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "applied");
    assert_eq!(ctx.stock(product).await, 4);
}

#[tokio::test]
async fn test_webhook_store_outage_returns_503() {
    let ctx = TestContext::new();
    let product = ctx.product("Tea", "8.00", 5).await;
    let order = ctx.place_order("alice", &[(product, 1)]).await;
    let (payload, header) = sign(&session_completed("evt_down", order.id));
    ctx.store.set_unavailable(true);

    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header(SIGNATURE_HEADER, header)
        .body(Body::from(payload))
        .unwrap();
    let (status, _) = send(&ctx, request).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_malformed_webhook_acknowledged_once() {
    let ctx = TestContext::new();
    let (payload, header) = sign(&json!({
        "id": "evt_bad",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_bad" } }
    }));
    let deliver = || {
        Request::builder()
            .method("POST")
            .uri("/api/payments/webhook")
            .header(SIGNATURE_HEADER, header.as_str())
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let (status, first) = send(&ctx, deliver()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "malformed");

    let (status, second) = send(&ctx, deliver()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["duplicate"], true);
    assert_eq!(ctx.store.payment_event_count().await, 1);
}

#[tokio::test]
async fn test_checkout_session_flow() {
    let ctx = TestContext::new();
    let product = ctx.product("Notebook", "19.99", 4).await;
    let order = ctx.place_order("alice", &[(product, 1)]).await;
    let alice = token("alice", false);

    let (status, handle) = send(
        &ctx,
        json_request(
            "POST",
            "/api/payments/create-checkout-session",
            &alice,
            &json!({ "orderId": order.id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = handle["sessionId"].as_str().unwrap().to_string();
    assert!(handle["clientSecret"].as_str().unwrap().ends_with("_secret"));

    let (status, unpaid) = send(
        &ctx,
        get(
            &format!("/api/payments/session-status?session_id={session_id}"),
            Some(&alice),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unpaid["paymentStatus"], "unpaid");
    assert_eq!(unpaid["orderPaymentStatus"], "PENDING");

    ctx.provider.complete(&session_id);
    let (status, paid) = send(
        &ctx,
        get(
            &format!("/api/payments/session-status?session_id={session_id}"),
            Some(&alice),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["orderPaymentStatus"], "PAID");
    assert_eq!(ctx.stock(product).await, 3);

    let (status, _) = send(
        &ctx,
        json_request(
            "POST",
            "/api/payments/create-checkout-session",
            &alice,
            &json!({ "orderId": order.id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_session_is_bad_gateway() {
    let ctx = TestContext::new();
    let alice = token("alice", false);

    let (status, body) = send(
        &ctx,
        get("/api/payments/session-status?session_id=cs_missing", Some(&alice)),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "external_service_error");
}
