mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::*;
use orderdesk::domain::event::ConfirmationResult;
use orderdesk::domain::provider::ProviderKind;
use orderdesk::interfaces::http::extract::{USER_ID_HEADER, USER_ROLE_HEADER};
use orderdesk::interfaces::http::{self, AppState};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const APP: &str = "https://shop.example.com";

struct Api {
    router: Router,
    paystack: Arc<FakeProvider>,
}

async fn api() -> Api {
    let paystack = FakeProvider::new(ProviderKind::Paystack, "KES");
    let h = seeded(&[paystack.clone()]).await;
    Api {
        router: http::router(AppState {
            engine: h.engine,
            app_base_url: APP.to_string(),
        }),
        paystack,
    }
}

fn request(method: &str, uri: &str, user: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = user {
        builder = builder.header(USER_ID_HEADER, id).header(USER_ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn checkout_body() -> Value {
    json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone": "+254700000000",
        "planId": "dev",
        "description": "Five page site"
    })
}

async fn create_order(api: &Api, user: &str) -> Value {
    let (status, body) = send(
        &api.router,
        request("POST", "/orders", Some((user, "client")), Some(checkout_body())),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_health() {
    let api = api().await;
    let (status, body) = send(&api.router, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let api = api().await;
    let (status, body) = send(
        &api.router,
        request("POST", "/orders", None, Some(checkout_body())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_order_lifecycle_over_http() {
    let api = api().await;
    let order = create_order(&api, "user_1").await;
    let id = order["id"].as_str().unwrap();
    assert_eq!(order["status"], "pending");
    assert_eq!(order["paymentStatus"], "unpaid");

    let (status, foreign) = send(
        &api.router,
        request("GET", &format!("/orders/{}", id), Some(("user_2", "client")), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(foreign["error"].is_string());

    let (status, patched) = send(
        &api.router,
        request(
            "PATCH",
            &format!("/orders/{}", id),
            Some(("user_1", "client")),
            Some(json!({ "description": "Six pages", "paymentStatus": "captured", "price": 1 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["description"], "Six pages");
    assert_eq!(patched["paymentStatus"], "unpaid");
    assert_eq!(patched["price"], order["price"]);

    let (status, _) = send(
        &api.router,
        request("DELETE", &format!("/orders/{}", id), Some(("user_1", "client")), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = send(
        &api.router,
        request(
            "PATCH",
            &format!("/orders/{}", id),
            Some(("user_1", "client")),
            Some(json!({ "status": "cancelled" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, body) = send(
        &api.router,
        request("DELETE", &format!("/orders/{}", id), Some(("user_1", "client")), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(
        &api.router,
        request("GET", &format!("/orders/{}", id), Some(("user_1", "client")), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let api = api().await;
    let req = Request::builder()
        .method("POST")
        .uri("/orders")
        .header(USER_ID_HEADER, "user_1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&api.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid request body"));
}

#[tokio::test]
async fn test_only_admins_manage_packages() {
    let api = api().await;
    let package = json!({
        "title": "Landing Page",
        "price": 9000,
        "billingCycle": "one-time",
        "planType": "development"
    });
    let (status, _) = send(
        &api.router,
        request("POST", "/packages", Some(("user_1", "client")), Some(package.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = send(
        &api.router,
        request("POST", "/packages", Some(("admin_1", "admin")), Some(package)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "Landing Page");

    let (status, list) = send(&api.router, request("GET", "/packages", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_empty_submission_lookup() {
    let api = api().await;
    let order = create_order(&api, "user_1").await;
    let id = order["id"].as_str().unwrap();
    let (status, body) = send(
        &api.router,
        request(
            "GET",
            &format!("/submissions?orderId={}", id),
            Some(("user_1", "client")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "orderId": id, "files": [] }));
}

#[tokio::test]
async fn test_unknown_provider_and_unknown_reference() {
    let api = api().await;
    let (status, _) = send(
        &api.router,
        request(
            "POST",
            "/payments/venmo/capture",
            None,
            Some(json!({ "providerTransactionId": "x" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &api.router,
        request(
            "POST",
            "/payments/paystack/verify",
            None,
            Some(json!({ "reference": "nobody" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert_eq!(api.paystack.confirm_count(), 0);
}

#[tokio::test]
async fn test_initiate_then_verify_over_http() {
    let api = api().await;
    let order = create_order(&api, "user_1").await;
    let id = order["id"].as_str().unwrap();

    let (status, session) = send(
        &api.router,
        request(
            "POST",
            "/payments/paystack/initiate",
            Some(("user_1", "client")),
            Some(json!({ "type": "order", "entityId": id })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reference = session["binding"]["reference"].as_str().unwrap().to_string();
    assert!(session["redirectUrl"].as_str().unwrap().ends_with(&reference));

    api.paystack
        .script(ConfirmationResult::captured(ProviderKind::Paystack, reference.clone()));
    let (status, body) = send(
        &api.router,
        request(
            "POST",
            "/payments/paystack/verify",
            None,
            Some(json!({ "reference": reference })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], "applied");
    assert_eq!(body["status"], "inprogress");

    let (status, body) = send(
        &api.router,
        request(
            "POST",
            "/payments/paystack/verify",
            None,
            Some(json!({ "reference": reference })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "duplicate");
    assert_eq!(api.paystack.confirm_count(), 1);
}

#[tokio::test]
async fn test_webhook_signature_gate() {
    let api = api().await;
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/paystack")
        .header(SIGNATURE_HEADER, "forged")
        .body(Body::from(webhook_body("paystack_ref_1", "captured", false)))
        .unwrap();
    let (status, _) = send(&api.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed but unmatched: acknowledged so the provider stops retrying.
    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/paystack")
        .header(SIGNATURE_HEADER, VALID_SIGNATURE)
        .body(Body::from(webhook_body("paystack_ref_404", "captured", false)))
        .unwrap();
    let (status, body) = send(&api.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(body.get("settlement").is_none());
}

#[tokio::test]
async fn test_stripe_cancel_redirects_to_dashboard() {
    let api = api().await;
    let response = api
        .router
        .clone()
        .oneshot(request("GET", "/payments/stripe/cancel?orderId=o42", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("{}/clientdashboard/orders/o42?canceled=true", APP)
    );
}
