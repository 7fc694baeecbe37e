use super::AppState;
use super::extract::JsonBody;
use crate::application::checkout::{
    CapturePayment, InitiatePayment, NewPackage, OrderCheckout, Requester, SubmissionUpload,
    SubscriptionCheckout, VerifyPayment,
};
use crate::application::engine::Settlement;
use crate::domain::patch::{OrderPatch, PackagePatch, SubscriptionPatch};
use crate::domain::ports::{Callback, EntityKind, WebhookHeaders};
use crate::domain::provider::ProviderKind;
use crate::error::{CommerceError, Result};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn deleted() -> Json<Value> {
    Json(json!({ "success": true }))
}

// ---- orders ----

pub async fn list_orders(State(state): State<AppState>, requester: Requester) -> Result<Response> {
    Ok(Json(state.engine.list_orders(&requester).await?).into_response())
}

pub async fn create_order(
    State(state): State<AppState>,
    requester: Requester,
    JsonBody(checkout): JsonBody<OrderCheckout>,
) -> Result<Response> {
    let order = state.engine.place_order(&requester, checkout).await?;
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

pub async fn get_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Response> {
    Ok(Json(state.engine.get_order(&requester, &id).await?).into_response())
}

pub async fn update_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response> {
    let patch = OrderPatch::from_json(body)?;
    Ok(Json(state.engine.update_order(&requester, &id, patch).await?).into_response())
}

pub async fn delete_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.engine.delete_order(&requester, &id).await?;
    Ok(deleted())
}

// ---- subscriptions ----

pub async fn list_subscriptions(
    State(state): State<AppState>,
    requester: Requester,
) -> Result<Response> {
    Ok(Json(state.engine.list_subscriptions(&requester).await?).into_response())
}

pub async fn create_subscription(
    State(state): State<AppState>,
    requester: Requester,
    JsonBody(checkout): JsonBody<SubscriptionCheckout>,
) -> Result<Response> {
    let subscription = state.engine.place_subscription(&requester, checkout).await?;
    Ok((StatusCode::CREATED, Json(subscription)).into_response())
}

pub async fn get_subscription(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Response> {
    Ok(Json(state.engine.get_subscription(&requester, &id).await?).into_response())
}

pub async fn update_subscription(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response> {
    let patch = SubscriptionPatch::from_json(body)?;
    Ok(Json(state.engine.update_subscription(&requester, &id, patch).await?).into_response())
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.engine.delete_subscription(&requester, &id).await?;
    Ok(deleted())
}

// ---- catalog ----

pub async fn list_packages(State(state): State<AppState>) -> Result<Response> {
    Ok(Json(state.engine.list_packages().await?).into_response())
}

pub async fn get_package(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    Ok(Json(state.engine.get_package(&id).await?).into_response())
}

pub async fn create_package(
    State(state): State<AppState>,
    requester: Requester,
    JsonBody(new): JsonBody<NewPackage>,
) -> Result<Response> {
    let package = state.engine.create_package(&requester, new).await?;
    Ok((StatusCode::CREATED, Json(package)).into_response())
}

pub async fn update_package(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response> {
    let patch = PackagePatch::from_json(body)?;
    Ok(Json(state.engine.update_package(&requester, &id, patch).await?).into_response())
}

pub async fn delete_package(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.engine.delete_package(&requester, &id).await?;
    Ok(deleted())
}

// ---- submissions ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionQuery {
    order_id: String,
}

pub async fn create_submission(
    State(state): State<AppState>,
    requester: Requester,
    JsonBody(upload): JsonBody<SubmissionUpload>,
) -> Result<Response> {
    let submission = state.engine.append_submission(&requester, upload).await?;
    Ok((StatusCode::CREATED, Json(submission)).into_response())
}

pub async fn get_submission(
    State(state): State<AppState>,
    requester: Requester,
    Query(query): Query<SubmissionQuery>,
) -> Result<Response> {
    let response = match state.engine.get_submission(&requester, &query.order_id).await? {
        Some(submission) => Json(submission).into_response(),
        None => Json(json!({ "orderId": query.order_id, "files": [] })).into_response(),
    };
    Ok(response)
}

// ---- payments ----

fn settlement_body(settlement: &Settlement) -> Result<Json<Value>> {
    let mut body = serde_json::to_value(settlement)?;
    if let Value::Object(map) = &mut body {
        map.insert("success".to_string(), Value::Bool(settlement.is_paid()));
    }
    Ok(Json(body))
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    requester: Requester,
    Path(provider): Path<String>,
    JsonBody(body): JsonBody<InitiatePayment>,
) -> Result<Response> {
    let provider: ProviderKind = provider.parse()?;
    let session = state.engine.initiate_payment(&requester, provider, body).await?;
    Ok(Json(session).into_response())
}

pub async fn capture_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    JsonBody(body): JsonBody<CapturePayment>,
) -> Result<Json<Value>> {
    let provider: ProviderKind = provider.parse()?;
    if body.provider_transaction_id.trim().is_empty() {
        return Err(CommerceError::validation("Missing providerTransactionId"));
    }
    let settlement = state
        .engine
        .confirm(
            provider,
            Callback::Capture {
                transaction_ref: body.provider_transaction_id,
                payer_id: body.payer_id,
            },
        )
        .await?;
    settlement_body(&settlement)
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    JsonBody(body): JsonBody<VerifyPayment>,
) -> Result<Json<Value>> {
    let provider: ProviderKind = provider.parse()?;
    if body.reference.trim().is_empty() {
        return Err(CommerceError::validation("Missing reference"));
    }
    let settlement = state
        .engine
        .confirm(
            provider,
            Callback::Verify {
                reference: body.reference,
            },
        )
        .await?;
    settlement_body(&settlement)
}

#[derive(Debug, Deserialize)]
pub struct StripeSuccessQuery {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeCancelQuery {
    order_id: Option<String>,
}

fn dashboard_url(base: &str, kind: EntityKind, id: &str) -> String {
    let section = match kind {
        EntityKind::Order => "orders",
        EntityKind::Subscription => "subscriptions",
    };
    format!("{}/clientdashboard/{}/{}", base.trim_end_matches('/'), section, id)
}

/// Checkout redirect target: verifies the session server-side, then sends
/// the buyer back to the dashboard.
pub async fn stripe_success(
    State(state): State<AppState>,
    Query(query): Query<StripeSuccessQuery>,
) -> Result<Redirect> {
    let settlement = state
        .engine
        .confirm(
            ProviderKind::Stripe,
            Callback::Verify {
                reference: query.session_id,
            },
        )
        .await?;
    let target = dashboard_url(&state.app_base_url, settlement.entity.kind, &settlement.entity.id);
    Ok(Redirect::to(&format!("{}?success={}", target, settlement.is_paid())))
}

/// The buyer abandoned checkout; nothing changes locally.
pub async fn stripe_cancel(
    State(state): State<AppState>,
    Query(query): Query<StripeCancelQuery>,
) -> Result<Redirect> {
    let order_id = query
        .order_id
        .ok_or_else(|| CommerceError::validation("Missing orderId"))?;
    tracing::info!(order_id = %order_id, "Stripe checkout cancelled by buyer");
    let target = dashboard_url(&state.app_base_url, EntityKind::Order, &order_id);
    Ok(Redirect::to(&format!("{}?canceled=true", target)))
}

// ---- webhooks ----

pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let provider: ProviderKind = provider.parse()?;
    let headers: WebhookHeaders = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let ack = state.engine.handle_webhook(provider, &body, &headers).await?;
    Ok((StatusCode::OK, Json(ack)).into_response())
}
