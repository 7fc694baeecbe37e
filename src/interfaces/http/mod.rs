//! JSON HTTP surface over [`CommerceEngine`].
//!
//! Identity comes from the `x-user-id` / `x-user-role` headers set by the
//! session layer. Webhook and provider redirect routes are unauthenticated;
//! they rely on signatures and server-side verification instead.

mod error;
pub mod extract;
mod handlers;

use crate::application::engine::CommerceEngine;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CommerceEngine>,
    /// Public base URL of the storefront, for browser redirects.
    pub app_base_url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/orders",
            get(handlers::list_orders).post(handlers::create_order),
        )
        .route(
            "/orders/{id}",
            get(handlers::get_order)
                .patch(handlers::update_order)
                .delete(handlers::delete_order),
        )
        .route(
            "/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/subscriptions/{id}",
            get(handlers::get_subscription)
                .patch(handlers::update_subscription)
                .delete(handlers::delete_subscription),
        )
        .route(
            "/packages",
            get(handlers::list_packages).post(handlers::create_package),
        )
        .route(
            "/packages/{id}",
            get(handlers::get_package)
                .patch(handlers::update_package)
                .delete(handlers::delete_package),
        )
        .route(
            "/submissions",
            get(handlers::get_submission).post(handlers::create_submission),
        )
        .route("/payments/stripe/success", get(handlers::stripe_success))
        .route("/payments/stripe/cancel", get(handlers::stripe_cancel))
        .route(
            "/payments/{provider}/initiate",
            post(handlers::initiate_payment),
        )
        .route("/payments/{provider}/capture", post(handlers::capture_payment))
        .route("/payments/{provider}/verify", post(handlers::verify_payment))
        .route("/webhooks/{provider}", post(handlers::webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
