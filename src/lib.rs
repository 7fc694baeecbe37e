//! Checkout, payment reconciliation and fulfilment for a small services
//! storefront.
//!
//! Orders and subscriptions are paid through Stripe, PayPal or Paystack.
//! Provider confirmations (client callbacks, redirects, webhooks and offline
//! settlement exports) all pass through one reconciliation path, so repeated
//! or racing deliveries settle an entity exactly once.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;
