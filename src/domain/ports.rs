use super::event::{ConfirmationResult, WebhookEvent};
use super::money::{Currency, Price};
use super::order::Order;
use super::package::Package;
use super::provider::{ProviderBinding, ProviderKind, RecurringLink};
use super::submission::Submission;
use super::subscription::{PlanName, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn store(&self, order: Order) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Order>>;
    /// Locates the order bound to a provider transaction id.
    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Order>>;
    /// Orders newest first, optionally restricted to one requester.
    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Order>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn store(&self, subscription: Subscription) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Subscription>>;
    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Subscription>>;
    async fn find_by_recurring_code(
        &self,
        provider: ProviderKind,
        subscription_code: &str,
    ) -> Result<Option<Subscription>>;
    async fn find_by_email(&self, email: &str) -> Result<Vec<Subscription>>;
    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Subscription>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn store(&self, submission: Submission) -> Result<()>;
    async fn get(&self, order_id: &str) -> Result<Option<Submission>>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn store(&self, package: Package) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Package>>;
    async fn list(&self) -> Result<Vec<Package>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub type OrderStoreBox = Box<dyn OrderStore>;
pub type SubscriptionStoreBox = Box<dyn SubscriptionStore>;
pub type SubmissionStoreBox = Box<dyn SubmissionStore>;
pub type PackageStoreBox = Box<dyn PackageStore>;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Order,
    Subscription,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Order => "order",
            EntityKind::Subscription => "subscription",
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

/// `order:<id>` / `subscription:<id>`.
impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PayerInfo {
    pub email: String,
    pub name: String,
}

/// Everything an adapter needs to open a provider-side payment.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub entity: EntityRef,
    /// Amount already converted into the provider's settlement currency.
    pub amount: Price,
    pub currency: Currency,
    pub payer: PayerInfo,
    pub description: String,
    pub plan_name: Option<PlanName>,
}

/// Provider-side session opened by `initiate`.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSession {
    pub binding: ProviderBinding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Provider response passed back to the client untouched.
    pub raw: serde_json::Value,
}

/// Client- or redirect-driven confirmation trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    /// Finalize a previously approved payment (PayPal order, Stripe intent).
    Capture {
        transaction_ref: String,
        payer_id: Option<String>,
    },
    /// Ask the provider for the current state of a transaction.
    Verify { reference: String },
}

impl Callback {
    pub fn reference(&self) -> &str {
        match self {
            Callback::Capture { transaction_ref, .. } => transaction_ref,
            Callback::Verify { reference } => reference,
        }
    }
}

/// Lower-cased header name to value.
pub type WebhookHeaders = BTreeMap<String, String>;

/// Uniform contract implemented by every payment provider adapter.
///
/// Adapters hold no persistent state. `initiate` never changes entity status;
/// confirmation results are applied by the reconciliation engine.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Currency the provider charges in.
    fn settlement_currency(&self) -> Currency;

    async fn initiate(&self, request: &PaymentRequest) -> Result<ProviderSession>;

    async fn confirm(&self, callback: &Callback) -> Result<ConfirmationResult>;

    /// Authenticates and decodes a webhook delivery.
    ///
    /// Must fail with `SignatureError` when the payload is not authentic.
    async fn decode_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent>;

    /// Stops recurring billing on the provider side.
    async fn disable_recurring(&self, link: &RecurringLink) -> Result<()>;
}

pub type ProviderHandle = Arc<dyn PaymentProvider>;

#[async_trait]
pub trait ExchangeRates: Send + Sync {
    /// Units of `to` per one unit of `from`.
    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}
