use super::provider::ProviderKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized outcome reported by a provider.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// How far a successful payment has progressed on the provider side.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStage {
    /// Funds reserved, capture still outstanding (two-phase providers).
    Authorized,
    /// Funds transferred.
    Captured,
}

/// Result of a synchronous confirmation or a decoded payment webhook.
///
/// `transaction_ref` is the stable provider id used both to locate the owning
/// entity and to deduplicate repeated deliveries.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult {
    pub provider: ProviderKind,
    pub transaction_ref: String,
    pub outcome: Outcome,
    pub stage: PaymentStage,
    /// Set on captures whose authorization is reported as a separate event.
    /// Reconciliation then requires the authorization to be applied first.
    pub two_phase: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_amount: Option<Decimal>,
}

impl ConfirmationResult {
    pub fn captured(provider: ProviderKind, transaction_ref: impl Into<String>) -> Self {
        Self {
            provider,
            transaction_ref: transaction_ref.into(),
            outcome: Outcome::Succeeded,
            stage: PaymentStage::Captured,
            two_phase: false,
            raw_amount: None,
        }
    }

    pub fn failed(provider: ProviderKind, transaction_ref: impl Into<String>) -> Self {
        Self {
            provider,
            transaction_ref: transaction_ref.into(),
            outcome: Outcome::Failed,
            stage: PaymentStage::Captured,
            two_phase: false,
            raw_amount: None,
        }
    }

    pub fn authorized(provider: ProviderKind, transaction_ref: impl Into<String>) -> Self {
        Self {
            provider,
            transaction_ref: transaction_ref.into(),
            outcome: Outcome::Succeeded,
            stage: PaymentStage::Authorized,
            two_phase: true,
            raw_amount: None,
        }
    }

    pub fn two_phase(mut self) -> Self {
        self.two_phase = true;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.raw_amount = Some(amount);
        self
    }
}

/// Everything a webhook payload can decode into once its signature checks out.
#[derive(Debug, PartialEq, Clone)]
pub enum WebhookEvent {
    /// Outcome of a checkout charge, located through the entity's binding.
    Payment(ConfirmationResult),
    /// A renewal charge for a recurring subscription succeeded.
    RecurringPaid {
        provider: ProviderKind,
        subscription_code: String,
        invoice_ref: String,
        raw_amount: Option<Decimal>,
    },
    /// A renewal charge for a recurring subscription failed.
    RecurringFailed {
        provider: ProviderKind,
        subscription_code: String,
        invoice_ref: Option<String>,
    },
    /// The provider created the recurring plan for a customer.
    RecurringLinked {
        provider: ProviderKind,
        customer_email: String,
        subscription_code: String,
        email_token: Option<String>,
    },
    /// Authentic but irrelevant event type.
    Ignored { provider: ProviderKind, event_type: String },
}

/// Event kinds the reconciliation engine understands, after the owning
/// entity has been located.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PaymentAuthorized,
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionActivated,
    SubscriptionRenewed,
    SubscriptionPaymentFailed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::PaymentAuthorized => "payment_authorized",
            EventKind::PaymentSucceeded => "payment_succeeded",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::SubscriptionActivated => "subscription_activated",
            EventKind::SubscriptionRenewed => "subscription_renewed",
            EventKind::SubscriptionPaymentFailed => "subscription_payment_failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub provider: ProviderKind,
    pub kind: EventKind,
    pub transaction_ref: String,
    #[serde(default)]
    pub two_phase: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_amount: Option<Decimal>,
}

impl NormalizedEvent {
    pub fn new(provider: ProviderKind, kind: EventKind, transaction_ref: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            transaction_ref: transaction_ref.into(),
            two_phase: false,
            raw_amount: None,
        }
    }

    /// Maps a checkout confirmation onto an order event.
    pub fn for_order(result: &ConfirmationResult) -> Self {
        let kind = match (result.outcome, result.stage) {
            (Outcome::Failed, _) => EventKind::PaymentFailed,
            (Outcome::Succeeded, PaymentStage::Authorized) => EventKind::PaymentAuthorized,
            (Outcome::Succeeded, PaymentStage::Captured) => EventKind::PaymentSucceeded,
        };
        Self {
            provider: result.provider,
            kind,
            transaction_ref: result.transaction_ref.clone(),
            two_phase: result.two_phase,
            raw_amount: result.raw_amount,
        }
    }

    /// Maps a checkout confirmation onto a subscription event.
    ///
    /// Subscriptions activate on the first successful charge regardless of
    /// stage; the reserved-funds distinction only matters for orders.
    pub fn for_subscription(result: &ConfirmationResult) -> Self {
        let kind = match result.outcome {
            Outcome::Succeeded => EventKind::SubscriptionActivated,
            Outcome::Failed => EventKind::SubscriptionPaymentFailed,
        };
        Self {
            provider: result.provider,
            kind,
            transaction_ref: result.transaction_ref.clone(),
            two_phase: result.two_phase,
            raw_amount: result.raw_amount,
        }
    }
}
