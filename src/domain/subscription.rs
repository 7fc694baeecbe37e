use super::money::Price;
use super::order::{ContactInfo, PaymentStatus};
use super::provider::{ProviderBinding, RecurringLink};
use crate::error::CommerceError;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed catalog of maintenance tiers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PlanName {
    Basic,
    Growth,
    Premium,
    Test,
}

impl PlanName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanName::Basic => "Basic",
            PlanName::Growth => "Growth",
            PlanName::Premium => "Premium",
            PlanName::Test => "Test",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
    Hourly,
}

impl BillingInterval {
    /// Start of the period following the one beginning at `from`.
    ///
    /// Month arithmetic is calendar based and clamps to the last valid day
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CommerceError> {
        let next = match self {
            BillingInterval::Monthly => from.checked_add_months(Months::new(1)),
            BillingInterval::Yearly => from.checked_add_months(Months::new(12)),
            BillingInterval::Hourly => from.checked_add_signed(Duration::hours(1)),
        };
        next.ok_or_else(|| CommerceError::validation("Billing date out of range"))
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
            BillingInterval::Hourly => "hourly",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
    Expired,
    PaymentFailed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::PaymentFailed => "payment_failed",
        };
        f.write_str(name)
    }
}

/// A recurring maintenance subscription.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub contact: ContactInfo,
    pub plan_id: String,
    pub plan_title: String,
    pub plan_name: PlanName,
    pub price: Price,
    pub interval: BillingInterval,
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub file_urls: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<ProviderBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring: Option<RecurringLink>,
    /// Provider id of the most recent payment reconciled for a billing period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_payment_ref: Option<String>,
    /// Provider ids of the most recent captured payments, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paid_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How many captured payment ids a subscription remembers for deduplication.
pub const PAID_REF_HISTORY: usize = 24;

impl Subscription {
    pub fn validate(&self) -> Result<(), CommerceError> {
        self.contact.validate()?;
        if self.status == SubscriptionStatus::Active && self.payment.is_none() {
            return Err(CommerceError::validation(
                "Active subscriptions must carry a payment reference",
            ));
        }
        Ok(())
    }

    /// Only cancelled or expired subscriptions may be removed.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn has_paid(&self, reference: &str) -> bool {
        self.paid_refs.iter().any(|r| r == reference)
    }

    /// Records a captured payment, evicting the oldest id past the history bound.
    pub fn record_payment(&mut self, reference: &str) {
        self.last_payment_ref = Some(reference.to_string());
        if !self.has_paid(reference) {
            self.paid_refs.push(reference.to_string());
        }
        if self.paid_refs.len() > PAID_REF_HISTORY {
            let excess = self.paid_refs.len() - PAID_REF_HISTORY;
            self.paid_refs.drain(..excess);
        }
    }
}
