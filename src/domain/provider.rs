use crate::error::CommerceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The payment providers a checkout can be routed through.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stripe,
    Paypal,
    Paystack,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Stripe,
        ProviderKind::Paypal,
        ProviderKind::Paystack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::Paypal => "paypal",
            ProviderKind::Paystack => "paystack",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CommerceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(ProviderKind::Stripe),
            "paypal" => Ok(ProviderKind::Paypal),
            "paystack" => Ok(ProviderKind::Paystack),
            other => Err(CommerceError::validation(format!(
                "Unknown payment provider: {}",
                other
            ))),
        }
    }
}

/// The provider-side handle an entity is bound to.
///
/// An entity carries at most one binding, so it can never be attached to
/// two providers at once. `reference` is the provider-native transaction id
/// (PayPal order id, Paystack reference, Stripe Checkout Session id).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBinding {
    pub provider: ProviderKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
}

impl ProviderBinding {
    pub fn new(provider: ProviderKind, reference: impl Into<String>) -> Self {
        Self {
            provider,
            reference: reference.into(),
            access_code: None,
        }
    }

    pub fn with_access_code(mut self, access_code: impl Into<String>) -> Self {
        self.access_code = Some(access_code.into());
        self
    }

    pub fn matches(&self, provider: ProviderKind, reference: &str) -> bool {
        self.provider == provider && self.reference == reference
    }

    /// Index key shared by every store implementation.
    pub fn index_key(&self) -> String {
        index_key(self.provider, &self.reference)
    }
}

pub fn index_key(provider: ProviderKind, reference: &str) -> String {
    format!("{}:{}", provider, reference)
}

/// Recurring-billing handle on the provider side (Paystack subscription code
/// plus the email token needed to disable it).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecurringLink {
    pub provider: ProviderKind,
    pub subscription_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_token: Option<String>,
}
