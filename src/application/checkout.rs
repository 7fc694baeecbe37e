//! Inbound request shapes accepted by the engine.

use crate::domain::lifecycle::Actor;
use crate::domain::money::Price;
use crate::domain::order::{ContactInfo, Order, PlanType};
use crate::domain::package::{BillingCycle, Package};
use crate::domain::ports::EntityKind;
use crate::domain::submission::SubmissionFile;
use crate::domain::subscription::{BillingInterval, PlanName, Subscription};
use serde::Deserialize;

/// Authenticated caller, as established by the session layer in front of us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub actor: Actor,
}

impl Requester {
    pub fn client(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            actor: Actor::Client,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            actor: Actor::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.actor == Actor::Admin
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCheckout {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub plan_id: String,
    /// Quoted price; ignored when the package carries a catalog price.
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub file_urls: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl OrderCheckout {
    pub fn contact(&self) -> ContactInfo {
        ContactInfo {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCheckout {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub plan_id: String,
    pub plan_name: PlanName,
    /// Falls back to the package billing cycle.
    #[serde(default)]
    pub interval: Option<BillingInterval>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub file_urls: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl SubscriptionCheckout {
    pub fn contact(&self) -> ContactInfo {
        ContactInfo {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
        }
    }

    pub fn resolve_interval(&self, package: &Package) -> Option<BillingInterval> {
        self.interval.or(match package.billing_cycle {
            BillingCycle::Monthly => Some(BillingInterval::Monthly),
            BillingCycle::Hourly => Some(BillingInterval::Hourly),
            BillingCycle::OneTime => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePayment {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub entity_id: String,
    /// Amount the client believes it is paying, in the store currency.
    #[serde(default)]
    pub amount: Option<Price>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePayment {
    pub provider_transaction_id: String,
    #[serde(default)]
    pub payer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPayment {
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPackage {
    pub title: String,
    #[serde(default)]
    pub price: Option<Price>,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub popular: bool,
    pub plan_type: PlanType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionUpload {
    pub order_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub files: Vec<SubmissionFile>,
}

/// Records loaded by `orderdesk seed`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub packages: Vec<Package>,
    pub orders: Vec<Order>,
    pub subscriptions: Vec<Subscription>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::package::fixtures::package;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_initiate_body_uses_type_tag() {
        let body: InitiatePayment = serde_json::from_value(json!({
            "type": "subscription",
            "entityId": "s1",
            "amount": 3000,
        }))
        .unwrap();
        assert_eq!(body.kind, EntityKind::Subscription);
        assert_eq!(body.amount, Some(Price::new(dec!(3000)).unwrap()));
    }

    #[test]
    fn test_negative_quote_is_rejected() {
        let result: Result<OrderCheckout, _> = serde_json::from_value(json!({
            "name": "Ada",
            "email": "ada@example.com",
            "phone": "1",
            "planId": "p",
            "price": -5,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_interval_falls_back_to_package_cycle() {
        let checkout: SubscriptionCheckout = serde_json::from_value(json!({
            "name": "Ada",
            "email": "ada@example.com",
            "phone": "1",
            "planId": "care",
            "planName": "Basic",
        }))
        .unwrap();
        let care = package("care", PlanType::Maintenance, Some(dec!(3000)));
        assert_eq!(checkout.resolve_interval(&care), Some(BillingInterval::Monthly));

        let build = package("build", PlanType::Development, None);
        assert_eq!(checkout.resolve_interval(&build), None);
    }
}
