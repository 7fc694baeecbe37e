//! Allow-listed partial updates.
//!
//! Each patch type names the only fields a caller may change. Anything else
//! in the request body lands in `dropped` and is ignored, so newer clients
//! sending extra fields keep working while payment fields stay untouchable.

use super::money::Price;
use super::order::{Order, OrderStatus, PlanType};
use super::package::{BillingCycle, Package};
use super::subscription::{Subscription, SubscriptionStatus};
use crate::error::CommerceError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub links: Option<Vec<String>>,
    pub file_urls: Option<Vec<String>>,
    pub status: Option<OrderStatus>,
    #[serde(flatten)]
    pub dropped: BTreeMap<String, Value>,
}

impl OrderPatch {
    pub fn from_json(body: Value) -> Result<Self, CommerceError> {
        let patch: Self = serde_json::from_value(body)
            .map_err(|e| CommerceError::validation(format!("Invalid order update: {}", e)))?;
        log_dropped("order", &patch.dropped);
        Ok(patch)
    }

    pub fn has_content_changes(&self) -> bool {
        self.name.is_some()
            || self.email.is_some()
            || self.phone.is_some()
            || self.description.is_some()
            || self.links.is_some()
            || self.file_urls.is_some()
    }

    /// Writes the non-status fields onto `order`.
    pub fn apply(&self, order: &mut Order) {
        if let Some(name) = &self.name {
            order.contact.name = name.clone();
        }
        if let Some(email) = &self.email {
            order.contact.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            order.contact.phone = phone.clone();
        }
        if let Some(description) = &self.description {
            order.description = description.clone();
        }
        if let Some(links) = &self.links {
            order.links = links.clone();
        }
        if let Some(file_urls) = &self.file_urls {
            order.file_urls = file_urls.clone();
        }
    }
}

fn log_dropped(entity: &str, dropped: &BTreeMap<String, Value>) {
    if !dropped.is_empty() {
        let keys: Vec<&str> = dropped.keys().map(String::as_str).collect();
        tracing::debug!(entity, ?keys, "Dropping fields outside the update allow-list");
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub features: Option<Vec<String>>,
    pub file_urls: Option<Vec<String>>,
    pub links: Option<Vec<String>>,
    pub status: Option<SubscriptionStatus>,
    #[serde(flatten)]
    pub dropped: BTreeMap<String, Value>,
}

impl SubscriptionPatch {
    pub fn from_json(body: Value) -> Result<Self, CommerceError> {
        let patch: Self = serde_json::from_value(body).map_err(|e| {
            CommerceError::validation(format!("Invalid subscription update: {}", e))
        })?;
        log_dropped("subscription", &patch.dropped);
        Ok(patch)
    }

    pub fn has_content_changes(&self) -> bool {
        self.name.is_some()
            || self.email.is_some()
            || self.phone.is_some()
            || self.description.is_some()
            || self.features.is_some()
            || self.file_urls.is_some()
            || self.links.is_some()
    }

    pub fn apply(&self, subscription: &mut Subscription) {
        if let Some(name) = &self.name {
            subscription.contact.name = name.clone();
        }
        if let Some(email) = &self.email {
            subscription.contact.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            subscription.contact.phone = phone.clone();
        }
        if let Some(description) = &self.description {
            subscription.description = description.clone();
        }
        if let Some(features) = &self.features {
            subscription.features = features.clone();
        }
        if let Some(file_urls) = &self.file_urls {
            subscription.file_urls = file_urls.clone();
        }
        if let Some(links) = &self.links {
            subscription.links = links.clone();
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePatch {
    pub title: Option<String>,
    pub price: Option<Price>,
    pub billing_cycle: Option<BillingCycle>,
    pub description: Option<String>,
    pub features: Option<Vec<String>>,
    pub popular: Option<bool>,
    pub plan_type: Option<PlanType>,
    #[serde(flatten)]
    pub dropped: BTreeMap<String, Value>,
}

impl PackagePatch {
    pub fn from_json(body: Value) -> Result<Self, CommerceError> {
        let patch: Self = serde_json::from_value(body)
            .map_err(|e| CommerceError::validation(format!("Invalid package update: {}", e)))?;
        log_dropped("package", &patch.dropped);
        Ok(patch)
    }

    pub fn apply(&self, package: &mut Package) {
        if let Some(title) = &self.title {
            package.title = title.clone();
        }
        if let Some(price) = self.price {
            package.price = Some(price);
        }
        if let Some(cycle) = self.billing_cycle {
            package.billing_cycle = cycle;
        }
        if let Some(description) = &self.description {
            package.description = Some(description.clone());
        }
        if let Some(features) = &self.features {
            package.features = features.clone();
        }
        if let Some(popular) = self.popular {
            package.popular = popular;
        }
        if let Some(plan_type) = self.plan_type {
            package.plan_type = plan_type;
        }
    }
}
