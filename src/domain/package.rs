use super::money::Price;
use super::order::PlanType;
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum BillingCycle {
    OneTime,
    Monthly,
    Hourly,
}

/// A catalog plan. Orders and subscriptions copy the values they need at
/// creation time, so editing a package never changes existing records.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub price: Option<Price>,
    pub billing_cycle: BillingCycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub popular: bool,
    pub plan_type: PlanType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Package {
    pub fn validate(&self) -> Result<(), CommerceError> {
        if self.title.trim().is_empty() {
            return Err(CommerceError::validation("Package title is required"));
        }
        if self.plan_type == PlanType::Maintenance && self.price.is_none() {
            return Err(CommerceError::validation(
                "Maintenance packages require a price",
            ));
        }
        Ok(())
    }

    /// Price an order for this package is created with.
    ///
    /// A catalog price always wins; packages without one (quoted development
    /// work) take the price the client was quoted.
    pub fn quote(&self, requested: Option<Price>) -> Result<Price, CommerceError> {
        match (self.price, requested) {
            (Some(price), _) => Ok(price),
            (None, Some(price)) => Ok(price),
            (None, None) => Err(CommerceError::validation(format!(
                "Package {} has no catalog price; a quoted price is required",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn package(id: &str, plan_type: PlanType, price: Option<rust_decimal::Decimal>) -> Package {
        let now = Utc::now();
        Package {
            id: id.to_string(),
            title: format!("Plan {}", id),
            price: price.map(|p| Price::new(p).unwrap()),
            billing_cycle: match plan_type {
                PlanType::Development => BillingCycle::OneTime,
                PlanType::Maintenance => BillingCycle::Monthly,
            },
            description: None,
            features: vec!["Hosting".to_string()],
            popular: false,
            plan_type,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn priced(id: &str) -> Package {
        package(id, PlanType::Development, Some(dec!(25000)))
    }
}
