use super::money::Price;
use super::provider::ProviderBinding;
use crate::error::CommerceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Development,
    Maintenance,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    /// Kept for stored documents; nothing transitions into or out of it.
    Approved,
    Inprogress,
    Completed,
    Accepted,
    Failed,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Inprogress => "inprogress",
            OrderStatus::Completed => "completed",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Payment state shared by orders and subscriptions.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Authorized,
    Captured,
    Voided,
    Refunded,
}

impl PaymentStatus {
    /// Funds are reserved or transferred; the record must not be deleted.
    pub fn holds_funds(&self) -> bool {
        matches!(self, PaymentStatus::Authorized | PaymentStatus::Captured)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Voided => "voided",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// Requester contact details captured at checkout.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ContactInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl ContactInfo {
    pub fn validate(&self) -> Result<(), CommerceError> {
        if self.name.trim().is_empty() {
            return Err(CommerceError::validation("Missing name"));
        }
        validate_email(&self.email)?;
        if self.phone.trim().is_empty() {
            return Err(CommerceError::validation("Missing phone"));
        }
        Ok(())
    }
}

pub fn validate_email(email: &str) -> Result<(), CommerceError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(CommerceError::validation("Missing email"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(CommerceError::validation(format!("Invalid email: {}", email))),
    }
}

/// A one-off website development or maintenance order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub contact: ContactInfo,
    pub plan_id: String,
    pub plan_title: String,
    pub plan_type: PlanType,
    pub price: Price,
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub file_urls: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<ProviderBinding>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Checks the invariants a stored order must always satisfy.
    pub fn validate(&self) -> Result<(), CommerceError> {
        self.contact.validate()?;
        if self.plan_type == PlanType::Maintenance && !self.features.is_empty() {
            return Err(CommerceError::validation(
                "Maintenance plans cannot have features",
            ));
        }
        if self.status == OrderStatus::Accepted && !self.payment_status.holds_funds() {
            return Err(CommerceError::validation(
                "Accepted orders must have an authorized or captured payment",
            ));
        }
        Ok(())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
