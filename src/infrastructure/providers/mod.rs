//! Payment provider adapters.
//!
//! Each adapter speaks its provider's REST API through `reqwest` and maps the
//! answers onto the uniform [`PaymentProvider`](crate::domain::ports::PaymentProvider)
//! contract. API base URLs are configurable so tests can point the adapters
//! at a local stub server.

pub mod paypal;
pub mod paystack;
pub mod stripe;

use crate::domain::ports::WebhookHeaders;
use crate::domain::provider::ProviderKind;
use crate::error::{CommerceError, Result};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use subtle::ConstantTimeEq;

pub use paypal::{PaypalConfig, PaypalProvider};
pub use paystack::{PaystackConfig, PaystackProvider};
pub use stripe::{StripeConfig, StripeProvider};

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CommerceError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

/// Reads a JSON body, turning non-2xx answers into `ProviderError`.
pub(crate) async fn read_json(provider: ProviderKind, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let snippet: String = body.chars().take(300).collect();
        return Err(CommerceError::provider(format!(
            "{} answered {}: {}",
            provider, status, snippet
        )));
    }
    serde_json::from_str(&body).map_err(|e| {
        CommerceError::provider(format!("{} returned malformed JSON: {}", provider, e))
    })
}

pub(crate) fn str_at<'a>(provider: ProviderKind, value: &'a Value, pointer: &str) -> Result<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).ok_or_else(|| {
        CommerceError::provider(format!("{} response is missing {}", provider, pointer))
    })
}

pub(crate) fn header<'a>(headers: &'a WebhookHeaders, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| CommerceError::signature(format!("missing {} header", name)))
}

pub(crate) fn hmac_sha256(secret: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| CommerceError::ConfigError(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn hmac_sha512(secret: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret)
        .map_err(|e| CommerceError::ConfigError(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compares a hex signature against the expected MAC in constant time.
pub(crate) fn hex_signature_matches(expected: &[u8], provided_hex: &str) -> bool {
    match hex::decode(provided_hex.trim()) {
        Ok(provided) => provided.len() == expected.len() && bool::from(provided.ct_eq(expected)),
        Err(_) => false,
    }
}

/// Minor units as reported by the provider, back to a decimal amount.
pub(crate) fn minor_to_decimal(value: &Value) -> Option<rust_decimal::Decimal> {
    value.as_i64().map(|units| rust_decimal::Decimal::new(units, 2))
}
