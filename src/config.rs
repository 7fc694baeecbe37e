//! Environment configuration.
//!
//! `.env` is loaded first (if present), then variables are read from the
//! process environment. A provider is only configured when all of its
//! credentials are set.

use crate::domain::money::Currency;
use crate::domain::subscription::PlanName;
use crate::error::{CommerceError, Result};
use crate::infrastructure::exchange::DEFAULT_RATE_URL;
use crate::infrastructure::notifier::{DEFAULT_SMTP_PORT, SmtpConfig};
use crate::infrastructure::providers::{PaypalConfig, PaystackConfig, StripeConfig, paypal, paystack, stripe};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_STORE_CURRENCY: &str = "KES";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub app_base_url: String,
    pub notify_email: Option<String>,
    /// Set when notifications should be mailed rather than logged.
    pub smtp: Option<SmtpConfig>,
    pub store_currency: Currency,
    pub exchange_rate_url: String,
    pub provider_timeout: Duration,
    pub stripe: Option<StripeConfig>,
    pub paypal: Option<PaypalConfig>,
    pub paystack: Option<PaystackConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(CommerceError::ConfigError(format!("Failed to load .env: {}", e)));
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr = var("ORDERDESK_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| CommerceError::ConfigError(format!("ORDERDESK_ADDR: {}", e)))?;
        let app_base_url = var("APP_BASE_URL").unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string());
        let store_currency = currency(
            "STORE_CURRENCY",
            &var("STORE_CURRENCY").unwrap_or_else(|| DEFAULT_STORE_CURRENCY.to_string()),
        )?;
        let provider_timeout = Duration::from_secs(match var("PROVIDER_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                CommerceError::ConfigError(format!("PROVIDER_TIMEOUT_SECS: {}", e))
            })?,
            None => DEFAULT_PROVIDER_TIMEOUT_SECS,
        });

        let stripe = match (var("STRIPE_SECRET_KEY"), var("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig {
                secret_key,
                webhook_secret,
                currency: currency(
                    "STRIPE_CURRENCY",
                    &var("STRIPE_CURRENCY").unwrap_or_else(|| "usd".to_string()),
                )?,
                manual_capture: flag("STRIPE_MANUAL_CAPTURE", var("STRIPE_MANUAL_CAPTURE"))?,
                api_base: var("STRIPE_API_BASE").unwrap_or_else(|| stripe::DEFAULT_API_BASE.to_string()),
                app_base_url: app_base_url.clone(),
                timeout: provider_timeout,
            }),
            _ => None,
        };

        let paypal = match (
            var("PAYPAL_CLIENT_ID"),
            var("PAYPAL_CLIENT_SECRET"),
            var("PAYPAL_WEBHOOK_ID"),
        ) {
            (Some(client_id), Some(client_secret), Some(webhook_id)) => {
                let live = flag("PAYPAL_LIVE", var("PAYPAL_LIVE"))?;
                let default_base = if live {
                    paypal::LIVE_API_BASE
                } else {
                    paypal::SANDBOX_API_BASE
                };
                Some(PaypalConfig {
                    client_id,
                    client_secret,
                    webhook_id,
                    api_base: var("PAYPAL_API_BASE").unwrap_or_else(|| default_base.to_string()),
                    app_base_url: app_base_url.clone(),
                    timeout: provider_timeout,
                })
            }
            _ => None,
        };

        let paystack = match var("PAYSTACK_SECRET_KEY") {
            Some(secret_key) => {
                let mut plan_codes = HashMap::new();
                for (plan, key) in [
                    (PlanName::Basic, "PAYSTACK_PLAN_BASIC"),
                    (PlanName::Growth, "PAYSTACK_PLAN_GROWTH"),
                    (PlanName::Premium, "PAYSTACK_PLAN_PREMIUM"),
                    (PlanName::Test, "PAYSTACK_PLAN_TEST"),
                ] {
                    if let Some(code) = var(key) {
                        plan_codes.insert(plan, code);
                    }
                }
                Some(PaystackConfig {
                    secret_key,
                    plan_codes,
                    currency: store_currency.clone(),
                    api_base: var("PAYSTACK_API_BASE")
                        .unwrap_or_else(|| paystack::DEFAULT_API_BASE.to_string()),
                    app_base_url: app_base_url.clone(),
                    timeout: provider_timeout,
                })
            }
            None => None,
        };

        let notify_email = var("NOTIFY_EMAIL");
        let smtp = match (var("SMTP_HOST"), var("SMTP_FROM"), notify_email.clone()) {
            (Some(host), Some(from), Some(to)) => Some(SmtpConfig {
                host,
                port: match var("SMTP_PORT") {
                    Some(raw) => raw
                        .parse::<u16>()
                        .map_err(|e| CommerceError::ConfigError(format!("SMTP_PORT: {}", e)))?,
                    None => DEFAULT_SMTP_PORT,
                },
                username: var("SMTP_USERNAME"),
                password: var("SMTP_PASSWORD"),
                from,
                to,
                starttls: var("SMTP_STARTTLS").is_none() || flag("SMTP_STARTTLS", var("SMTP_STARTTLS"))?,
            }),
            _ => None,
        };

        Ok(Self {
            addr,
            app_base_url,
            notify_email,
            smtp,
            store_currency,
            exchange_rate_url: var("EXCHANGE_RATE_URL").unwrap_or_else(|| DEFAULT_RATE_URL.to_string()),
            provider_timeout,
            stripe,
            paypal,
            paystack,
        })
    }
}

fn currency(key: &str, raw: &str) -> Result<Currency> {
    Currency::new(raw).map_err(|e| CommerceError::ConfigError(format!("{}: {}", key, e)))
}

fn flag(key: &str, raw: Option<String>) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(CommerceError::ConfigError(format!(
            "{}: expected a boolean, got {}",
            key, other
        ))),
    }
}
