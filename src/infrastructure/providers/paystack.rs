use super::{header, hex_signature_matches, hmac_sha512, http_client, minor_to_decimal, read_json, str_at};
use crate::domain::event::{ConfirmationResult, WebhookEvent};
use crate::domain::money::Currency;
use crate::domain::ports::{
    Callback, EntityKind, PaymentProvider, PaymentRequest, ProviderSession, WebhookHeaders,
};
use crate::domain::provider::{ProviderBinding, ProviderKind, RecurringLink};
use crate::domain::subscription::PlanName;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.paystack.co";
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    /// Paystack plan code per maintenance tier, for recurring subscriptions.
    pub plan_codes: HashMap<PlanName, String>,
    pub currency: Currency,
    pub api_base: String,
    pub app_base_url: String,
    pub timeout: Duration,
}

/// Single-phase card and mobile-money checkout with recurring plans.
///
/// Webhooks are signed with HMAC-SHA512 of the raw body, keyed with the
/// secret API key, hex encoded in `x-paystack-signature`.
pub struct PaystackProvider {
    config: PaystackConfig,
    client: reqwest::Client,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Unwraps Paystack's `{status, message, data}` envelope.
    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.bearer_auth(&self.config.secret_key).send().await?;
        let body = read_json(ProviderKind::Paystack, response).await?;
        if body.get("status").and_then(Value::as_bool) != Some(true) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(CommerceError::provider(format!("paystack: {}", message)));
        }
        Ok(body)
    }

    fn outcome(reference: &str, data: &Value) -> Result<ConfirmationResult> {
        let status = str_at(ProviderKind::Paystack, data, "/status")?;
        let result = match status {
            "success" => ConfirmationResult::captured(ProviderKind::Paystack, reference),
            "failed" | "abandoned" | "reversed" => {
                ConfirmationResult::failed(ProviderKind::Paystack, reference)
            }
            other => {
                return Err(CommerceError::precondition(format!(
                    "paystack transaction {} is still {}",
                    reference, other
                )));
            }
        };
        Ok(match data.get("amount").and_then(minor_to_decimal) {
            Some(amount) => result.with_amount(amount),
            None => result,
        })
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paystack
    }

    fn settlement_currency(&self) -> Currency {
        self.config.currency.clone()
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<ProviderSession> {
        let mut payload = json!({
            "email": request.payer.email,
            "amount": request.amount.to_minor_units()?,
            "currency": request.currency.code(),
            "callback_url": format!("{}/paystack-success", self.config.app_base_url.trim_end_matches('/')),
            "metadata": {
                "name": request.payer.name,
                "entityId": request.entity.id,
                "type": request.entity.kind,
            },
        });
        if request.entity.kind == EntityKind::Subscription {
            let plan = request.plan_name.ok_or_else(|| {
                CommerceError::validation("Subscription payments need a plan name")
            })?;
            let code = self.config.plan_codes.get(&plan).ok_or_else(|| {
                CommerceError::validation(format!("No Paystack plan configured for {}", plan.as_str()))
            })?;
            payload["plan"] = Value::String(code.clone());
        }

        let body = self
            .call(self.client.post(self.url("/transaction/initialize")).json(&payload))
            .await?;
        let reference = str_at(ProviderKind::Paystack, &body, "/data/reference")?;
        let access_code = str_at(ProviderKind::Paystack, &body, "/data/access_code")?;
        let redirect = body
            .pointer("/data/authorization_url")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(ProviderSession {
            binding: ProviderBinding::new(ProviderKind::Paystack, reference)
                .with_access_code(access_code),
            redirect_url: redirect,
            raw: body,
        })
    }

    /// Paystack charges settle in one step, so capture and verify both ask
    /// for the transaction's current state.
    async fn confirm(&self, callback: &Callback) -> Result<ConfirmationResult> {
        let reference = callback.reference();
        let body = self
            .call(self.client.get(self.url(&format!("/transaction/verify/{}", reference))))
            .await?;
        let data = body
            .get("data")
            .ok_or_else(|| CommerceError::provider("paystack verify response has no data"))?;
        Self::outcome(reference, data)
    }

    async fn decode_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent> {
        let signature = header(headers, SIGNATURE_HEADER)?;
        let expected = hmac_sha512(self.config.secret_key.as_bytes(), payload)?;
        if !hex_signature_matches(&expected, signature) {
            return Err(CommerceError::signature("paystack signature mismatch"));
        }

        let event: Value = serde_json::from_slice(payload)
            .map_err(|e| CommerceError::validation(format!("Malformed paystack event: {}", e)))?;
        let event_type = str_at(ProviderKind::Paystack, &event, "/event")?;
        let data = event.get("data").cloned().unwrap_or(Value::Null);

        match event_type {
            "charge.success" => {
                let reference = str_at(ProviderKind::Paystack, &data, "/reference")?;
                Ok(WebhookEvent::Payment(Self::outcome(reference, &data)?))
            }
            "subscription.create" => Ok(WebhookEvent::RecurringLinked {
                provider: ProviderKind::Paystack,
                customer_email: str_at(ProviderKind::Paystack, &data, "/customer/email")?.to_string(),
                subscription_code: str_at(ProviderKind::Paystack, &data, "/subscription_code")?
                    .to_string(),
                email_token: data
                    .get("email_token")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            "invoice.update" if data.get("paid").and_then(Value::as_bool) == Some(true) => {
                Ok(WebhookEvent::RecurringPaid {
                    provider: ProviderKind::Paystack,
                    subscription_code: str_at(
                        ProviderKind::Paystack,
                        &data,
                        "/subscription/subscription_code",
                    )?
                    .to_string(),
                    invoice_ref: str_at(ProviderKind::Paystack, &data, "/invoice_code")?.to_string(),
                    raw_amount: data.get("amount").and_then(minor_to_decimal),
                })
            }
            "invoice.payment_failed" => Ok(WebhookEvent::RecurringFailed {
                provider: ProviderKind::Paystack,
                subscription_code: str_at(
                    ProviderKind::Paystack,
                    &data,
                    "/subscription/subscription_code",
                )?
                .to_string(),
                invoice_ref: data
                    .get("invoice_code")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            other => Ok(WebhookEvent::Ignored {
                provider: ProviderKind::Paystack,
                event_type: other.to_string(),
            }),
        }
    }

    async fn disable_recurring(&self, link: &RecurringLink) -> Result<()> {
        let token = link.email_token.as_deref().ok_or_else(|| {
            CommerceError::validation(format!(
                "paystack subscription {} has no email token",
                link.subscription_code
            ))
        })?;
        self.call(
            self.client
                .post(self.url("/subscription/disable"))
                .json(&json!({ "code": link.subscription_code, "token": token })),
        )
        .await?;
        Ok(())
    }
}
