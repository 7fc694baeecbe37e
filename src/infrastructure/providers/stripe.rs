use super::{header, hex_signature_matches, hmac_sha256, http_client, minor_to_decimal, read_json, str_at};
use crate::domain::event::{ConfirmationResult, PaymentStage, WebhookEvent};
use crate::domain::money::Currency;
use crate::domain::ports::{Callback, PaymentProvider, PaymentRequest, ProviderSession, WebhookHeaders};
use crate::domain::provider::{ProviderBinding, ProviderKind, RecurringLink};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const SIGNATURE_HEADER: &str = "stripe-signature";
/// Maximum age of a signed webhook timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: Currency,
    /// Reserve funds at checkout and capture them in a second call.
    pub manual_capture: bool,
    pub api_base: String,
    pub app_base_url: String,
    pub timeout: Duration,
}

/// Stripe Checkout Sessions, optionally with manual capture.
pub struct StripeProvider {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.bearer_auth(&self.config.secret_key).send().await?;
        read_json(ProviderKind::Stripe, response).await
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Value> {
        self.call(
            self.client
                .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
                .query(&[("expand[]", "payment_intent")]),
        )
        .await
    }

    /// Checks `t=...,v1=...` against HMAC-SHA256 of `"{t}.{payload}"`.
    pub fn verify_signature(&self, payload: &[u8], signature_header: &str, now: i64) -> Result<()> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp =
            timestamp.ok_or_else(|| CommerceError::signature("stripe signature has no timestamp"))?;
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(CommerceError::signature(
                "stripe signature timestamp outside tolerance",
            ));
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        let expected = hmac_sha256(self.config.webhook_secret.as_bytes(), &signed)?;
        if candidates
            .iter()
            .any(|candidate| hex_signature_matches(&expected, candidate))
        {
            Ok(())
        } else {
            Err(CommerceError::signature("stripe signature mismatch"))
        }
    }

    /// Maps a Checkout Session onto a confirmation.
    fn session_outcome(session: &Value) -> Result<ConfirmationResult> {
        let id = str_at(ProviderKind::Stripe, session, "/id")?;
        let payment_status = str_at(ProviderKind::Stripe, session, "/payment_status")?;
        let status = session.get("status").and_then(Value::as_str).unwrap_or("");
        let intent_status = session
            .pointer("/payment_intent/status")
            .and_then(Value::as_str);

        let result = match (payment_status, status, intent_status) {
            ("paid", _, _) => ConfirmationResult::captured(ProviderKind::Stripe, id),
            (_, _, Some("requires_capture")) => ConfirmationResult::authorized(ProviderKind::Stripe, id),
            (_, "complete", None) => ConfirmationResult::authorized(ProviderKind::Stripe, id),
            (_, "expired", _) => ConfirmationResult::failed(ProviderKind::Stripe, id),
            (_, _, Some("canceled")) => ConfirmationResult::failed(ProviderKind::Stripe, id),
            _ => {
                return Err(CommerceError::precondition(format!(
                    "stripe session {} is {}/{}",
                    id, status, payment_status
                )));
            }
        };
        Ok(match session.get("amount_total").and_then(minor_to_decimal) {
            Some(amount) => result.with_amount(amount),
            None => result,
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn settlement_currency(&self) -> Currency {
        self.config.currency.clone()
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<ProviderSession> {
        let base = self.config.app_base_url.trim_end_matches('/');
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount.to_minor_units()?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
            ("customer_email".to_string(), request.payer.email.clone()),
            ("client_reference_id".to_string(), request.entity.id.clone()),
            ("metadata[entityId]".to_string(), request.entity.id.clone()),
            ("metadata[type]".to_string(), request.entity.kind.to_string()),
            (
                "success_url".to_string(),
                format!("{}/payments/stripe/success?session_id={{CHECKOUT_SESSION_ID}}", base),
            ),
            (
                "cancel_url".to_string(),
                format!("{}/payments/stripe/cancel?orderId={}", base, request.entity.id),
            ),
        ];
        if self.config.manual_capture {
            form.push((
                "payment_intent_data[capture_method]".to_string(),
                "manual".to_string(),
            ));
        }

        let session = self
            .call(self.client.post(self.url("/v1/checkout/sessions")).form(&form))
            .await?;
        let id = str_at(ProviderKind::Stripe, &session, "/id")?;
        let redirect = session.get("url").and_then(Value::as_str).map(str::to_string);
        Ok(ProviderSession {
            binding: ProviderBinding::new(ProviderKind::Stripe, id),
            redirect_url: redirect,
            raw: session,
        })
    }

    async fn confirm(&self, callback: &Callback) -> Result<ConfirmationResult> {
        match callback {
            Callback::Verify { reference } => {
                let session = self.fetch_session(reference).await?;
                Self::session_outcome(&session)
            }
            Callback::Capture { transaction_ref, .. } => {
                let session = self.fetch_session(transaction_ref).await?;
                let current = Self::session_outcome(&session)?;
                if current.stage != PaymentStage::Authorized {
                    return Ok(current);
                }
                let intent = str_at(ProviderKind::Stripe, &session, "/payment_intent/id")?;
                let captured = self
                    .call(
                        self.client
                            .post(self.url(&format!("/v1/payment_intents/{}/capture", intent))),
                    )
                    .await?;
                let status = str_at(ProviderKind::Stripe, &captured, "/status")?;
                let result = match status {
                    "succeeded" => ConfirmationResult::captured(ProviderKind::Stripe, transaction_ref.as_str()),
                    "canceled" => ConfirmationResult::failed(ProviderKind::Stripe, transaction_ref.as_str()),
                    other => {
                        return Err(CommerceError::provider(format!(
                            "stripe capture for {} ended {}",
                            transaction_ref, other
                        )));
                    }
                };
                Ok(match captured.get("amount_received").and_then(minor_to_decimal) {
                    Some(amount) => result.with_amount(amount),
                    None => result,
                })
            }
        }
    }

    async fn decode_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent> {
        let signature = header(headers, SIGNATURE_HEADER)?;
        self.verify_signature(payload, signature, Utc::now().timestamp())?;

        let event: Value = serde_json::from_slice(payload)
            .map_err(|e| CommerceError::validation(format!("Malformed stripe event: {}", e)))?;
        let event_type = str_at(ProviderKind::Stripe, &event, "/type")?;
        let session = event.pointer("/data/object").cloned().unwrap_or(Value::Null);

        let result = match event_type {
            "checkout.session.completed" => {
                let id = str_at(ProviderKind::Stripe, &session, "/id")?;
                if session.get("payment_status").and_then(Value::as_str) == Some("paid") {
                    ConfirmationResult::captured(ProviderKind::Stripe, id)
                } else {
                    ConfirmationResult::authorized(ProviderKind::Stripe, id)
                }
            }
            "checkout.session.async_payment_succeeded" => {
                ConfirmationResult::captured(ProviderKind::Stripe, str_at(ProviderKind::Stripe, &session, "/id")?)
            }
            "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                ConfirmationResult::failed(ProviderKind::Stripe, str_at(ProviderKind::Stripe, &session, "/id")?)
            }
            other => {
                return Ok(WebhookEvent::Ignored {
                    provider: ProviderKind::Stripe,
                    event_type: other.to_string(),
                });
            }
        };
        Ok(WebhookEvent::Payment(
            match session.get("amount_total").and_then(minor_to_decimal) {
                Some(amount) => result.with_amount(amount),
                None => result,
            },
        ))
    }

    async fn disable_recurring(&self, link: &RecurringLink) -> Result<()> {
        Err(CommerceError::precondition(format!(
            "stripe does not hold recurring billing for {}",
            link.subscription_code
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::Outcome;
    use serde_json::json;

    const SECRET: &str = "whsec_test123secret456";

    fn provider() -> StripeProvider {
        StripeProvider::new(StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: SECRET.to_string(),
            currency: Currency::new("USD").unwrap(),
            manual_capture: false,
            api_base: DEFAULT_API_BASE.to_string(),
            app_base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(payload);
        let mac = hmac_sha256(secret.as_bytes(), &signed).unwrap();
        format!("t={},v1={}", timestamp, hex::encode(mac))
    }

    #[test]
    fn test_valid_signature() {
        let payload = b"{\"type\":\"checkout.session.completed\"}";
        let now = Utc::now().timestamp();
        assert!(provider().verify_signature(payload, &sign(payload, SECRET, now), now).is_ok());
    }

    #[test]
    fn test_wrong_secret_and_modified_payload() {
        let payload = b"{\"type\":\"checkout.session.completed\"}";
        let now = Utc::now().timestamp();
        let p = provider();
        assert!(p.verify_signature(payload, &sign(payload, "wrong_secret", now), now).is_err());
        let header = sign(payload, SECRET, now);
        assert!(p.verify_signature(b"{\"type\":\"other\"}", &header, now).is_err());
    }

    #[test]
    fn test_old_timestamp_is_rejected() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let old = now - 600;
        assert!(matches!(
            provider().verify_signature(payload, &sign(payload, SECRET, old), now),
            Err(CommerceError::SignatureError(_))
        ));
    }

    #[test]
    fn test_rotated_secret_second_v1_accepted() {
        let payload = b"{}";
        let now = Utc::now().timestamp();
        let good = sign(payload, SECRET, now);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1={}", now, "00".repeat(32), good_sig);
        assert!(provider().verify_signature(payload, &header, now).is_ok());
    }

    #[test]
    fn test_session_outcomes() {
        let paid = json!({ "id": "cs_1", "status": "complete", "payment_status": "paid", "amount_total": 19250 });
        let result = StripeProvider::session_outcome(&paid).unwrap();
        assert_eq!(result.stage, PaymentStage::Captured);
        assert_eq!(result.raw_amount, Some(rust_decimal_macros::dec!(192.50)));

        let held = json!({
            "id": "cs_2",
            "status": "complete",
            "payment_status": "unpaid",
            "payment_intent": { "id": "pi_2", "status": "requires_capture" }
        });
        let result = StripeProvider::session_outcome(&held).unwrap();
        assert_eq!(result.stage, PaymentStage::Authorized);
        assert!(result.two_phase);

        let expired = json!({ "id": "cs_3", "status": "expired", "payment_status": "unpaid" });
        assert_eq!(StripeProvider::session_outcome(&expired).unwrap().outcome, Outcome::Failed);

        let open = json!({ "id": "cs_4", "status": "open", "payment_status": "unpaid" });
        assert!(matches!(
            StripeProvider::session_outcome(&open),
            Err(CommerceError::PreconditionError(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_decodes_completed_session() {
        let payload = br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs_9","payment_status":"paid","amount_total":500}}}"#;
        let now = Utc::now().timestamp();
        let headers = WebhookHeaders::from([(SIGNATURE_HEADER.to_string(), sign(payload, SECRET, now))]);
        match provider().decode_webhook(payload, &headers).await.unwrap() {
            WebhookEvent::Payment(result) => {
                assert_eq!(result.transaction_ref, "cs_9");
                assert_eq!(result.stage, PaymentStage::Captured);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
