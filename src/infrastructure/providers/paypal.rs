use super::{header, http_client, read_json, str_at};
use crate::domain::event::{ConfirmationResult, WebhookEvent};
use crate::domain::money::Currency;
use crate::domain::ports::{Callback, PaymentProvider, PaymentRequest, ProviderSession, WebhookHeaders};
use crate::domain::provider::{ProviderBinding, ProviderKind, RecurringLink};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";
pub const LIVE_API_BASE: &str = "https://api-m.paypal.com";

/// Headers PayPal signs every webhook delivery with.
const TRANSMISSION_HEADERS: [(&str, &str); 5] = [
    ("paypal-auth-algo", "auth_algo"),
    ("paypal-cert-url", "cert_url"),
    ("paypal-transmission-id", "transmission_id"),
    ("paypal-transmission-sig", "transmission_sig"),
    ("paypal-transmission-time", "transmission_time"),
];

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
    pub api_base: String,
    pub app_base_url: String,
    pub timeout: Duration,
}

/// PayPal Orders v2 with `intent=AUTHORIZE`: the buyer approves, then a
/// capture call authorizes and captures in one round trip. Settles in USD.
pub struct PaypalProvider {
    config: PaypalConfig,
    client: reqwest::Client,
    token: Mutex<Option<(String, Instant)>>,
}

impl PaypalProvider {
    pub fn new(config: PaypalConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Client-credentials token, reused until shortly before it expires.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref()
            && Instant::now() < *expires
        {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body = read_json(ProviderKind::Paypal, response).await?;
        let token = str_at(ProviderKind::Paypal, &body, "/access_token")?.to_string();
        let lifetime = body.get("expires_in").and_then(Value::as_u64).unwrap_or(300);
        let expires = Instant::now() + Duration::from_secs(lifetime.saturating_sub(60));
        *cached = Some((token.clone(), expires));
        Ok(token)
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        read_json(ProviderKind::Paypal, response).await
    }

    async fn post_empty(&self, path: &str) -> Result<Value> {
        self.call(
            self.client
                .post(self.url(path))
                .header("content-type", "application/json")
                .body("{}"),
        )
        .await
    }

    fn amount_at(value: &Value, pointer: &str) -> Option<Decimal> {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .and_then(|v| Decimal::from_str(v).ok())
    }

    /// Current state of a PayPal order as seen by a verify call.
    fn order_outcome(order: &Value) -> Result<ConfirmationResult> {
        let id = str_at(ProviderKind::Paypal, order, "/id")?;
        let status = str_at(ProviderKind::Paypal, order, "/status")?;
        let payments = order.pointer("/purchase_units/0/payments");
        let capture = payments.and_then(|p| p.pointer("/captures/0"));
        let authorization = payments.and_then(|p| p.pointer("/authorizations/0"));

        if let Some(capture) = capture {
            let result = match capture.get("status").and_then(Value::as_str) {
                Some("COMPLETED") => ConfirmationResult::captured(ProviderKind::Paypal, id),
                Some("DECLINED") | Some("FAILED") => ConfirmationResult::failed(ProviderKind::Paypal, id),
                other => {
                    return Err(CommerceError::precondition(format!(
                        "paypal capture for {} is {}",
                        id,
                        other.unwrap_or("unknown")
                    )));
                }
            };
            return Ok(match Self::amount_at(capture, "/amount/value") {
                Some(amount) => result.with_amount(amount),
                None => result,
            });
        }
        if let Some(authorization) = authorization {
            return match authorization.get("status").and_then(Value::as_str) {
                Some("CREATED") | Some("PENDING") => {
                    Ok(ConfirmationResult::authorized(ProviderKind::Paypal, id))
                }
                Some("DENIED") | Some("VOIDED") | Some("EXPIRED") => {
                    Ok(ConfirmationResult::failed(ProviderKind::Paypal, id))
                }
                other => Err(CommerceError::precondition(format!(
                    "paypal authorization for {} is {}",
                    id,
                    other.unwrap_or("unknown")
                ))),
            };
        }
        match status {
            "VOIDED" => Ok(ConfirmationResult::failed(ProviderKind::Paypal, id)),
            other => Err(CommerceError::precondition(format!(
                "paypal order {} is {}",
                id, other
            ))),
        }
    }

    async fn capture(&self, order_id: &str) -> Result<ConfirmationResult> {
        let authorized = self
            .post_empty(&format!("/v2/checkout/orders/{}/authorize", order_id))
            .await?;
        let authorization_id = str_at(
            ProviderKind::Paypal,
            &authorized,
            "/purchase_units/0/payments/authorizations/0/id",
        )?;
        let captured = self
            .post_empty(&format!("/v2/payments/authorizations/{}/capture", authorization_id))
            .await?;
        let result = match str_at(ProviderKind::Paypal, &captured, "/status")? {
            "COMPLETED" => ConfirmationResult::captured(ProviderKind::Paypal, order_id),
            "DECLINED" | "FAILED" => ConfirmationResult::failed(ProviderKind::Paypal, order_id),
            other => {
                return Err(CommerceError::provider(format!(
                    "paypal capture for {} ended {}",
                    order_id, other
                )));
            }
        };
        Ok(match Self::amount_at(&captured, "/amount/value") {
            Some(amount) => result.with_amount(amount),
            None => result,
        })
    }

    /// Asks PayPal whether the delivery was signed for our webhook id.
    async fn verify_delivery(&self, event: &Value, headers: &WebhookHeaders) -> Result<()> {
        let mut body = serde_json::Map::new();
        for (header_name, field) in TRANSMISSION_HEADERS {
            body.insert(field.to_string(), Value::String(header(headers, header_name)?.to_string()));
        }
        body.insert("webhook_id".to_string(), Value::String(self.config.webhook_id.clone()));
        body.insert("webhook_event".to_string(), event.clone());

        let answer = self
            .call(
                self.client
                    .post(self.url("/v1/notifications/verify-webhook-signature"))
                    .json(&Value::Object(body)),
            )
            .await?;
        match answer.get("verification_status").and_then(Value::as_str) {
            Some("SUCCESS") => Ok(()),
            other => Err(CommerceError::signature(format!(
                "paypal verification status {}",
                other.unwrap_or("missing")
            ))),
        }
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    fn settlement_currency(&self) -> Currency {
        Currency::usd()
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<ProviderSession> {
        let base = self.config.app_base_url.trim_end_matches('/');
        let payload = json!({
            "intent": "AUTHORIZE",
            "purchase_units": [{
                "reference_id": request.entity.id,
                "description": request.description,
                "amount": {
                    "currency_code": request.currency.code(),
                    "value": request.amount.to_string(),
                },
            }],
            "application_context": {
                "return_url": format!("{}/paypal-success", base),
                "cancel_url": format!("{}/paypal-cancel", base),
                "user_action": "PAY_NOW",
            },
        });
        let order = self
            .call(self.client.post(self.url("/v2/checkout/orders")).json(&payload))
            .await?;
        let id = str_at(ProviderKind::Paypal, &order, "/id")?;
        let approve = order
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| {
                links
                    .iter()
                    .find(|l| l.get("rel").and_then(Value::as_str) == Some("approve"))
            })
            .and_then(|l| l.get("href"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(ProviderSession {
            binding: ProviderBinding::new(ProviderKind::Paypal, id),
            redirect_url: approve,
            raw: order,
        })
    }

    async fn confirm(&self, callback: &Callback) -> Result<ConfirmationResult> {
        match callback {
            Callback::Capture { transaction_ref, .. } => self.capture(transaction_ref).await,
            Callback::Verify { reference } => {
                let order = self
                    .call(self.client.get(self.url(&format!("/v2/checkout/orders/{}", reference))))
                    .await?;
                Self::order_outcome(&order)
            }
        }
    }

    async fn decode_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent> {
        // Header presence is checked before any network call.
        for (name, _) in TRANSMISSION_HEADERS {
            header(headers, name)?;
        }
        let event: Value = serde_json::from_slice(payload)
            .map_err(|e| CommerceError::validation(format!("Malformed paypal event: {}", e)))?;
        self.verify_delivery(&event, headers).await?;

        let event_type = str_at(ProviderKind::Paypal, &event, "/event_type")?;
        let resource = event.get("resource").cloned().unwrap_or(Value::Null);
        let order_id = || {
            str_at(
                ProviderKind::Paypal,
                &resource,
                "/supplementary_data/related_ids/order_id",
            )
        };

        let result = match event_type {
            "PAYMENT.AUTHORIZATION.CREATED" => ConfirmationResult::authorized(ProviderKind::Paypal, order_id()?),
            "PAYMENT.CAPTURE.COMPLETED" => {
                ConfirmationResult::captured(ProviderKind::Paypal, order_id()?).two_phase()
            }
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.AUTHORIZATION.VOIDED" => {
                ConfirmationResult::failed(ProviderKind::Paypal, order_id()?)
            }
            other => {
                return Ok(WebhookEvent::Ignored {
                    provider: ProviderKind::Paypal,
                    event_type: other.to_string(),
                });
            }
        };
        Ok(WebhookEvent::Payment(
            match Self::amount_at(&resource, "/amount/value") {
                Some(amount) => result.with_amount(amount),
                None => result,
            },
        ))
    }

    async fn disable_recurring(&self, link: &RecurringLink) -> Result<()> {
        Err(CommerceError::precondition(format!(
            "paypal does not hold recurring billing for {}",
            link.subscription_code
        )))
    }
}
