#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use orderdesk::application::checkout::{
    InitiatePayment, OrderCheckout, Requester, SeedData, SubscriptionCheckout,
};
use orderdesk::application::engine::CommerceEngine;
use orderdesk::domain::event::{ConfirmationResult, WebhookEvent};
use orderdesk::domain::money::Currency;
use orderdesk::domain::ports::{
    Callback, EntityKind, Notification, Notifier, PaymentProvider, PaymentRequest,
    ProviderSession, WebhookHeaders,
};
use orderdesk::domain::provider::{ProviderBinding, ProviderKind, RecurringLink};
use orderdesk::domain::subscription::PlanName;
use orderdesk::error::{CommerceError, Result};
use orderdesk::infrastructure::exchange::StaticRates;
use orderdesk::infrastructure::in_memory;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const SIGNATURE_HEADER: &str = "x-test-signature";
pub const VALID_SIGNATURE: &str = "valid";

/// Provider double: hands out sequential references, answers confirmations
/// from a script, and accepts webhooks signed with [`VALID_SIGNATURE`].
///
/// Webhook payloads are JSON: `{"ref": "...", "outcome": "captured|authorized|failed", "twoPhase": bool}`.
/// Recurring billing uses `{"event": "linked|invoice_paid|invoice_failed", "subscription": "...", ...}`.
pub struct FakeProvider {
    kind: ProviderKind,
    currency: Currency,
    counter: AtomicUsize,
    pub confirmations: Mutex<HashMap<String, ConfirmationResult>>,
    pub initiated: Mutex<Vec<PaymentRequest>>,
    pub confirm_calls: AtomicUsize,
    pub disabled: Mutex<Vec<RecurringLink>>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind, currency: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            currency: Currency::new(currency).unwrap(),
            counter: AtomicUsize::new(0),
            confirmations: Mutex::new(HashMap::new()),
            initiated: Mutex::new(Vec::new()),
            confirm_calls: AtomicUsize::new(0),
            disabled: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, result: ConfirmationResult) {
        self.confirmations
            .lock()
            .unwrap()
            .insert(result.transaction_ref.clone(), result);
    }

    pub fn confirm_count(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn settlement_currency(&self) -> Currency {
        self.currency.clone()
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<ProviderSession> {
        self.initiated.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("{}_ref_{}", self.kind, n);
        Ok(ProviderSession {
            binding: ProviderBinding::new(self.kind, reference.clone()),
            redirect_url: Some(format!("https://pay.example.com/{}", reference)),
            raw: json!({ "reference": reference }),
        })
    }

    async fn confirm(&self, callback: &Callback) -> Result<ConfirmationResult> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.confirmations
            .lock()
            .unwrap()
            .get(callback.reference())
            .cloned()
            .ok_or_else(|| CommerceError::provider(format!("unknown transaction {}", callback.reference())))
    }

    async fn decode_webhook(&self, payload: &[u8], headers: &WebhookHeaders) -> Result<WebhookEvent> {
        if headers.get(SIGNATURE_HEADER).map(String::as_str) != Some(VALID_SIGNATURE) {
            return Err(CommerceError::signature("bad test signature"));
        }
        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| CommerceError::validation(e.to_string()))?;
        let code = body["subscription"].as_str().unwrap_or_default().to_string();
        match body["event"].as_str() {
            Some("linked") => {
                return Ok(WebhookEvent::RecurringLinked {
                    provider: self.kind,
                    customer_email: body["email"].as_str().unwrap_or_default().to_string(),
                    subscription_code: code,
                    email_token: None,
                });
            }
            Some("invoice_paid") => {
                return Ok(WebhookEvent::RecurringPaid {
                    provider: self.kind,
                    subscription_code: code,
                    invoice_ref: body["invoice"].as_str().unwrap_or_default().to_string(),
                    raw_amount: None,
                });
            }
            Some("invoice_failed") => {
                return Ok(WebhookEvent::RecurringFailed {
                    provider: self.kind,
                    subscription_code: code,
                    invoice_ref: body["invoice"].as_str().map(str::to_string),
                });
            }
            _ => {}
        }
        let reference = body["ref"].as_str().unwrap_or_default().to_string();
        let result = match body["outcome"].as_str() {
            Some("authorized") => ConfirmationResult::authorized(self.kind, reference),
            Some("failed") => ConfirmationResult::failed(self.kind, reference),
            _ => ConfirmationResult::captured(self.kind, reference),
        };
        let result = if body["twoPhase"].as_bool() == Some(true) {
            result.two_phase()
        } else {
            result
        };
        Ok(WebhookEvent::Payment(result))
    }

    async fn disable_recurring(&self, link: &RecurringLink) -> Result<()> {
        self.disabled.lock().unwrap().push(link.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier(pub Mutex<Vec<Notification>>);

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.0.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn kes() -> Currency {
    Currency::new("KES").unwrap()
}

pub fn rates() -> StaticRates {
    StaticRates::new().with_rate(&kes(), &Currency::usd(), dec!(0.0077))
}

pub struct Harness {
    pub engine: Arc<CommerceEngine>,
    pub notifier: Arc<RecordingNotifier>,
}

/// In-memory engine with the given providers, KES store currency and a
/// fixed KES/USD rate.
pub fn harness(providers: &[Arc<FakeProvider>]) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut engine = CommerceEngine::new(
        in_memory::stores(),
        Arc::new(rates()),
        notifier.clone(),
        kes(),
    );
    for provider in providers {
        engine = engine.with_provider(provider.clone());
    }
    Harness {
        engine: Arc::new(engine),
        notifier,
    }
}

pub fn catalog() -> SeedData {
    serde_json::from_value(json!({
        "packages": [
            {
                "id": "dev",
                "title": "Business Site",
                "price": 25000,
                "billingCycle": "one-time",
                "features": ["Blog"],
                "planType": "development",
                "createdAt": "2025-01-01T00:00:00Z",
                "updatedAt": "2025-01-01T00:00:00Z"
            },
            {
                "id": "custom",
                "title": "Custom Build",
                "billingCycle": "one-time",
                "planType": "development",
                "createdAt": "2025-01-02T00:00:00Z",
                "updatedAt": "2025-01-02T00:00:00Z"
            },
            {
                "id": "care",
                "title": "Site Care",
                "price": 3000,
                "billingCycle": "monthly",
                "planType": "maintenance",
                "createdAt": "2025-01-03T00:00:00Z",
                "updatedAt": "2025-01-03T00:00:00Z"
            }
        ]
    }))
    .unwrap()
}

pub async fn seeded(providers: &[Arc<FakeProvider>]) -> Harness {
    let harness = harness(providers);
    harness.engine.seed(catalog()).await.unwrap();
    harness
}

pub fn client() -> Requester {
    Requester::client("user_1")
}

pub fn admin() -> Requester {
    Requester::admin("admin_1")
}

pub fn order_checkout(plan_id: &str) -> OrderCheckout {
    serde_json::from_value(json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone": "+254700000000",
        "planId": plan_id,
        "description": "Five page site",
    }))
    .unwrap()
}

pub fn subscription_checkout(plan_id: &str, plan_name: PlanName) -> SubscriptionCheckout {
    serde_json::from_value(json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone": "+254700000000",
        "planId": plan_id,
        "planName": plan_name,
    }))
    .unwrap()
}

pub fn pay(kind: EntityKind, id: &str) -> InitiatePayment {
    InitiatePayment {
        kind,
        entity_id: id.to_string(),
        amount: None,
    }
}

pub fn signed() -> WebhookHeaders {
    WebhookHeaders::from([(SIGNATURE_HEADER.to_string(), VALID_SIGNATURE.to_string())])
}

pub fn webhook_body(reference: &str, outcome: &str, two_phase: bool) -> Vec<u8> {
    serde_json::to_vec(&json!({ "ref": reference, "outcome": outcome, "twoPhase": two_phase })).unwrap()
}

pub fn linked_body(email: &str, subscription_code: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({ "event": "linked", "email": email, "subscription": subscription_code })).unwrap()
}

pub fn invoice_body(subscription_code: &str, invoice: &str, paid: bool) -> Vec<u8> {
    let event = if paid { "invoice_paid" } else { "invoice_failed" };
    serde_json::to_vec(&json!({ "event": event, "subscription": subscription_code, "invoice": invoice })).unwrap()
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
