use super::checkout::{
    InitiatePayment, NewPackage, OrderCheckout, Requester, SeedData, SubmissionUpload,
    SubscriptionCheckout,
};
use super::reconciliation::{self, Applied, Effect, Reconciled};
use crate::domain::event::{ConfirmationResult, EventKind, NormalizedEvent, WebhookEvent};
use crate::domain::lifecycle::{self, Actor};
use crate::domain::money::{Currency, Price};
use crate::domain::order::{Order, OrderStatus, PaymentStatus};
use crate::domain::package::Package;
use crate::domain::patch::{OrderPatch, PackagePatch, SubscriptionPatch};
use crate::domain::ports::{
    Callback, EntityKind, EntityRef, ExchangeRates, Notification, Notifier, OrderStoreBox,
    PackageStoreBox, PayerInfo, PaymentRequest, ProviderHandle, ProviderSession,
    SubmissionStoreBox, SubscriptionStoreBox, WebhookHeaders,
};
use crate::domain::provider::{ProviderKind, RecurringLink};
use crate::domain::submission::Submission;
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::error::{CommerceError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The four entity stores the engine persists through.
pub struct Stores {
    pub orders: OrderStoreBox,
    pub subscriptions: SubscriptionStoreBox,
    pub submissions: SubmissionStoreBox,
    pub packages: PackageStoreBox,
}

/// Outcome of applying one provider confirmation to the entity it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub entity: EntityRef,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub status: String,
    pub payment_status: PaymentStatus,
}

impl Settlement {
    /// Funds are reserved or transferred after reconciliation.
    pub fn is_paid(&self) -> bool {
        self.payment_status.holds_funds()
    }
}

/// Acknowledgement for a webhook delivery that passed signature checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub packages: usize,
    pub orders: usize,
    pub subscriptions: usize,
}

/// Orchestrates checkout, payment and fulfilment for orders and subscriptions.
///
/// Every write follows the same path: re-read the current snapshot, consult
/// the lifecycle guard or the reconciliation engine, persist, then run side
/// effects. Side effects (notifications, recurring-billing shutdown) are
/// best-effort and never roll back the state change that produced them.
pub struct CommerceEngine {
    stores: Stores,
    providers: HashMap<ProviderKind, ProviderHandle>,
    rates: Arc<dyn ExchangeRates>,
    notifier: Arc<dyn Notifier>,
    store_currency: Currency,
}

impl CommerceEngine {
    pub fn new(
        stores: Stores,
        rates: Arc<dyn ExchangeRates>,
        notifier: Arc<dyn Notifier>,
        store_currency: Currency,
    ) -> Self {
        Self {
            stores,
            providers: HashMap::new(),
            rates,
            notifier,
            store_currency,
        }
    }

    /// Registers a provider adapter, replacing any adapter of the same kind.
    pub fn with_provider(mut self, provider: ProviderHandle) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn registered_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }

    fn provider(&self, kind: ProviderKind) -> Result<&ProviderHandle> {
        self.providers.get(&kind).ok_or_else(|| {
            CommerceError::validation(format!("Payment provider {} is not configured", kind))
        })
    }

    // ---- catalog ----

    pub async fn list_packages(&self) -> Result<Vec<Package>> {
        self.stores.packages.list().await
    }

    pub async fn get_package(&self, id: &str) -> Result<Package> {
        self.stores
            .packages
            .get(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(format!("Package {}", id)))
    }

    pub async fn create_package(&self, requester: &Requester, new: NewPackage) -> Result<Package> {
        require_admin(requester, "create packages")?;
        let now = Utc::now();
        let package = Package {
            id: Uuid::new_v4().to_string(),
            title: new.title.trim().to_string(),
            price: new.price,
            billing_cycle: new.billing_cycle,
            description: new.description,
            features: new.features,
            popular: new.popular,
            plan_type: new.plan_type,
            created_at: now,
            updated_at: now,
        };
        package.validate()?;
        self.stores.packages.store(package.clone()).await?;
        tracing::info!(package_id = %package.id, "Package created");
        Ok(package)
    }

    pub async fn update_package(
        &self,
        requester: &Requester,
        id: &str,
        patch: PackagePatch,
    ) -> Result<Package> {
        require_admin(requester, "edit packages")?;
        let mut package = self.get_package(id).await?;
        patch.apply(&mut package);
        package.updated_at = Utc::now();
        package.validate()?;
        self.stores.packages.store(package.clone()).await?;
        Ok(package)
    }

    pub async fn delete_package(&self, requester: &Requester, id: &str) -> Result<()> {
        require_admin(requester, "delete packages")?;
        if !self.stores.packages.delete(id).await? {
            return Err(CommerceError::not_found(format!("Package {}", id)));
        }
        Ok(())
    }

    // ---- checkout ----

    pub async fn place_order(&self, requester: &Requester, checkout: OrderCheckout) -> Result<Order> {
        let contact = checkout.contact();
        contact.validate()?;
        let package = self.get_package(&checkout.plan_id).await?;
        let price = package.quote(checkout.price)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            user_id: requester.user_id.clone(),
            contact,
            plan_id: package.id.clone(),
            plan_title: package.title.clone(),
            plan_type: package.plan_type,
            price,
            description: checkout.description,
            features: checkout.features,
            file_urls: checkout.file_urls,
            links: checkout.links,
            payment: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
        };
        order.validate()?;
        self.stores.orders.store(order.clone()).await?;
        tracing::info!(order_id = %order.id, plan = %order.plan_title, "Order placed");

        self.notify(Notification {
            subject: format!("New order: {}", order.plan_title),
            body: format!(
                "{} ({}, {}) ordered {} for {}.\n\n{}",
                order.contact.name,
                order.contact.email,
                order.contact.phone,
                order.plan_title,
                order.price,
                order.description
            ),
        })
        .await;
        Ok(order)
    }

    pub async fn place_subscription(
        &self,
        requester: &Requester,
        checkout: SubscriptionCheckout,
    ) -> Result<Subscription> {
        let contact = checkout.contact();
        contact.validate()?;
        let package = self.get_package(&checkout.plan_id).await?;
        let price = package.quote(checkout.price)?;
        let interval = checkout.resolve_interval(&package).ok_or_else(|| {
            CommerceError::validation(format!(
                "Package {} is one-time; a billing interval is required",
                package.id
            ))
        })?;

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            user_id: requester.user_id.clone(),
            contact,
            plan_id: package.id.clone(),
            plan_title: package.title.clone(),
            plan_name: checkout.plan_name,
            price,
            interval,
            description: checkout.description,
            features: checkout.features,
            file_urls: checkout.file_urls,
            links: checkout.links,
            start_date: now,
            next_billing_date: interval.advance(now)?,
            end_date: None,
            status: SubscriptionStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            payment: None,
            recurring: None,
            last_payment_ref: None,
            paid_refs: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        subscription.validate()?;
        self.stores.subscriptions.store(subscription.clone()).await?;
        tracing::info!(subscription_id = %subscription.id, plan = subscription.plan_name.as_str(), "Subscription placed");

        self.notify(Notification {
            subject: format!("New subscription: {}", subscription.plan_title),
            body: format!(
                "{} ({}) subscribed to {} ({}) at {} per period.",
                subscription.contact.name,
                subscription.contact.email,
                subscription.plan_title,
                subscription.interval,
                subscription.price
            ),
        })
        .await;
        Ok(subscription)
    }

    // ---- orders ----

    pub async fn list_orders(&self, requester: &Requester) -> Result<Vec<Order>> {
        let scope = (!requester.is_admin()).then_some(requester.user_id.as_str());
        self.stores.orders.list(scope).await
    }

    pub async fn get_order(&self, requester: &Requester, id: &str) -> Result<Order> {
        let order = self.load_order(id).await?;
        if !requester.is_admin() && !order.is_owned_by(&requester.user_id) {
            return Err(CommerceError::precondition(format!(
                "order {} belongs to another user",
                id
            )));
        }
        Ok(order)
    }

    /// Applies an allow-listed update; a status change goes through the
    /// lifecycle guard for the requester's role.
    pub async fn update_order(
        &self,
        requester: &Requester,
        id: &str,
        patch: OrderPatch,
    ) -> Result<Order> {
        let mut order = self.get_order(requester, id).await?;
        let now = Utc::now();

        if patch.has_content_changes() {
            if matches!(
                order.status,
                OrderStatus::Accepted | OrderStatus::Cancelled | OrderStatus::Failed
            ) {
                return Err(CommerceError::precondition(format!(
                    "order {} is {} and can no longer be edited",
                    order.id, order.status
                )));
            }
            patch.apply(&mut order);
        }

        let mut effects = Vec::new();
        if let Some(target) = patch.status.filter(|target| *target != order.status) {
            let delivered = match target {
                OrderStatus::Completed => self
                    .stores
                    .submissions
                    .get(&order.id)
                    .await?
                    .map_or(0, |s| s.files.len()),
                _ => 0,
            };
            lifecycle::check_order_transition(&order, requester.actor, target, delivered)?;
            tracing::info!(order_id = %order.id, from = %order.status, to = %target, actor = %requester.actor, "Order status change");
            order.status = target;
            match target {
                OrderStatus::Accepted => {
                    effects.push(Effect::ReleaseFunds {
                        order_id: order.id.clone(),
                    });
                    effects.push(Effect::Notify(Notification {
                        subject: format!("Order accepted: {}", order.id),
                        body: format!(
                            "{} accepted the delivery for {}. Release the {} payment.",
                            order.contact.name,
                            order.plan_title,
                            order
                                .payment
                                .as_ref()
                                .map_or("recorded", |b| b.provider.as_str())
                        ),
                    }));
                }
                OrderStatus::Cancelled => effects.push(Effect::Notify(Notification {
                    subject: format!("Order cancelled: {}", order.id),
                    body: format!("{} cancelled by {}.", order.plan_title, requester.actor),
                })),
                _ => {}
            }
        }

        order.touch(now);
        order.validate()?;
        self.stores.orders.store(order.clone()).await?;
        self.run_effects(effects).await;
        Ok(order)
    }

    pub async fn delete_order(&self, requester: &Requester, id: &str) -> Result<()> {
        let order = self.get_order(requester, id).await?;
        lifecycle::check_order_deletion(&order, requester.actor)?;
        self.stores.orders.delete(id).await?;
        tracing::info!(order_id = id, actor = %requester.actor, "Order deleted");
        Ok(())
    }

    async fn load_order(&self, id: &str) -> Result<Order> {
        self.stores
            .orders
            .get(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(format!("Order {}", id)))
    }

    // ---- subscriptions ----

    pub async fn list_subscriptions(&self, requester: &Requester) -> Result<Vec<Subscription>> {
        let scope = (!requester.is_admin()).then_some(requester.user_id.as_str());
        self.stores.subscriptions.list(scope).await
    }

    pub async fn get_subscription(&self, requester: &Requester, id: &str) -> Result<Subscription> {
        let subscription = self.load_subscription(id).await?;
        if !requester.is_admin() && !subscription.is_owned_by(&requester.user_id) {
            return Err(CommerceError::precondition(format!(
                "subscription {} belongs to another user",
                id
            )));
        }
        Ok(subscription)
    }

    pub async fn update_subscription(
        &self,
        requester: &Requester,
        id: &str,
        patch: SubscriptionPatch,
    ) -> Result<Subscription> {
        let mut subscription = self.get_subscription(requester, id).await?;
        let now = Utc::now();

        if patch.has_content_changes() {
            if matches!(
                subscription.status,
                SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
            ) {
                return Err(CommerceError::precondition(format!(
                    "subscription {} is {} and can no longer be edited",
                    subscription.id, subscription.status
                )));
            }
            patch.apply(&mut subscription);
        }

        let mut effects = Vec::new();
        if let Some(target) = patch.status.filter(|target| *target != subscription.status) {
            lifecycle::check_subscription_transition(&subscription, requester.actor, target)?;
            tracing::info!(subscription_id = %subscription.id, from = %subscription.status, to = %target, actor = %requester.actor, "Subscription status change");
            subscription.status = target;
            if matches!(
                target,
                SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
            ) {
                subscription.end_date = Some(now);
                if let Some(link) = subscription.recurring.clone() {
                    effects.push(Effect::DisableRecurring(link));
                }
            }
        }

        subscription.touch(now);
        subscription.validate()?;
        self.stores.subscriptions.store(subscription.clone()).await?;
        self.run_effects(effects).await;
        Ok(subscription)
    }

    pub async fn delete_subscription(&self, requester: &Requester, id: &str) -> Result<()> {
        let subscription = self.get_subscription(requester, id).await?;
        lifecycle::check_subscription_deletion(&subscription, requester.actor)?;
        self.stores.subscriptions.delete(id).await?;
        tracing::info!(subscription_id = id, actor = %requester.actor, "Subscription deleted");
        Ok(())
    }

    async fn load_subscription(&self, id: &str) -> Result<Subscription> {
        self.stores
            .subscriptions
            .get(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(format!("Subscription {}", id)))
    }

    // ---- submissions ----

    /// Records delivered files for an order. Admin only.
    pub async fn append_submission(
        &self,
        requester: &Requester,
        upload: SubmissionUpload,
    ) -> Result<Submission> {
        require_admin(requester, "deliver files")?;
        if upload.files.is_empty() {
            return Err(CommerceError::validation("No files to deliver"));
        }
        let order = self.load_order(&upload.order_id).await?;
        if !matches!(order.status, OrderStatus::Inprogress | OrderStatus::Completed) {
            return Err(CommerceError::precondition(format!(
                "order {} is {}; files can only be delivered for paid work",
                order.id, order.status
            )));
        }

        let now = Utc::now();
        let mut submission = self
            .stores
            .submissions
            .get(&order.id)
            .await?
            .unwrap_or_else(|| Submission::new(&order.id, &requester.user_id, now));
        if let Some(email) = upload.email {
            submission.email = Some(email);
        }
        let added = submission.append(upload.files, now);
        self.stores.submissions.store(submission.clone()).await?;
        tracing::info!(order_id = %order.id, added, total = submission.files.len(), "Files delivered");

        if added > 0 {
            self.notify(Notification {
                subject: format!("Files delivered for {}", order.plan_title),
                body: format!(
                    "{} new file(s) are ready for {} ({}).",
                    added, order.contact.name, order.contact.email
                ),
            })
            .await;
        }
        Ok(submission)
    }

    /// Delivered files for an order, `None` when nothing was delivered yet.
    pub async fn get_submission(
        &self,
        requester: &Requester,
        order_id: &str,
    ) -> Result<Option<Submission>> {
        self.get_order(requester, order_id).await?;
        self.stores.submissions.get(order_id).await
    }

    // ---- payments ----

    /// Opens a provider-side payment for a pending entity and binds the
    /// returned reference to it.
    ///
    /// Initiation never changes `status` or `paymentStatus`. Any failure
    /// before the provider answers (unknown provider, rate lookup, provider
    /// error) leaves the entity untouched.
    pub async fn initiate_payment(
        &self,
        requester: &Requester,
        provider: ProviderKind,
        body: InitiatePayment,
    ) -> Result<ProviderSession> {
        let adapter = self.provider(provider)?.clone();
        let entity = EntityRef {
            kind: body.kind,
            id: body.entity_id.clone(),
        };

        let (price, payer, description, plan_name) = match body.kind {
            EntityKind::Order => {
                let order = self.get_order(requester, &body.entity_id).await?;
                check_order_payable(&order, provider)?;
                (
                    order.price,
                    PayerInfo {
                        email: order.contact.email.clone(),
                        name: order.contact.name.clone(),
                    },
                    order.plan_title.clone(),
                    None,
                )
            }
            EntityKind::Subscription => {
                let subscription = self.get_subscription(requester, &body.entity_id).await?;
                check_subscription_payable(&subscription, provider)?;
                (
                    subscription.price,
                    PayerInfo {
                        email: subscription.contact.email.clone(),
                        name: subscription.contact.name.clone(),
                    },
                    subscription.plan_title.clone(),
                    Some(subscription.plan_name),
                )
            }
        };

        if let Some(claimed) = body.amount
            && claimed != price
        {
            return Err(CommerceError::validation(format!(
                "Amount {} does not match the recorded price {}",
                claimed, price
            )));
        }

        let currency = adapter.settlement_currency();
        let amount = self.convert(price, &currency).await?;
        let request = PaymentRequest {
            entity: entity.clone(),
            amount,
            currency,
            payer,
            description,
            plan_name,
        };
        let session = adapter.initiate(&request).await?;

        // Re-read: the entity may have moved while the provider call was in flight.
        match body.kind {
            EntityKind::Order => {
                let mut order = self.load_order(&entity.id).await?;
                check_order_payable(&order, provider)?;
                order.payment = Some(session.binding.clone());
                order.touch(Utc::now());
                self.stores.orders.store(order).await?;
            }
            EntityKind::Subscription => {
                let mut subscription = self.load_subscription(&entity.id).await?;
                check_subscription_payable(&subscription, provider)?;
                subscription.payment = Some(session.binding.clone());
                subscription.touch(Utc::now());
                self.stores.subscriptions.store(subscription).await?;
            }
        }
        tracing::info!(
            provider = %provider,
            entity = ?entity.kind,
            entity_id = %entity.id,
            reference = %session.binding.reference,
            amount = %request.amount,
            currency = request.currency.code(),
            "Payment initiated"
        );
        Ok(session)
    }

    async fn convert(&self, price: Price, to: &Currency) -> Result<Price> {
        if *to == self.store_currency {
            return Ok(price);
        }
        let rate: Decimal = self.rates.rate(&self.store_currency, to).await?;
        price.convert(rate)
    }

    /// Synchronous confirmation driven by a redirect or a client capture call.
    ///
    /// A reference no local entity is bound to is rejected before the
    /// provider is contacted.
    pub async fn confirm(&self, provider: ProviderKind, callback: Callback) -> Result<Settlement> {
        let adapter = self.provider(provider)?.clone();
        let reference = callback.reference();
        let settled = if let Some(order) = self
            .stores
            .orders
            .find_by_provider_ref(provider, reference)
            .await?
        {
            reconciliation::order_settled(&order, provider, reference)
                .then(|| order_settlement(&order, &Applied::Duplicate))
        } else if let Some(subscription) = self
            .stores
            .subscriptions
            .find_by_provider_ref(provider, reference)
            .await?
        {
            reconciliation::subscription_settled(&subscription, provider, reference)
                .then(|| subscription_settlement(&subscription, &Applied::Duplicate))
        } else {
            return Err(CommerceError::not_found(format!(
                "No order or subscription matches {} transaction {}",
                provider, reference
            )));
        };
        if let Some(settlement) = settled {
            tracing::info!(
                provider = %provider,
                reference = %reference,
                entity_id = %settlement.entity.id,
                "Transaction already settled; provider not contacted"
            );
            return Ok(settlement);
        }
        let result = adapter.confirm(&callback).await?;
        self.apply_confirmation(result).await
    }

    /// Locates the entity bound to the confirmed transaction (orders first,
    /// then subscriptions) and reconciles it.
    pub async fn apply_confirmation(&self, result: ConfirmationResult) -> Result<Settlement> {
        let provider = result.provider;
        let reference = result.transaction_ref.as_str();

        if let Some(order) = self
            .stores
            .orders
            .find_by_provider_ref(provider, reference)
            .await?
        {
            let event = NormalizedEvent::for_order(&result);
            return self.commit_order(&order, &event).await;
        }
        if let Some(subscription) = self
            .stores
            .subscriptions
            .find_by_provider_ref(provider, reference)
            .await?
        {
            let event = NormalizedEvent::for_subscription(&result);
            return self.commit_subscription(&subscription, &event).await;
        }
        Err(CommerceError::not_found(format!(
            "No order or subscription matches {} transaction {}",
            provider, reference
        )))
    }

    /// Authenticates, decodes and applies a webhook delivery.
    ///
    /// Only a signature failure (or an unconfigured provider) is an error.
    /// Unmatched, stale and duplicate events are logged and acknowledged so
    /// the provider stops redelivering them.
    pub async fn handle_webhook(
        &self,
        provider: ProviderKind,
        payload: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<WebhookAck> {
        let adapter = self.provider(provider)?.clone();
        let event = match adapter.decode_webhook(payload, headers).await {
            Ok(event) => event,
            Err(e @ CommerceError::SignatureError(_)) => {
                tracing::error!(provider = %provider, error = %e, "Rejected webhook with invalid signature");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let settlement = match self.apply_webhook_event(event).await {
            Ok(settlement) => settlement,
            Err(CommerceError::NotFound(msg)) => {
                tracing::warn!(provider = %provider, "Unmatched webhook event: {}", msg);
                None
            }
            Err(e @ (CommerceError::ValidationError(_) | CommerceError::PreconditionError(_))) => {
                tracing::warn!(provider = %provider, error = %e, "Webhook event not applicable");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(WebhookAck {
            received: true,
            settlement,
        })
    }

    async fn apply_webhook_event(&self, event: WebhookEvent) -> Result<Option<Settlement>> {
        match event {
            WebhookEvent::Payment(result) => self.apply_confirmation(result).await.map(Some),
            WebhookEvent::RecurringPaid {
                provider,
                subscription_code,
                invoice_ref,
                raw_amount,
            } => {
                let subscription = self.find_recurring(provider, &subscription_code).await?;
                let mut event =
                    NormalizedEvent::new(provider, EventKind::SubscriptionRenewed, invoice_ref);
                event.raw_amount = raw_amount;
                self.commit_subscription(&subscription, &event).await.map(Some)
            }
            WebhookEvent::RecurringFailed {
                provider,
                subscription_code,
                invoice_ref,
            } => {
                let subscription = self.find_recurring(provider, &subscription_code).await?;
                let reference = invoice_ref.unwrap_or(subscription_code);
                let event =
                    NormalizedEvent::new(provider, EventKind::SubscriptionPaymentFailed, reference);
                self.commit_subscription(&subscription, &event).await.map(Some)
            }
            WebhookEvent::RecurringLinked {
                provider,
                customer_email,
                subscription_code,
                email_token,
            } => {
                self.link_recurring(
                    provider,
                    &customer_email,
                    RecurringLink {
                        provider,
                        subscription_code,
                        email_token,
                    },
                )
                .await?;
                Ok(None)
            }
            WebhookEvent::Ignored {
                provider,
                event_type,
            } => {
                tracing::debug!(provider = %provider, event_type = %event_type, "Ignoring webhook event");
                Ok(None)
            }
        }
    }

    async fn find_recurring(&self, provider: ProviderKind, code: &str) -> Result<Subscription> {
        self.stores
            .subscriptions
            .find_by_recurring_code(provider, code)
            .await?
            .ok_or_else(|| {
                CommerceError::not_found(format!("No subscription linked to {} {}", provider, code))
            })
    }

    /// Attaches a provider recurring-billing handle to the newest subscription
    /// of that customer paid through the same provider.
    async fn link_recurring(
        &self,
        provider: ProviderKind,
        email: &str,
        link: RecurringLink,
    ) -> Result<()> {
        let candidates = self.stores.subscriptions.find_by_email(email).await?;
        if candidates
            .iter()
            .any(|s| s.recurring.as_ref() == Some(&link))
        {
            tracing::debug!(provider = %provider, code = %link.subscription_code, "Recurring link already recorded");
            return Ok(());
        }
        let mut subscription = candidates
            .into_iter()
            .filter(|s| {
                s.recurring.is_none()
                    && s.payment.as_ref().is_some_and(|b| b.provider == provider)
                    && !matches!(
                        s.status,
                        SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
                    )
            })
            .max_by_key(|s| s.created_at)
            .ok_or_else(|| {
                CommerceError::not_found(format!(
                    "No {} subscription awaiting a recurring link for {}",
                    provider, email
                ))
            })?;

        tracing::info!(subscription_id = %subscription.id, code = %link.subscription_code, "Recurring billing linked");
        subscription.recurring = Some(link);
        subscription.touch(Utc::now());
        self.stores.subscriptions.store(subscription).await
    }

    async fn commit_order(&self, current: &Order, event: &NormalizedEvent) -> Result<Settlement> {
        let Reconciled {
            next,
            applied,
            effects,
        } = reconciliation::reconcile_order(current, event, Utc::now())?;
        log_applied(&applied, EntityKind::Order, &current.id, event);
        if applied == Applied::Transitioned {
            self.stores.orders.store(next.clone()).await?;
        }
        self.run_effects(effects).await;
        Ok(order_settlement(&next, &applied))
    }

    async fn commit_subscription(
        &self,
        current: &Subscription,
        event: &NormalizedEvent,
    ) -> Result<Settlement> {
        let Reconciled {
            next,
            applied,
            effects,
        } = reconciliation::reconcile_subscription(current, event, Utc::now())?;
        log_applied(&applied, EntityKind::Subscription, &current.id, event);
        if applied == Applied::Transitioned {
            self.stores.subscriptions.store(next.clone()).await?;
        }
        self.run_effects(effects).await;
        Ok(subscription_settlement(&next, &applied))
    }

    // ---- side effects ----

    async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notify(notification) => self.notify(notification).await,
                Effect::ReleaseFunds { order_id } => {
                    tracing::info!(order_id = %order_id, "Funds ready for release");
                }
                Effect::DisableRecurring(link) => self.disable_recurring(&link).await,
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(subject = %notification.subject, error = %e, "Notification failed");
        }
    }

    async fn disable_recurring(&self, link: &RecurringLink) {
        let Some(adapter) = self.providers.get(&link.provider) else {
            tracing::warn!(provider = %link.provider, code = %link.subscription_code, "Cannot disable recurring billing: provider not configured");
            return;
        };
        match adapter.disable_recurring(link).await {
            Ok(()) => tracing::info!(provider = %link.provider, code = %link.subscription_code, "Recurring billing disabled"),
            Err(e) => tracing::warn!(provider = %link.provider, code = %link.subscription_code, error = %e, "Failed to disable recurring billing"),
        }
    }

    // ---- maintenance ----

    /// Loads catalog and entity records as-is, validating each one.
    pub async fn seed(&self, data: SeedData) -> Result<SeedSummary> {
        let mut summary = SeedSummary::default();
        for package in data.packages {
            package.validate()?;
            self.stores.packages.store(package).await?;
            summary.packages += 1;
        }
        for order in data.orders {
            order.validate()?;
            self.stores.orders.store(order).await?;
            summary.orders += 1;
        }
        for subscription in data.subscriptions {
            subscription.validate()?;
            self.stores.subscriptions.store(subscription).await?;
            summary.subscriptions += 1;
        }
        Ok(summary)
    }

    pub async fn close(&self) -> Result<()> {
        self.stores.orders.close().await?;
        self.stores.subscriptions.close().await?;
        self.stores.submissions.close().await?;
        self.stores.packages.close().await
    }
}

fn require_admin(requester: &Requester, action: &str) -> Result<()> {
    if requester.actor == Actor::Admin {
        Ok(())
    } else {
        Err(CommerceError::precondition(format!(
            "only admins may {}",
            action
        )))
    }
}

fn check_order_payable(order: &Order, provider: ProviderKind) -> Result<()> {
    if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Unpaid {
        return Err(CommerceError::precondition(format!(
            "order {} is {}/{} and cannot start a new payment",
            order.id, order.status, order.payment_status
        )));
    }
    check_binding(order.payment.as_ref().map(|b| b.provider), provider, &order.id)
}

fn check_subscription_payable(subscription: &Subscription, provider: ProviderKind) -> Result<()> {
    if !matches!(
        subscription.status,
        SubscriptionStatus::Pending | SubscriptionStatus::PaymentFailed
    ) {
        return Err(CommerceError::precondition(format!(
            "subscription {} is {} and cannot start a new payment",
            subscription.id, subscription.status
        )));
    }
    check_binding(
        subscription.payment.as_ref().map(|b| b.provider),
        provider,
        &subscription.id,
    )
}

fn check_binding(bound: Option<ProviderKind>, requested: ProviderKind, id: &str) -> Result<()> {
    match bound {
        Some(existing) if existing != requested => Err(CommerceError::precondition(format!(
            "{} is already bound to {}",
            id, existing
        ))),
        _ => Ok(()),
    }
}

fn log_applied(applied: &Applied, kind: EntityKind, id: &str, event: &NormalizedEvent) {
    match applied {
        Applied::Transitioned => tracing::info!(
            entity = ?kind,
            entity_id = id,
            provider = %event.provider,
            event = %event.kind,
            reference = %event.transaction_ref,
            "Payment event applied"
        ),
        Applied::Duplicate => tracing::info!(
            entity = ?kind,
            entity_id = id,
            provider = %event.provider,
            event = %event.kind,
            reference = %event.transaction_ref,
            "Payment event already applied"
        ),
        Applied::Anomaly(reason) => tracing::warn!(
            entity = ?kind,
            entity_id = id,
            provider = %event.provider,
            event = %event.kind,
            reference = %event.transaction_ref,
            "Payment event anomaly: {}",
            reason
        ),
    }
}

fn anomaly_detail(applied: &Applied) -> Option<String> {
    match applied {
        Applied::Anomaly(reason) => Some(reason.clone()),
        _ => None,
    }
}

fn order_settlement(order: &Order, applied: &Applied) -> Settlement {
    Settlement {
        entity: EntityRef {
            kind: EntityKind::Order,
            id: order.id.clone(),
        },
        result: applied.label(),
        detail: anomaly_detail(applied),
        status: order.status.to_string(),
        payment_status: order.payment_status,
    }
}

fn subscription_settlement(subscription: &Subscription, applied: &Applied) -> Settlement {
    Settlement {
        entity: EntityRef {
            kind: EntityKind::Subscription,
            id: subscription.id.clone(),
        },
        result: applied.label(),
        detail: anomaly_detail(applied),
        status: subscription.status.to_string(),
        payment_status: subscription.payment_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::ConfirmationResult;
    use crate::domain::order::PlanType;
    use crate::domain::package::fixtures::{package, priced};
    use crate::domain::provider::ProviderBinding;
    use crate::domain::submission::SubmissionFile;
    use crate::infrastructure::in_memory;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FixedRate(Decimal);

    #[async_trait]
    impl ExchangeRates for FixedRate {
        async fn rate(&self, _from: &Currency, _to: &Currency) -> Result<Decimal> {
            Ok(self.0)
        }
    }

    struct FailingRates;

    #[async_trait]
    impl ExchangeRates for FailingRates {
        async fn rate(&self, _from: &Currency, _to: &Currency) -> Result<Decimal> {
            Err(CommerceError::provider("rate service unavailable"))
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Notification>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn notify(&self, notification: &Notification) -> Result<()> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    /// Single-phase provider that settles in USD and records what it was asked.
    #[derive(Default)]
    struct Scripted {
        initiated: Mutex<Vec<PaymentRequest>>,
        disabled: Mutex<Vec<RecurringLink>>,
    }

    #[async_trait]
    impl crate::domain::ports::PaymentProvider for Scripted {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Paystack
        }

        fn settlement_currency(&self) -> Currency {
            Currency::new("USD").unwrap()
        }

        async fn initiate(&self, request: &PaymentRequest) -> Result<ProviderSession> {
            let mut initiated = self.initiated.lock().unwrap();
            initiated.push(request.clone());
            Ok(ProviderSession {
                binding: ProviderBinding::new(ProviderKind::Paystack, format!("ref_{}", initiated.len())),
                redirect_url: Some("https://checkout.example.com".to_string()),
                raw: serde_json::Value::Null,
            })
        }

        async fn confirm(&self, callback: &Callback) -> Result<ConfirmationResult> {
            Ok(ConfirmationResult::captured(ProviderKind::Paystack, callback.reference()))
        }

        async fn decode_webhook(&self, payload: &[u8], _headers: &WebhookHeaders) -> Result<WebhookEvent> {
            if payload == b"forged" {
                return Err(CommerceError::signature("bad signature"));
            }
            let reference = String::from_utf8_lossy(payload).to_string();
            Ok(WebhookEvent::Payment(ConfirmationResult::captured(ProviderKind::Paystack, reference)))
        }

        async fn disable_recurring(&self, link: &RecurringLink) -> Result<()> {
            self.disabled.lock().unwrap().push(link.clone());
            Err(CommerceError::provider("provider down"))
        }
    }

    fn engine_with(rates: Arc<dyn ExchangeRates>) -> (CommerceEngine, Arc<Scripted>, Arc<Outbox>) {
        let provider = Arc::new(Scripted::default());
        let outbox = Arc::new(Outbox::default());
        let engine = CommerceEngine::new(
            in_memory::stores(),
            rates,
            outbox.clone(),
            Currency::new("KES").unwrap(),
        )
        .with_provider(provider.clone());
        (engine, provider, outbox)
    }

    fn engine() -> (CommerceEngine, Arc<Scripted>, Arc<Outbox>) {
        engine_with(Arc::new(FixedRate(dec!(0.0077))))
    }

    fn checkout(plan_id: &str) -> OrderCheckout {
        OrderCheckout {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            phone: "+254700000000".to_string(),
            plan_id: plan_id.to_string(),
            price: None,
            description: "Landing page".to_string(),
            features: Vec::new(),
            file_urls: Vec::new(),
            links: Vec::new(),
        }
    }

    fn initiate(id: &str) -> InitiatePayment {
        InitiatePayment {
            kind: EntityKind::Order,
            entity_id: id.to_string(),
            amount: None,
        }
    }

    async fn seeded(engine: &CommerceEngine) {
        engine
            .seed(SeedData {
                packages: vec![priced("dev"), package("care", PlanType::Maintenance, Some(dec!(3000)))],
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_order_snapshots_package_price() {
        let (engine, _, outbox) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let admin = Requester::admin("admin_1");

        let order = engine.place_order(&client, checkout("dev")).await.unwrap();
        assert_eq!(order.price.value(), dec!(25000));
        assert_eq!(outbox.0.lock().unwrap().len(), 1);

        let patch = PackagePatch::from_json(serde_json::json!({ "price": 99 })).unwrap();
        engine.update_package(&admin, "dev", patch).await.unwrap();

        let stored = engine.get_order(&client, &order.id).await.unwrap();
        assert_eq!(stored.price.value(), dec!(25000));
    }

    #[tokio::test]
    async fn test_initiate_converts_and_binds_without_status_change() {
        let (engine, provider, _) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let order = engine.place_order(&client, checkout("dev")).await.unwrap();

        let session = engine
            .initiate_payment(&client, ProviderKind::Paystack, initiate(&order.id))
            .await
            .unwrap();
        assert_eq!(session.binding.reference, "ref_1");

        let request = provider.initiated.lock().unwrap()[0].clone();
        assert_eq!(request.amount.value(), dec!(192.50));
        assert_eq!(request.currency.code(), "USD");

        let stored = engine.get_order(&client, &order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.payment_status, PaymentStatus::Unpaid);
        assert_eq!(stored.payment, Some(session.binding));
    }

    #[tokio::test]
    async fn test_rate_failure_fails_closed() {
        let (engine, provider, _) = engine_with(Arc::new(FailingRates));
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let order = engine.place_order(&client, checkout("dev")).await.unwrap();

        let result = engine
            .initiate_payment(&client, ProviderKind::Paystack, initiate(&order.id))
            .await;
        assert!(matches!(result, Err(CommerceError::ProviderError(_))));
        assert!(provider.initiated.lock().unwrap().is_empty());
        assert!(engine.get_order(&client, &order.id).await.unwrap().payment.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_rejected() {
        let (engine, _, _) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let order = engine.place_order(&client, checkout("dev")).await.unwrap();
        let result = engine
            .initiate_payment(&client, ProviderKind::Stripe, initiate(&order.id))
            .await;
        assert!(matches!(result, Err(CommerceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_tampered_amount_is_rejected() {
        let (engine, _, _) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let order = engine.place_order(&client, checkout("dev")).await.unwrap();
        let mut body = initiate(&order.id);
        body.amount = Some(Price::new(dec!(1)).unwrap());
        let result = engine
            .initiate_payment(&client, ProviderKind::Paystack, body)
            .await;
        assert!(matches!(result, Err(CommerceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_webhook_and_verify_race_applies_once() {
        let (engine, _, outbox) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let order = engine.place_order(&client, checkout("dev")).await.unwrap();
        engine
            .initiate_payment(&client, ProviderKind::Paystack, initiate(&order.id))
            .await
            .unwrap();
        let sent_before = outbox.0.lock().unwrap().len();

        let ack = engine
            .handle_webhook(ProviderKind::Paystack, b"ref_1", &WebhookHeaders::new())
            .await
            .unwrap();
        assert_eq!(ack.settlement.unwrap().result, "applied");

        let settlement = engine
            .confirm(
                ProviderKind::Paystack,
                Callback::Verify {
                    reference: "ref_1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(settlement.result, "duplicate");
        assert!(settlement.is_paid());

        let stored = engine.get_order(&client, &order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Inprogress);
        assert_eq!(stored.payment_status, PaymentStatus::Captured);
        assert_eq!(outbox.0.lock().unwrap().len(), sent_before + 1);
    }

    #[tokio::test]
    async fn test_unmatched_webhook_is_acknowledged() {
        let (engine, _, _) = engine();
        let ack = engine
            .handle_webhook(ProviderKind::Paystack, b"nobody", &WebhookHeaders::new())
            .await
            .unwrap();
        assert!(ack.received);
        assert!(ack.settlement.is_none());
    }

    #[tokio::test]
    async fn test_forged_webhook_is_rejected() {
        let (engine, _, _) = engine();
        let result = engine
            .handle_webhook(ProviderKind::Paystack, b"forged", &WebhookHeaders::new())
            .await;
        assert!(matches!(result, Err(CommerceError::SignatureError(_))));
    }

    #[tokio::test]
    async fn test_completion_requires_delivered_files() {
        let (engine, _, _) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let admin = Requester::admin("admin_1");
        let order = engine.place_order(&client, checkout("dev")).await.unwrap();
        engine
            .initiate_payment(&client, ProviderKind::Paystack, initiate(&order.id))
            .await
            .unwrap();
        engine
            .apply_confirmation(ConfirmationResult::captured(ProviderKind::Paystack, "ref_1"))
            .await
            .unwrap();

        let complete = || OrderPatch::from_json(serde_json::json!({ "status": "completed" })).unwrap();
        assert!(matches!(
            engine.update_order(&admin, &order.id, complete()).await,
            Err(CommerceError::PreconditionError(_))
        ));

        engine
            .append_submission(
                &admin,
                SubmissionUpload {
                    order_id: order.id.clone(),
                    email: None,
                    files: vec![SubmissionFile {
                        file_id: "f1".to_string(),
                        file_url: "https://files.example.com/f1".to_string(),
                        filename: "site.zip".to_string(),
                        mime_type: "application/zip".to_string(),
                    }],
                },
            )
            .await
            .unwrap();
        let completed = engine.update_order(&admin, &order.id, complete()).await.unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);

        let accept = OrderPatch::from_json(serde_json::json!({ "status": "accepted" })).unwrap();
        let accepted = engine.update_order(&client, &order.id, accept).await.unwrap();
        assert_eq!(accepted.status, OrderStatus::Accepted);
        assert_eq!(accepted.payment_status, PaymentStatus::Captured);

        assert!(matches!(
            engine.delete_order(&admin, &order.id).await,
            Err(CommerceError::PreconditionError(_))
        ));
    }

    #[tokio::test]
    async fn test_client_cannot_deliver_files() {
        let (engine, _, _) = engine();
        let result = engine
            .append_submission(
                &Requester::client("user_1"),
                SubmissionUpload {
                    order_id: "o1".to_string(),
                    email: None,
                    files: Vec::new(),
                },
            )
            .await;
        assert!(matches!(result, Err(CommerceError::PreconditionError(_))));
    }

    #[tokio::test]
    async fn test_cancel_subscription_survives_disable_failure() {
        let (engine, provider, _) = engine();
        seeded(&engine).await;
        let client = Requester::client("user_1");
        let subscription = engine
            .place_subscription(
                &client,
                SubscriptionCheckout {
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                    phone: "+254700000000".to_string(),
                    plan_id: "care".to_string(),
                    plan_name: crate::domain::subscription::PlanName::Basic,
                    interval: None,
                    price: None,
                    description: String::new(),
                    features: Vec::new(),
                    file_urls: Vec::new(),
                    links: Vec::new(),
                },
            )
            .await
            .unwrap();
        engine
            .initiate_payment(
                &client,
                ProviderKind::Paystack,
                InitiatePayment {
                    kind: EntityKind::Subscription,
                    entity_id: subscription.id.clone(),
                    amount: None,
                },
            )
            .await
            .unwrap();
        engine
            .apply_confirmation(ConfirmationResult::captured(ProviderKind::Paystack, "ref_1"))
            .await
            .unwrap();
        engine
            .apply_webhook_event(WebhookEvent::RecurringLinked {
                provider: ProviderKind::Paystack,
                customer_email: "ada@example.com".to_string(),
                subscription_code: "SUB_1".to_string(),
                email_token: Some("tok".to_string()),
            })
            .await
            .unwrap();

        let cancel = SubscriptionPatch::from_json(serde_json::json!({ "status": "cancelled" })).unwrap();
        let cancelled = engine
            .update_subscription(&client, &subscription.id, cancel)
            .await
            .unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(cancelled.end_date.is_some());
        assert_eq!(provider.disabled.lock().unwrap()[0].subscription_code, "SUB_1");

        engine.delete_subscription(&client, &subscription.id).await.unwrap();
    }
}
