//! Reconciliation engine.
//!
//! Pure functions of `(current snapshot, normalized event, now)` to
//! `(next snapshot, outcome, side effects)`. They hold no state and perform no
//! I/O, so they can run concurrently for different entities and repeatedly
//! for the same event.
//!
//! The first terminal payment outcome applied to an entity wins. Later events
//! that disagree with it are reported as anomalies and leave the snapshot
//! untouched; undoing a captured payment takes an explicit refund.

use crate::domain::event::{EventKind, NormalizedEvent};
use crate::domain::lifecycle::{self, Actor};
use crate::domain::order::{Order, OrderStatus, PaymentStatus};
use crate::domain::ports::Notification;
use crate::domain::provider::{ProviderKind, RecurringLink};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::error::{CommerceError, Result};
use chrono::{DateTime, Utc};

/// What happened to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// State moved forward.
    Transitioned,
    /// The event was already reflected in the snapshot.
    Duplicate,
    /// Stale or conflicting event; nothing changed.
    Anomaly(String),
}

impl Applied {
    pub fn label(&self) -> &'static str {
        match self {
            Applied::Transitioned => "applied",
            Applied::Duplicate => "duplicate",
            Applied::Anomaly(_) => "anomaly",
        }
    }
}

/// Side effects to run after the snapshot is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify(Notification),
    /// Client accepted delivered work; funds may be released to the seller.
    ReleaseFunds { order_id: String },
    DisableRecurring(RecurringLink),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<T> {
    pub next: T,
    pub applied: Applied,
    pub effects: Vec<Effect>,
}

impl<T: Clone> Reconciled<T> {
    fn unchanged(current: &T, applied: Applied) -> Self {
        Self {
            next: current.clone(),
            applied,
            effects: Vec::new(),
        }
    }

    fn anomaly(current: &T, reason: String) -> Self {
        Self::unchanged(current, Applied::Anomaly(reason))
    }

    pub fn changed(&self) -> bool {
        self.applied == Applied::Transitioned
    }
}

/// The order already holds a terminal outcome for this transaction, so
/// asking the provider again could only repeat a charge or return a duplicate.
pub fn order_settled(current: &Order, provider: ProviderKind, reference: &str) -> bool {
    current
        .payment
        .as_ref()
        .is_some_and(|b| b.matches(provider, reference))
        && (current.payment_status == PaymentStatus::Captured
            || current.status == OrderStatus::Failed)
}

pub fn subscription_settled(current: &Subscription, provider: ProviderKind, reference: &str) -> bool {
    let failed_here = current.status == SubscriptionStatus::PaymentFailed
        && current.last_payment_ref.as_deref() == Some(reference);
    current
        .payment
        .as_ref()
        .is_some_and(|b| b.matches(provider, reference))
        && (current.has_paid(reference) || failed_here)
}

pub fn reconcile_order(
    current: &Order,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<Reconciled<Order>> {
    match current.payment.as_ref() {
        Some(binding) if binding.matches(event.provider, &event.transaction_ref) => {}
        _ => {
            return Ok(Reconciled::anomaly(
                current,
                format!(
                    "order {} is not bound to {} transaction {}",
                    current.id, event.provider, event.transaction_ref
                ),
            ));
        }
    }

    let status = current.status;
    let payment = current.payment_status;

    match event.kind {
        EventKind::PaymentAuthorized => match (status, payment) {
            (OrderStatus::Pending, PaymentStatus::Unpaid) => {
                let mut next = current.clone();
                next.payment_status = PaymentStatus::Authorized;
                next.touch(now);
                Ok(Reconciled {
                    next,
                    applied: Applied::Transitioned,
                    effects: Vec::new(),
                })
            }
            (_, PaymentStatus::Authorized | PaymentStatus::Captured) => {
                Ok(Reconciled::unchanged(current, Applied::Duplicate))
            }
            _ => Ok(Reconciled::anomaly(
                current,
                format!(
                    "authorization for order {} arrived while {}/{}",
                    current.id, status, payment
                ),
            )),
        },
        EventKind::PaymentSucceeded => match (status, payment) {
            (OrderStatus::Pending, PaymentStatus::Unpaid) if event.two_phase => {
                Ok(Reconciled::anomaly(
                    current,
                    format!("capture for order {} before any authorization", current.id),
                ))
            }
            (OrderStatus::Pending, PaymentStatus::Unpaid | PaymentStatus::Authorized) => {
                if let Err(e) = lifecycle::check_order_transition(
                    current,
                    Actor::System,
                    OrderStatus::Inprogress,
                    0,
                ) {
                    return Ok(Reconciled::anomaly(current, e.to_string()));
                }
                let mut next = current.clone();
                next.status = OrderStatus::Inprogress;
                next.payment_status = PaymentStatus::Captured;
                next.touch(now);
                let effects = vec![Effect::Notify(Notification {
                    subject: format!("Payment received: order {}", current.id),
                    body: format!(
                        "{} paid {} for {} via {} (ref {}).",
                        current.contact.name,
                        current.price,
                        current.plan_title,
                        event.provider,
                        event.transaction_ref
                    ),
                })];
                Ok(Reconciled {
                    next,
                    applied: Applied::Transitioned,
                    effects,
                })
            }
            (
                OrderStatus::Inprogress | OrderStatus::Completed | OrderStatus::Accepted,
                PaymentStatus::Captured,
            ) => Ok(Reconciled::unchanged(current, Applied::Duplicate)),
            (OrderStatus::Cancelled, _) => {
                let reason = format!(
                    "order {} was cancelled before {} reported a successful payment",
                    current.id, event.provider
                );
                let mut reconciled = Reconciled::anomaly(current, reason.clone());
                reconciled.effects.push(Effect::Notify(Notification {
                    subject: format!("Manual review: order {}", current.id),
                    body: format!("{} (ref {}). A refund may be due.", reason, event.transaction_ref),
                }));
                Ok(reconciled)
            }
            _ => Ok(Reconciled::anomaly(
                current,
                format!(
                    "successful payment for order {} conflicts with {}/{}",
                    current.id, status, payment
                ),
            )),
        },
        EventKind::PaymentFailed => match (status, payment) {
            (OrderStatus::Pending, PaymentStatus::Unpaid) => {
                let mut next = current.clone();
                next.status = OrderStatus::Failed;
                next.payment_status = PaymentStatus::Unpaid;
                next.touch(now);
                Ok(Reconciled {
                    next,
                    applied: Applied::Transitioned,
                    effects: Vec::new(),
                })
            }
            (OrderStatus::Failed, _) => Ok(Reconciled::unchanged(current, Applied::Duplicate)),
            _ => Ok(Reconciled::anomaly(
                current,
                format!(
                    "failed payment for order {} conflicts with {}/{}",
                    current.id, status, payment
                ),
            )),
        },
        other => Err(CommerceError::validation(format!(
            "{} does not apply to orders",
            other
        ))),
    }
}

pub fn reconcile_subscription(
    current: &Subscription,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<Reconciled<Subscription>> {
    let same_payment = current.last_payment_ref.as_deref() == Some(event.transaction_ref.as_str());
    let already_paid = current.has_paid(&event.transaction_ref);
    let status = current.status;

    match event.kind {
        EventKind::SubscriptionActivated => {
            let bound = current
                .payment
                .as_ref()
                .is_some_and(|b| b.matches(event.provider, &event.transaction_ref));
            if !bound {
                return Ok(Reconciled::anomaly(
                    current,
                    format!(
                        "subscription {} is not bound to {} transaction {}",
                        current.id, event.provider, event.transaction_ref
                    ),
                ));
            }
            match status {
                _ if already_paid => Ok(Reconciled::unchanged(current, Applied::Duplicate)),
                SubscriptionStatus::Active | SubscriptionStatus::Paused if same_payment => {
                    Ok(Reconciled::unchanged(current, Applied::Duplicate))
                }
                SubscriptionStatus::PaymentFailed if same_payment => Ok(Reconciled::anomaly(
                    current,
                    format!(
                        "activation for subscription {} conflicts with the recorded failure of {}",
                        current.id, event.transaction_ref
                    ),
                )),
                SubscriptionStatus::Pending | SubscriptionStatus::PaymentFailed => {
                    activate(current, event, now)
                }
                _ => Ok(Reconciled::anomaly(
                    current,
                    format!(
                        "activation for subscription {} arrived while {}",
                        current.id, status
                    ),
                )),
            }
        }
        // Any invoice paid before, including one older than the latest, is a
        // replay and must not advance the billing date again.
        EventKind::SubscriptionRenewed => match status {
            _ if already_paid => Ok(Reconciled::unchanged(current, Applied::Duplicate)),
            SubscriptionStatus::Active => {
                let mut next = current.clone();
                next.next_billing_date = current.interval.advance(current.next_billing_date)?;
                next.payment_status = PaymentStatus::Captured;
                next.record_payment(&event.transaction_ref);
                next.touch(now);
                Ok(Reconciled {
                    next,
                    applied: Applied::Transitioned,
                    effects: Vec::new(),
                })
            }
            SubscriptionStatus::PaymentFailed => activate(current, event, now),
            _ => Ok(Reconciled::anomaly(
                current,
                format!(
                    "renewal for subscription {} arrived while {}",
                    current.id, status
                ),
            )),
        },
        EventKind::SubscriptionPaymentFailed => match status {
            SubscriptionStatus::PaymentFailed => {
                Ok(Reconciled::unchanged(current, Applied::Duplicate))
            }
            _ if already_paid => Ok(Reconciled::anomaly(
                current,
                format!(
                    "failure for subscription {} conflicts with the captured payment {}",
                    current.id, event.transaction_ref
                ),
            )),
            SubscriptionStatus::Pending | SubscriptionStatus::Active => {
                if let Err(e) = lifecycle::check_subscription_transition(
                    current,
                    Actor::System,
                    SubscriptionStatus::PaymentFailed,
                ) {
                    return Ok(Reconciled::anomaly(current, e.to_string()));
                }
                let mut next = current.clone();
                next.status = SubscriptionStatus::PaymentFailed;
                next.last_payment_ref = Some(event.transaction_ref.clone());
                next.touch(now);
                let effects = vec![Effect::Notify(Notification {
                    subject: format!("Payment failed: subscription {}", current.id),
                    body: format!(
                        "The {} payment for {} ({}) failed via {} (ref {}). Manual recovery required.",
                        current.interval,
                        current.plan_title,
                        current.contact.email,
                        event.provider,
                        event.transaction_ref
                    ),
                })];
                Ok(Reconciled {
                    next,
                    applied: Applied::Transitioned,
                    effects,
                })
            }
            _ => Ok(Reconciled::anomaly(
                current,
                format!(
                    "payment failure for subscription {} arrived while {}",
                    current.id, status
                ),
            )),
        },
        other => Err(CommerceError::validation(format!(
            "{} does not apply to subscriptions",
            other
        ))),
    }
}

fn activate(
    current: &Subscription,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Result<Reconciled<Subscription>> {
    if let Err(e) =
        lifecycle::check_subscription_transition(current, Actor::System, SubscriptionStatus::Active)
    {
        return Ok(Reconciled::anomaly(current, e.to_string()));
    }
    let mut next = current.clone();
    if current.status == SubscriptionStatus::Pending {
        next.start_date = now;
    }
    next.status = SubscriptionStatus::Active;
    next.payment_status = PaymentStatus::Captured;
    next.next_billing_date = current.interval.advance(now)?;
    next.record_payment(&event.transaction_ref);
    next.touch(now);
    let effects = vec![Effect::Notify(Notification {
        subject: format!("Subscription active: {}", current.id),
        body: format!(
            "{} ({}) is now active on {}. Next billing date: {}.",
            current.contact.name,
            current.contact.email,
            current.plan_name.as_str(),
            next.next_billing_date.format("%Y-%m-%d")
        ),
    })];
    Ok(Reconciled {
        next,
        applied: Applied::Transitioned,
        effects,
    })
}
