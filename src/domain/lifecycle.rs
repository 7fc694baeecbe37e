//! Lifecycle guard: which actor may move an entity into which state.
//!
//! The tables are the single source of truth for status changes; every write
//! path consults them before persisting.

use super::order::{Order, OrderStatus};
use super::subscription::{Subscription, SubscriptionStatus};
use crate::error::CommerceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is asking for a transition.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// The customer that owns the record.
    Client,
    /// A member of the admin team.
    Admin,
    /// Payment reconciliation acting on a provider event.
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Actor::Client => "client",
            Actor::Admin => "admin",
            Actor::System => "system",
        };
        f.write_str(name)
    }
}

use Actor::{Admin, Client, System};

const ORDER_TRANSITIONS: &[(OrderStatus, Actor, OrderStatus)] = &[
    (OrderStatus::Pending, System, OrderStatus::Inprogress),
    (OrderStatus::Pending, System, OrderStatus::Failed),
    (OrderStatus::Pending, Client, OrderStatus::Cancelled),
    (OrderStatus::Pending, Admin, OrderStatus::Cancelled),
    (OrderStatus::Inprogress, Admin, OrderStatus::Completed),
    (OrderStatus::Completed, Client, OrderStatus::Accepted),
];

const SUBSCRIPTION_TRANSITIONS: &[(SubscriptionStatus, Actor, SubscriptionStatus)] = &[
    (SubscriptionStatus::Pending, System, SubscriptionStatus::Active),
    (SubscriptionStatus::Pending, System, SubscriptionStatus::PaymentFailed),
    (SubscriptionStatus::Pending, Client, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::Pending, Admin, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::Active, Client, SubscriptionStatus::Paused),
    (SubscriptionStatus::Active, Admin, SubscriptionStatus::Paused),
    (SubscriptionStatus::Active, Client, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::Active, Admin, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::Active, Admin, SubscriptionStatus::Expired),
    (SubscriptionStatus::Active, System, SubscriptionStatus::PaymentFailed),
    (SubscriptionStatus::Paused, Client, SubscriptionStatus::Active),
    (SubscriptionStatus::Paused, Admin, SubscriptionStatus::Active),
    (SubscriptionStatus::Paused, Client, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::Paused, Admin, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::PaymentFailed, System, SubscriptionStatus::Active),
    (SubscriptionStatus::PaymentFailed, Client, SubscriptionStatus::Cancelled),
    (SubscriptionStatus::PaymentFailed, Admin, SubscriptionStatus::Cancelled),
];

pub fn order_successors(current: OrderStatus, actor: Actor) -> Vec<OrderStatus> {
    ORDER_TRANSITIONS
        .iter()
        .filter(|(from, who, _)| *from == current && *who == actor)
        .map(|(_, _, to)| *to)
        .collect()
}

pub fn subscription_successors(current: SubscriptionStatus, actor: Actor) -> Vec<SubscriptionStatus> {
    SUBSCRIPTION_TRANSITIONS
        .iter()
        .filter(|(from, who, _)| *from == current && *who == actor)
        .map(|(_, _, to)| *to)
        .collect()
}

/// Validates an order status change.
///
/// `delivered_files` is the number of files recorded in the order's
/// submission; completion requires at least one.
pub fn check_order_transition(
    order: &Order,
    actor: Actor,
    target: OrderStatus,
    delivered_files: usize,
) -> Result<(), CommerceError> {
    if !order_successors(order.status, actor).contains(&target) {
        return Err(CommerceError::precondition(format!(
            "{} may not move order {} from {} to {}",
            actor, order.id, order.status, target
        )));
    }
    match target {
        OrderStatus::Completed if delivered_files == 0 => Err(CommerceError::precondition(
            format!("order {} has no delivered files", order.id),
        )),
        OrderStatus::Cancelled if order.payment_status.holds_funds() => {
            Err(CommerceError::precondition(format!(
                "order {} has a {} payment; void it before cancelling",
                order.id, order.payment_status
            )))
        }
        OrderStatus::Accepted if !order.payment_status.holds_funds() => {
            Err(CommerceError::precondition(format!(
                "order {} cannot be accepted with payment status {}",
                order.id, order.payment_status
            )))
        }
        _ => Ok(()),
    }
}

pub fn check_subscription_transition(
    subscription: &Subscription,
    actor: Actor,
    target: SubscriptionStatus,
) -> Result<(), CommerceError> {
    if !subscription_successors(subscription.status, actor).contains(&target) {
        return Err(CommerceError::precondition(format!(
            "{} may not move subscription {} from {} to {}",
            actor, subscription.id, subscription.status, target
        )));
    }
    if target == SubscriptionStatus::Active && subscription.payment.is_none() {
        return Err(CommerceError::precondition(format!(
            "subscription {} has no payment reference",
            subscription.id
        )));
    }
    Ok(())
}

pub fn check_order_deletion(order: &Order, actor: Actor) -> Result<(), CommerceError> {
    if actor == System {
        return Err(CommerceError::precondition("reconciliation never deletes orders"));
    }
    if order.payment_status.holds_funds() {
        return Err(CommerceError::precondition(format!(
            "order {} has a {} payment and cannot be deleted",
            order.id, order.payment_status
        )));
    }
    if order.status != OrderStatus::Cancelled {
        return Err(CommerceError::precondition(format!(
            "order {} is {}; only cancelled orders can be deleted",
            order.id, order.status
        )));
    }
    Ok(())
}

pub fn check_subscription_deletion(
    subscription: &Subscription,
    actor: Actor,
) -> Result<(), CommerceError> {
    if actor == System {
        return Err(CommerceError::precondition(
            "reconciliation never deletes subscriptions",
        ));
    }
    if !subscription.is_deletable() {
        return Err(CommerceError::precondition(format!(
            "subscription {} is {}; only cancelled or expired subscriptions can be deleted",
            subscription.id, subscription.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{PaymentStatus, fixtures::order};
    use crate::domain::provider::{ProviderBinding, ProviderKind};
    use crate::domain::subscription::{BillingInterval, fixtures::subscription};

    const ALL_ORDER: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Inprogress,
        OrderStatus::Completed,
        OrderStatus::Accepted,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
    ];

    const ALL_PAYMENT: [PaymentStatus; 5] = [
        PaymentStatus::Unpaid,
        PaymentStatus::Authorized,
        PaymentStatus::Captured,
        PaymentStatus::Voided,
        PaymentStatus::Refunded,
    ];

    #[test]
    fn test_client_can_cancel_pending_order() {
        let o = order("o1");
        assert!(check_order_transition(&o, Client, OrderStatus::Cancelled, 0).is_ok());
    }

    #[test]
    fn test_reserved_funds_block_cancellation() {
        let mut o = order("o1");
        o.payment_status = PaymentStatus::Authorized;
        assert!(matches!(
            check_order_transition(&o, Admin, OrderStatus::Cancelled, 0),
            Err(CommerceError::PreconditionError(_))
        ));
    }

    #[test]
    fn test_client_cannot_mark_order_paid() {
        let o = order("o1");
        assert!(matches!(
            check_order_transition(&o, Client, OrderStatus::Inprogress, 0),
            Err(CommerceError::PreconditionError(_))
        ));
    }

    #[test]
    fn test_completion_requires_delivery() {
        let mut o = order("o1");
        o.status = OrderStatus::Inprogress;
        o.payment_status = PaymentStatus::Captured;
        assert!(check_order_transition(&o, Admin, OrderStatus::Completed, 0).is_err());
        assert!(check_order_transition(&o, Admin, OrderStatus::Completed, 1).is_ok());
        assert!(check_order_transition(&o, Client, OrderStatus::Completed, 1).is_err());
    }

    #[test]
    fn test_accept_only_after_completion_with_held_funds() {
        let mut o = order("o1");
        o.status = OrderStatus::Inprogress;
        o.payment_status = PaymentStatus::Captured;
        assert!(check_order_transition(&o, Client, OrderStatus::Accepted, 1).is_err());

        o.status = OrderStatus::Completed;
        assert!(check_order_transition(&o, Client, OrderStatus::Accepted, 1).is_ok());
        assert!(check_order_transition(&o, Admin, OrderStatus::Accepted, 1).is_err());

        o.payment_status = PaymentStatus::Refunded;
        assert!(check_order_transition(&o, Client, OrderStatus::Accepted, 1).is_err());
    }

    #[test]
    fn test_terminal_order_states_have_no_successors() {
        for status in [OrderStatus::Failed, OrderStatus::Accepted, OrderStatus::Cancelled] {
            for actor in [Client, Admin, System] {
                assert!(order_successors(status, actor).is_empty());
            }
        }
    }

    #[test]
    fn test_deletion_blocked_whenever_funds_are_held() {
        for status in ALL_ORDER {
            for payment in ALL_PAYMENT {
                let mut o = order("o1");
                o.status = status;
                o.payment_status = payment;
                let result = check_order_deletion(&o, Client);
                if payment.holds_funds() {
                    assert!(matches!(result, Err(CommerceError::PreconditionError(_))));
                } else if status == OrderStatus::Cancelled {
                    assert!(result.is_ok());
                } else {
                    assert!(result.is_err());
                }
            }
        }
    }

    #[test]
    fn test_subscription_recovery_path() {
        let mut s = subscription("s1", BillingInterval::Monthly);
        s.payment = Some(ProviderBinding::new(ProviderKind::Paystack, "ref"));
        s.status = SubscriptionStatus::PaymentFailed;
        assert!(check_subscription_transition(&s, System, SubscriptionStatus::Active).is_ok());
        assert!(check_subscription_transition(&s, Client, SubscriptionStatus::Cancelled).is_ok());
        assert!(check_subscription_transition(&s, Client, SubscriptionStatus::Active).is_err());
    }

    #[test]
    fn test_activation_requires_payment_reference() {
        let s = subscription("s1", BillingInterval::Monthly);
        assert!(check_subscription_transition(&s, System, SubscriptionStatus::Active).is_err());
    }

    #[test]
    fn test_subscription_deletion() {
        let mut s = subscription("s1", BillingInterval::Yearly);
        assert!(check_subscription_deletion(&s, Client).is_err());
        s.status = SubscriptionStatus::Expired;
        assert!(check_subscription_deletion(&s, Client).is_ok());
        s.status = SubscriptionStatus::Cancelled;
        assert!(check_subscription_deletion(&s, Admin).is_ok());
        assert!(check_subscription_deletion(&s, System).is_err());
    }
}
