use crate::application::engine::Stores;
use crate::domain::order::Order;
use crate::domain::package::Package;
use crate::domain::ports::{OrderStore, PackageStore, SubmissionStore, SubscriptionStore};
use crate::domain::provider::ProviderKind;
use crate::domain::submission::Submission;
use crate::domain::subscription::Subscription;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory order store.
///
/// `Clone` shares the underlying map, so several handles observe the same
/// records. Used by tests and by the service when no `--db-path` is given.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn store(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(id).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|o| o.payment.as_ref().is_some_and(|b| b.matches(provider, reference)))
            .cloned())
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut list: Vec<Order> = orders
            .values()
            .filter(|o| user_id.is_none_or(|u| o.is_owned_by(u)))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut orders = self.orders.write().await;
        Ok(orders.remove(id).is_some())
    }
}

#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn store(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.id.clone(), subscription);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(id).cloned())
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .find(|s| s.payment.as_ref().is_some_and(|b| b.matches(provider, reference)))
            .cloned())
    }

    async fn find_by_recurring_code(
        &self,
        provider: ProviderKind,
        subscription_code: &str,
    ) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .find(|s| {
                s.recurring
                    .as_ref()
                    .is_some_and(|r| r.provider == provider && r.subscription_code == subscription_code)
            })
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.contact.email.eq_ignore_ascii_case(email.trim()))
            .cloned()
            .collect())
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut list: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| user_id.is_none_or(|u| s.is_owned_by(u)))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        Ok(subscriptions.remove(id).is_some())
    }
}

#[derive(Default, Clone)]
pub struct InMemorySubmissionStore {
    submissions: Arc<RwLock<HashMap<String, Submission>>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn store(&self, submission: Submission) -> Result<()> {
        let mut submissions = self.submissions.write().await;
        submissions.insert(submission.order_id.clone(), submission);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Submission>> {
        let submissions = self.submissions.read().await;
        Ok(submissions.get(order_id).cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPackageStore {
    packages: Arc<RwLock<HashMap<String, Package>>>,
}

impl InMemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PackageStore for InMemoryPackageStore {
    async fn store(&self, package: Package) -> Result<()> {
        let mut packages = self.packages.write().await;
        packages.insert(package.id.clone(), package);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Package>> {
        let packages = self.packages.read().await;
        Ok(packages.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Package>> {
        let packages = self.packages.read().await;
        let mut list: Vec<Package> = packages.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut packages = self.packages.write().await;
        Ok(packages.remove(id).is_some())
    }
}

/// Fresh, empty in-memory stores for every entity.
pub fn stores() -> Stores {
    Stores {
        orders: Box::new(InMemoryOrderStore::new()),
        subscriptions: Box::new(InMemorySubscriptionStore::new()),
        submissions: Box::new(InMemorySubmissionStore::new()),
        packages: Box::new(InMemoryPackageStore::new()),
    }
}
