use crate::application::engine::Stores;
use crate::domain::order::Order;
use crate::domain::package::Package;
use crate::domain::ports::{OrderStore, PackageStore, SubmissionStore, SubscriptionStore};
use crate::domain::provider::{ProviderKind, index_key};
use crate::domain::submission::Submission;
use crate::domain::subscription::Subscription;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

pub const CF_ORDERS: &str = "orders";
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
pub const CF_SUBMISSIONS: &str = "submissions";
pub const CF_PACKAGES: &str = "packages";
/// `provider:reference` to the owning entity id, for webhook lookups.
pub const CF_ORDER_REFS: &str = "order_refs";
pub const CF_SUBSCRIPTION_REFS: &str = "subscription_refs";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_ORDERS,
    CF_SUBSCRIPTIONS,
    CF_SUBMISSIONS,
    CF_PACKAGES,
    CF_ORDER_REFS,
    CF_SUBSCRIPTION_REFS,
];

/// A persistent store implementation using RocksDB.
///
/// Every entity type lives in its own column family, keyed by id, with
/// serde_json values. Provider references are indexed in separate column
/// families; index hits are re-checked against the entity's current binding,
/// so a stale index entry left behind by a re-initiated payment never
/// resolves to the wrong entity.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column
    /// families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// The same handle behind every store port.
    pub fn stores(&self) -> Stores {
        Stores {
            orders: Box::new(self.clone()),
            subscriptions: Box::new(self.clone()),
            submissions: Box::new(self.clone()),
            packages: Box::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            CommerceError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn delete_key(&self, cf: &str, key: &str) -> Result<bool> {
        let handle = self.cf(cf)?;
        let existed = self.db.get_pinned_cf(handle, key.as_bytes())?.is_some();
        if existed {
            self.db.delete_cf(handle, key.as_bytes())?;
        }
        Ok(existed)
    }

    fn lookup_ref(&self, index_cf: &str, provider: ProviderKind, reference: &str) -> Result<Option<String>> {
        let key = index_key(provider, reference);
        match self.db.get_pinned_cf(self.cf(index_cf)?, key.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    fn flush(&self) -> Result<()> {
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        self.db.flush_wal(true)?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn store(&self, order: Order) -> Result<()> {
        if let Some(binding) = &order.payment {
            self.db.put_cf(
                self.cf(CF_ORDER_REFS)?,
                binding.index_key().as_bytes(),
                order.id.as_bytes(),
            )?;
        }
        self.put_json(CF_ORDERS, &order.id, &order)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, id)
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Order>> {
        let Some(id) = self.lookup_ref(CF_ORDER_REFS, provider, reference)? else {
            return Ok(None);
        };
        let order: Option<Order> = self.get_json(CF_ORDERS, &id)?;
        Ok(order.filter(|o| o.payment.as_ref().is_some_and(|b| b.matches(provider, reference))))
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.scan_json(CF_ORDERS)?;
        orders.retain(|o| user_id.is_none_or(|u| o.is_owned_by(u)));
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if let Some(order) = self.get_json::<Order>(CF_ORDERS, id)?
            && let Some(binding) = &order.payment
        {
            self.delete_key(CF_ORDER_REFS, &binding.index_key())?;
        }
        self.delete_key(CF_ORDERS, id)
    }

    async fn close(&self) -> Result<()> {
        self.flush()
    }
}

#[async_trait]
impl SubscriptionStore for RocksDBStore {
    async fn store(&self, subscription: Subscription) -> Result<()> {
        if let Some(binding) = &subscription.payment {
            self.db.put_cf(
                self.cf(CF_SUBSCRIPTION_REFS)?,
                binding.index_key().as_bytes(),
                subscription.id.as_bytes(),
            )?;
        }
        self.put_json(CF_SUBSCRIPTIONS, &subscription.id, &subscription)
    }

    async fn get(&self, id: &str) -> Result<Option<Subscription>> {
        self.get_json(CF_SUBSCRIPTIONS, id)
    }

    async fn find_by_provider_ref(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> Result<Option<Subscription>> {
        let Some(id) = self.lookup_ref(CF_SUBSCRIPTION_REFS, provider, reference)? else {
            return Ok(None);
        };
        let subscription: Option<Subscription> = self.get_json(CF_SUBSCRIPTIONS, &id)?;
        Ok(subscription
            .filter(|s| s.payment.as_ref().is_some_and(|b| b.matches(provider, reference))))
    }

    async fn find_by_recurring_code(
        &self,
        provider: ProviderKind,
        subscription_code: &str,
    ) -> Result<Option<Subscription>> {
        let subscriptions: Vec<Subscription> = self.scan_json(CF_SUBSCRIPTIONS)?;
        Ok(subscriptions.into_iter().find(|s| {
            s.recurring
                .as_ref()
                .is_some_and(|r| r.provider == provider && r.subscription_code == subscription_code)
        }))
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self.scan_json(CF_SUBSCRIPTIONS)?;
        subscriptions.retain(|s| s.contact.email.eq_ignore_ascii_case(email.trim()));
        Ok(subscriptions)
    }

    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self.scan_json(CF_SUBSCRIPTIONS)?;
        subscriptions.retain(|s| user_id.is_none_or(|u| s.is_owned_by(u)));
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if let Some(subscription) = self.get_json::<Subscription>(CF_SUBSCRIPTIONS, id)?
            && let Some(binding) = &subscription.payment
        {
            self.delete_key(CF_SUBSCRIPTION_REFS, &binding.index_key())?;
        }
        self.delete_key(CF_SUBSCRIPTIONS, id)
    }

    async fn close(&self) -> Result<()> {
        self.flush()
    }
}

#[async_trait]
impl SubmissionStore for RocksDBStore {
    async fn store(&self, submission: Submission) -> Result<()> {
        self.put_json(CF_SUBMISSIONS, &submission.order_id, &submission)
    }

    async fn get(&self, order_id: &str) -> Result<Option<Submission>> {
        self.get_json(CF_SUBMISSIONS, order_id)
    }

    async fn close(&self) -> Result<()> {
        self.flush()
    }
}

#[async_trait]
impl PackageStore for RocksDBStore {
    async fn store(&self, package: Package) -> Result<()> {
        self.put_json(CF_PACKAGES, &package.id, &package)
    }

    async fn get(&self, id: &str) -> Result<Option<Package>> {
        self.get_json(CF_PACKAGES, id)
    }

    async fn list(&self) -> Result<Vec<Package>> {
        let mut packages: Vec<Package> = self.scan_json(CF_PACKAGES)?;
        packages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(packages)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.delete_key(CF_PACKAGES, id)
    }

    async fn close(&self) -> Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::fixtures::order;
    use crate::domain::provider::ProviderBinding;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_order_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let o = order("o1");

        OrderStore::store(&store, o.clone()).await.unwrap();
        assert_eq!(OrderStore::get(&store, "o1").await.unwrap(), Some(o));
        assert!(OrderStore::get(&store, "o2").await.unwrap().is_none());
        assert_eq!(OrderStore::list(&store, Some("user_1")).await.unwrap().len(), 1);
        assert!(OrderStore::list(&store, Some("user_2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebinding_invalidates_old_reference() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let mut o = order("o1");
        o.payment = Some(ProviderBinding::new(ProviderKind::Paystack, "ref_old"));
        OrderStore::store(&store, o.clone()).await.unwrap();

        o.payment = Some(ProviderBinding::new(ProviderKind::Paystack, "ref_new"));
        OrderStore::store(&store, o).await.unwrap();

        assert!(
            OrderStore::find_by_provider_ref(&store, ProviderKind::Paystack, "ref_old")
                .await
                .unwrap()
                .is_none()
        );
        let found = OrderStore::find_by_provider_ref(&store, ProviderKind::Paystack, "ref_new")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "o1");
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let submission = Submission::new("o1", "admin", chrono::Utc::now());
            SubmissionStore::store(&store, submission).await.unwrap();
            SubmissionStore::close(&store).await.unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert!(SubmissionStore::get(&store, "o1").await.unwrap().is_some());
    }
}
