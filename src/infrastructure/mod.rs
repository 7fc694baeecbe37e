//! Adapters behind the domain ports: entity stores, payment providers,
//! exchange rates and notifications.

pub mod exchange;
pub mod in_memory;
pub mod notifier;
pub mod providers;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
