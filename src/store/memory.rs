//! MemoryStore - in-process entity store with DashMap
//!
//! Reference implementation of [`StoreAdapter`]: lock-free field storage,
//! monotonic write timestamps and synchronous notification fan-out. Used by
//! the CLI scenario runner and throughout the tests, so it also counts
//! subscribe/unsubscribe calls per address and can simulate an outage.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::{BindError, Result};

use super::adapter::{
    EntityId, FieldAddress, FieldId, FieldSample, Notification, NotificationSink, StoreAdapter,
    StoreSubscription,
};

/// Snapshot shape for seeding: entity → field → value
pub type StoreSnapshot = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
struct MemoryInner {
    fields: DashMap<FieldAddress, FieldSample>,
    sinks: DashMap<FieldAddress, Vec<(u64, NotificationSink)>>,
    subscribe_calls: DashMap<FieldAddress, usize>,
    unsubscribe_calls: DashMap<FieldAddress, usize>,
    clock: AtomicU64,
    next_sink: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryInner {
    fn check_available(&self, address: &FieldAddress) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(BindError::store_unavailable(
                &address.entity,
                &address.field,
                "store offline",
            ));
        }
        Ok(())
    }

    /// Clone the sinks out so no shard lock is held while they run
    fn sinks_for(&self, address: &FieldAddress) -> SmallVec<[NotificationSink; 4]> {
        self.sinks
            .get(address)
            .map(|entry| entry.iter().map(|(_, sink)| Arc::clone(sink)).collect())
            .unwrap_or_default()
    }
}

/// Thread-safe in-memory store (clone is shallow)
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from a snapshot
    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Self {
        let store = Self::new();
        store.seed_from(snapshot);
        store
    }

    /// Write every field of the snapshot (notifies existing subscribers)
    pub fn seed_from(&self, snapshot: &StoreSnapshot) {
        for (entity, fields) in snapshot {
            for (field, value) in fields {
                self.write(entity.as_str(), field.as_str(), value.clone());
            }
        }
    }

    /// Write a value with the next store timestamp and notify subscribers
    pub fn write(
        &self,
        entity: impl Into<EntityId>,
        field: impl Into<FieldId>,
        value: impl Into<Value>,
    ) -> FieldSample {
        let address = FieldAddress::new(entity, field);
        let timestamp_ms = self.inner.clock.fetch_add(1, Ordering::AcqRel) + 1;
        let sample = FieldSample::new(value, timestamp_ms);
        let previous = self.inner.fields.insert(address.clone(), sample.clone());

        let notification = Notification {
            current: sample.clone(),
            previous,
            context: None,
        };
        for sink in self.inner.sinks_for(&address) {
            sink(notification.clone());
        }
        sample
    }

    /// Push an arbitrary sample to subscribers without storing it
    ///
    /// Simulates out-of-order delivery from an asynchronous transport.
    pub fn deliver(&self, address: &FieldAddress, sample: FieldSample) {
        let notification = Notification::new(sample);
        for sink in self.inner.sinks_for(address) {
            sink(notification.clone());
        }
    }

    /// Current stored sample, bypassing the async contract
    pub fn get(&self, address: &FieldAddress) -> Option<FieldSample> {
        self.inner.fields.get(address).map(|s| s.value().clone())
    }

    /// Make every read/subscribe fail with `StoreUnavailable`
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::Release);
    }

    /// Number of `subscribe` calls made for `address`
    pub fn subscribe_count(&self, address: &FieldAddress) -> usize {
        self.inner
            .subscribe_calls
            .get(address)
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Number of `unsubscribe` calls made for `address`
    pub fn unsubscribe_count(&self, address: &FieldAddress) -> usize {
        self.inner
            .unsubscribe_calls
            .get(address)
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Number of sinks currently registered on `address`
    pub fn active_sinks(&self, address: &FieldAddress) -> usize {
        self.inner.sinks.get(address).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn read(&self, address: &FieldAddress) -> Result<Option<FieldSample>> {
        self.inner.check_available(address)?;
        Ok(self.get(address))
    }

    async fn subscribe(
        &self,
        address: &FieldAddress,
        sink: NotificationSink,
    ) -> Result<Box<dyn StoreSubscription>> {
        self.inner.check_available(address)?;

        let id = self.inner.next_sink.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sinks
            .entry(address.clone())
            .or_default()
            .push((id, sink));
        *self
            .inner
            .subscribe_calls
            .entry(address.clone())
            .or_insert(0) += 1;

        Ok(Box::new(MemorySubscription {
            store: Arc::downgrade(&self.inner),
            address: address.clone(),
            id,
        }))
    }
}

struct MemorySubscription {
    store: Weak<MemoryInner>,
    address: FieldAddress,
    id: u64,
}

#[async_trait]
impl StoreSubscription for MemorySubscription {
    async fn unsubscribe(&self) -> Result<()> {
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };
        if let Some(mut sinks) = store.sinks.get_mut(&self.address) {
            sinks.retain(|(id, _)| *id != self.id);
        }
        store.sinks.remove_if(&self.address, |_, sinks| sinks.is_empty());
        *store
            .unsubscribe_calls
            .entry(self.address.clone())
            .or_insert(0) += 1;
        Ok(())
    }
}
