//! Subscription Registry - one store subscription per resolved field
//!
//! ```text
//! binding A ─┐                 ┌──────────────────────────┐
//!            ├─ acquire(E2.Status) ─▶ Entry { listeners: 2, │──▶ store.subscribe (once)
//! binding B ─┘                 │   last sample, epoch }   │
//!                              └──────────────────────────┘
//! ```
//!
//! - The first consumer of an address opens the store subscription and
//!   performs the initial read; later consumers get the cached sample.
//! - The last release tears the entry down and unsubscribes.
//! - A failed store subscribe leaves the entry `Failed`; the next acquire of
//!   that address opens it again.
//! - Samples that are not strictly newer than the cached one are dropped.
//!
//! All map mutations happen inside one `parking_lot` critical section. The
//! lock is never held across an `.await` or while listeners run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::{BindError, Result};
use crate::event::{EventEmitter, EventKind};
use crate::store::{
    FieldAddress, FieldSample, Notification, NotificationSink, StoreAdapter, StoreSubscription,
};

/// Identifies one consumer (a binding's dependency slot) of an entry
pub type ConsumerId = u64;

/// Receives every accepted sample of an acquired address
pub trait SubscriptionListener: Send + Sync {
    fn on_sample(&self, address: &FieldAddress, sample: &FieldSample);
}

impl<F> SubscriptionListener for F
where
    F: Fn(&FieldAddress, &FieldSample) + Send + Sync,
{
    fn on_sample(&self, address: &FieldAddress, sample: &FieldSample) {
        self(address, sample)
    }
}

/// Proof of one acquire; give it back with [`SubscriptionRegistry::release`]
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    address: FieldAddress,
    consumer: ConsumerId,
}

impl Lease {
    pub fn address(&self) -> &FieldAddress {
        &self.address
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }
}

/// Counters since the registry was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Store subscriptions opened
    pub subscribes: u64,
    /// Store subscriptions closed
    pub unsubscribes: u64,
    /// Samples accepted and fanned out
    pub delivered: u64,
    /// Samples dropped for not being strictly newer
    pub stale_dropped: u64,
    /// Samples that arrived for a torn-down entry
    pub dropped_after_teardown: u64,
}

type Listener = Arc<dyn SubscriptionListener>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenState {
    /// Subscribe in flight
    Opening,
    Open,
    /// Subscribe failed; no store subscription exists
    Failed,
}

struct Entry {
    epoch: u64,
    listeners: Vec<(ConsumerId, Listener)>,
    last: Option<FieldSample>,
    handle: Option<Box<dyn StoreSubscription>>,
    torn_down: Arc<AtomicBool>,
    open: OpenState,
}

#[derive(Default)]
struct RegistryState {
    entries: FxHashMap<FieldAddress, Entry>,
    next_epoch: u64,
    next_consumer: ConsumerId,
    shut_down: bool,
    stats: RegistryStats,
}

enum Acquired {
    Existing(Option<FieldSample>),
    /// New entry, or a failed one being opened again
    Open { epoch: u64, torn_down: Arc<AtomicBool> },
}

/// Refcounted, deduplicated map from field address to live subscription
pub struct SubscriptionRegistry {
    store: Arc<dyn StoreAdapter>,
    emitter: Arc<dyn EventEmitter>,
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn StoreAdapter>, emitter: Arc<dyn EventEmitter>) -> Arc<Self> {
        Arc::new(Self {
            store,
            emitter,
            state: Mutex::new(RegistryState::default()),
        })
    }

    /// Register `listener` on `address`
    ///
    /// An existing entry hands its cached sample to the new listener before
    /// returning. A new entry subscribes to the store, then delivers the
    /// initial read to every listener registered so far.
    pub async fn acquire(
        self: &Arc<Self>,
        address: FieldAddress,
        listener: Listener,
    ) -> Result<Lease> {
        let (consumer, acquired) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.shut_down {
                return Err(BindError::RegistryShutDown);
            }

            let consumer = state.next_consumer;
            state.next_consumer += 1;

            let acquired = match state.entries.get_mut(&address) {
                Some(entry) => {
                    entry.listeners.push((consumer, Arc::clone(&listener)));
                    if entry.open == OpenState::Failed {
                        entry.open = OpenState::Opening;
                        Acquired::Open {
                            epoch: entry.epoch,
                            torn_down: Arc::clone(&entry.torn_down),
                        }
                    } else {
                        Acquired::Existing(entry.last.clone())
                    }
                }
                None => {
                    let epoch = state.next_epoch;
                    state.next_epoch += 1;
                    let torn_down = Arc::new(AtomicBool::new(false));
                    state.entries.insert(
                        address.clone(),
                        Entry {
                            epoch,
                            listeners: vec![(consumer, Arc::clone(&listener))],
                            last: None,
                            handle: None,
                            torn_down: Arc::clone(&torn_down),
                            open: OpenState::Opening,
                        },
                    );
                    Acquired::Open { epoch, torn_down }
                }
            };
            (consumer, acquired)
        };

        match acquired {
            Acquired::Existing(Some(sample)) => listener.on_sample(&address, &sample),
            Acquired::Existing(None) => {}
            Acquired::Open { epoch, torn_down } => self.open(&address, epoch, torn_down).await,
        }

        Ok(Lease { address, consumer })
    }

    /// Subscribe and perform the initial read for an entry in `Opening`
    async fn open(self: &Arc<Self>, address: &FieldAddress, epoch: u64, torn_down: Arc<AtomicBool>) {
        let sink = self.sink_for(address, epoch, Arc::clone(&torn_down));

        let handle = match self.store.subscribe(address, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(target_field = %address, error = %e, "store subscribe failed, field stays unresolved until acquired again");
                let mut state = self.state.lock();
                if let Some(entry) = state.entries.get_mut(address) {
                    if entry.epoch == epoch {
                        entry.open = OpenState::Failed;
                    }
                }
                return;
            }
        };

        let orphan = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.stats.subscribes += 1;
            match state.entries.get_mut(address) {
                Some(entry) if entry.epoch == epoch && !torn_down.load(Ordering::Acquire) => {
                    entry.handle = Some(handle);
                    entry.open = OpenState::Open;
                    None
                }
                _ => {
                    state.stats.unsubscribes += 1;
                    Some(handle)
                }
            }
        };

        if let Some(handle) = orphan {
            debug!(target_field = %address, "entry released while subscribing, closing");
            if let Err(e) = handle.unsubscribe().await {
                warn!(target_field = %address, error = %e, "unsubscribe failed");
            }
            return;
        }

        self.emitter.emit(EventKind::SubscriptionOpened {
            target: address.to_string(),
        });

        match self.store.read(address).await {
            Ok(Some(sample)) => self.apply(address, epoch, sample),
            Ok(None) => debug!(target_field = %address, "field has no value yet"),
            Err(e) => {
                warn!(target_field = %address, error = %e, "initial read failed, field stays unresolved")
            }
        }
    }

    fn sink_for(
        self: &Arc<Self>,
        address: &FieldAddress,
        epoch: u64,
        torn_down: Arc<AtomicBool>,
    ) -> NotificationSink {
        let registry: Weak<Self> = Arc::downgrade(self);
        let address = address.clone();
        Arc::new(move |notification: Notification| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if torn_down.load(Ordering::Acquire) {
                registry.state.lock().stats.dropped_after_teardown += 1;
                return;
            }
            registry.apply(&address, epoch, notification.current);
        })
    }

    /// Accept a sample if it is strictly newer, then fan out in registration order
    fn apply(&self, address: &FieldAddress, epoch: u64, sample: FieldSample) {
        let stale_against;
        let listeners: SmallVec<[Listener; 4]> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = match state.entries.get_mut(address) {
                Some(entry) if entry.epoch == epoch && !entry.torn_down.load(Ordering::Acquire) => {
                    entry
                }
                _ => {
                    state.stats.dropped_after_teardown += 1;
                    return;
                }
            };

            stale_against = entry
                .last
                .as_ref()
                .map(|last| last.timestamp_ms)
                .filter(|&last| sample.timestamp_ms <= last);

            if stale_against.is_some() {
                state.stats.stale_dropped += 1;
                SmallVec::new()
            } else {
                entry.last = Some(sample.clone());
                state.stats.delivered += 1;
                entry
                    .listeners
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect()
            }
        };

        if let Some(last_timestamp_ms) = stale_against {
            debug!(target_field = %address, timestamp = sample.timestamp_ms, last_timestamp_ms, "dropping stale notification");
            self.emitter.emit(EventKind::StaleNotificationDropped {
                target: address.to_string(),
                timestamp_ms: sample.timestamp_ms,
                last_timestamp_ms,
            });
            return;
        }

        for listener in listeners {
            listener.on_sample(address, &sample);
        }
    }

    /// Return a lease; the last release unsubscribes from the store
    pub async fn release(&self, lease: Lease) {
        let handle = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(&lease.address) else {
                return;
            };

            let before = entry.listeners.len();
            entry.listeners.retain(|(id, _)| *id != lease.consumer);
            if entry.listeners.len() == before || !entry.listeners.is_empty() {
                return;
            }

            entry.torn_down.store(true, Ordering::Release);
            let handle = state
                .entries
                .remove(&lease.address)
                .and_then(|entry| entry.handle);
            if handle.is_some() {
                state.stats.unsubscribes += 1;
            }
            handle
        };

        let Some(handle) = handle else {
            // subscribe still in flight; `open` closes the orphaned handle
            return;
        };

        self.emitter.emit(EventKind::SubscriptionClosed {
            target: lease.address.to_string(),
        });
        if let Err(e) = handle.unsubscribe().await {
            warn!(target_field = %lease.address, error = %e, "unsubscribe failed");
        }
    }

    /// Tear down every entry and reject later acquires
    pub async fn shutdown(&self) {
        let drained: Vec<(FieldAddress, Option<Box<dyn StoreSubscription>>)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.shut_down = true;
            let drained: Vec<_> = state
                .entries
                .drain()
                .map(|(address, entry)| {
                    entry.torn_down.store(true, Ordering::Release);
                    (address, entry.handle)
                })
                .collect();
            state.stats.unsubscribes += drained.iter().filter(|(_, h)| h.is_some()).count() as u64;
            drained
        };

        for (address, handle) in drained {
            let Some(handle) = handle else { continue };
            self.emitter.emit(EventKind::SubscriptionClosed {
                target: address.to_string(),
            });
            if let Err(e) = handle.unsubscribe().await {
                warn!(target_field = %address, error = %e, "unsubscribe failed during shutdown");
            }
        }
    }

    /// Number of consumers sharing `address` (0 when not subscribed)
    pub fn refcount(&self, address: &FieldAddress) -> usize {
        self.state
            .lock()
            .entries
            .get(address)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Last accepted sample for `address`
    pub fn last_sample(&self, address: &FieldAddress) -> Option<FieldSample> {
        self.state
            .lock()
            .entries
            .get(address)
            .and_then(|entry| entry.last.clone())
    }

    /// Number of live entries
    pub fn live_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn stats(&self) -> RegistryStats {
        self.state.lock().stats
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("live", &state.entries.len())
            .field("stats", &state.stats)
            .finish()
    }
}
