//! Binding Runtime - lifecycle of one active binding
//!
//! ```text
//!            activate                   hop changed
//! Unbound ──────────▶ Resolving ──▶ Bound ─────────▶ Resolving ──▶ Bound
//!    ▲                                                              │
//!    └──────────────────────── deactivate ──────────────────────────┘
//! ```
//!
//! Each dependency of the binding owns a slot: its path, current
//! resolution, the leases it holds (every hop relation plus the target) and
//! the last value seen on the target. A slot's `generation` bumps on every
//! re-resolution; listeners carry the generation they were created for and
//! are ignored once it is stale.
//!
//! `state` guards the slots and is never held across an `.await` or a
//! callback. Changed outputs queue in `outbox`; whichever thread finds no
//! drainer running becomes the drainer and delivers them in order, so
//! callbacks for one binding never overlap or nest.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::BindError;
use crate::eval::{BindingProgram, BoundValue, DependencyValues};
use crate::event::{EventEmitter, EventKind};
use crate::lang::FieldPath;
use crate::registry::{Lease, SubscriptionListener, SubscriptionRegistry};
use crate::resolve::{PathResolver, Resolution};
use crate::store::{entity_ref, EntityId, FieldAddress, FieldSample};

use super::spec::BindingSpec;

/// Callback receiving every changed output of a binding
pub type ValueCallback = Arc<dyn Fn(BoundValue) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingPhase {
    Unbound,
    Resolving,
    Bound,
}

struct DependencySlot {
    path: FieldPath,
    generation: u64,
    resolution: Resolution,
    leases: Vec<Lease>,
    value: BoundValue,
    /// Timestamp of the sample behind `value`
    stamp: Option<u64>,
}

impl DependencySlot {
    fn new(path: FieldPath) -> Self {
        Self {
            path,
            generation: 0,
            resolution: Resolution::default(),
            leases: Vec::new(),
            value: BoundValue::Unresolved,
            stamp: None,
        }
    }
}

struct RuntimeState {
    phase: BindingPhase,
    active: bool,
    /// Set once every slot has been bound
    ready: bool,
    /// Re-resolutions in flight
    pending: usize,
    slots: Vec<DependencySlot>,
    last_output: Option<BoundValue>,
    error: bool,
    last_evaluated_ms: Option<u64>,
    /// Outputs computed but not yet handed to the callback
    outbox: VecDeque<BoundValue>,
    draining: bool,
}

pub(crate) struct RuntimeParts {
    pub id: Arc<str>,
    pub spec: BindingSpec,
    pub program: BindingProgram,
    pub root: EntityId,
    pub registry: Arc<SubscriptionRegistry>,
    pub resolver: PathResolver,
    pub emitter: Arc<dyn EventEmitter>,
    pub runtime: Handle,
    pub on_change: ValueCallback,
}

struct RuntimeInner {
    id: Arc<str>,
    spec: BindingSpec,
    program: BindingProgram,
    root: EntityId,
    registry: Arc<SubscriptionRegistry>,
    resolver: PathResolver,
    emitter: Arc<dyn EventEmitter>,
    runtime: Handle,
    on_change: ValueCallback,
    state: Mutex<RuntimeState>,
}

/// Handle to an active binding (clone is shallow)
#[derive(Clone)]
pub struct BindingHandle {
    inner: Arc<RuntimeInner>,
}

impl BindingHandle {
    /// Build the runtime and bind every dependency
    ///
    /// Returns once each dependency has its initial value (possibly
    /// unresolved). The first delivery is spawned, never run inline.
    pub(crate) async fn start(parts: RuntimeParts) -> Self {
        let slots = parts
            .program
            .dependencies()
            .iter()
            .map(|path| DependencySlot::new(path.rooted_at(parts.root.clone())))
            .collect::<Vec<_>>();
        let slot_count = slots.len();

        let inner = Arc::new(RuntimeInner {
            id: parts.id,
            spec: parts.spec,
            program: parts.program,
            root: parts.root,
            registry: parts.registry,
            resolver: parts.resolver,
            emitter: parts.emitter,
            runtime: parts.runtime,
            on_change: parts.on_change,
            state: Mutex::new(RuntimeState {
                phase: BindingPhase::Resolving,
                active: true,
                ready: false,
                pending: 0,
                slots,
                last_output: None,
                error: false,
                last_evaluated_ms: None,
                outbox: VecDeque::new(),
                draining: false,
            }),
        });

        join_all((0..slot_count).map(|index| inner.bind_slot(index))).await;

        {
            let mut state = inner.state.lock();
            if state.active {
                state.ready = true;
                state.phase = if state.pending > 0 {
                    BindingPhase::Resolving
                } else {
                    BindingPhase::Bound
                };
            }
        }

        inner.emitter.emit(EventKind::BindingActivated {
            binding_id: Arc::clone(&inner.id),
            root: inner.root.to_string(),
            mode: inner.program.mode().to_string(),
            dependencies: inner
                .program
                .dependencies()
                .iter()
                .map(|p| p.canonical())
                .collect(),
        });
        debug!(binding = %inner.id, slots = slot_count, "binding active");

        let first = Arc::clone(&inner);
        inner.runtime.spawn(async move { first.recompute() });

        Self { inner }
    }

    /// `<n>:<component>.<property>`
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn spec(&self) -> &BindingSpec {
        &self.inner.spec
    }

    pub fn root(&self) -> &EntityId {
        &self.inner.root
    }

    pub fn phase(&self) -> BindingPhase {
        self.inner.state.lock().phase
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Last output pushed to the callback
    pub fn last_output(&self) -> Option<BoundValue> {
        self.inner.state.lock().last_output.clone()
    }

    /// Whether the latest evaluation failed (previous output retained)
    pub fn has_error(&self) -> bool {
        self.inner.state.lock().error
    }

    /// Unix time (ms) of the latest evaluation
    pub fn last_evaluated_ms(&self) -> Option<u64> {
        self.inner.state.lock().last_evaluated_ms
    }

    /// Current resolved target per dependency, keyed by canonical path
    pub fn targets(&self) -> Vec<(String, Option<FieldAddress>)> {
        self.inner
            .state
            .lock()
            .slots
            .iter()
            .map(|slot| (slot.path.path.canonical(), slot.resolution.target.clone()))
            .collect()
    }

    /// Release every subscription and stop deliveries; idempotent
    pub async fn deactivate(&self) {
        self.inner.deactivate().await
    }
}

impl std::fmt::Debug for BindingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingHandle")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum ListenerRole {
    /// Relation read at this hop index
    Hop(usize),
    Target,
}

struct SlotListener {
    runtime: Weak<RuntimeInner>,
    slot: usize,
    generation: u64,
    role: ListenerRole,
}

impl SubscriptionListener for SlotListener {
    fn on_sample(&self, address: &FieldAddress, sample: &FieldSample) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        match self.role {
            ListenerRole::Target => {
                runtime.on_target_sample(self.slot, self.generation, address, sample)
            }
            ListenerRole::Hop(hop) => runtime.on_hop_sample(self.slot, self.generation, hop, sample),
        }
    }
}

impl RuntimeInner {
    // ═══════════════════════════════════════════
    // BINDING
    // ═══════════════════════════════════════════

    async fn bind_slot(self: &Arc<Self>, index: usize) {
        let Some((path, generation)) = self.slot_snapshot(index) else {
            return;
        };

        let resolution = self.resolver.resolve(&path, generation).await;
        if let Some(err) = resolution.unresolved_error(&path) {
            debug!(binding = %self.id, error = %err, "dependency unresolved");
        }
        if !self.publish_resolution(index, generation, &resolution) {
            return;
        }

        let leases = self.acquire_chain(index, generation, &resolution).await;
        let stale = {
            let mut state = self.state.lock();
            let current = state.active
                && state
                    .slots
                    .get(index)
                    .is_some_and(|slot| slot.generation == generation);
            match state.slots.get_mut(index) {
                Some(slot) if current => {
                    slot.leases = leases;
                    Vec::new()
                }
                _ => leases,
            }
        };
        self.release_all(stale).await;
    }

    fn slot_snapshot(&self, index: usize) -> Option<(FieldPath, u64)> {
        let state = self.state.lock();
        if !state.active {
            return None;
        }
        state
            .slots
            .get(index)
            .map(|slot| (slot.path.clone(), slot.generation))
    }

    /// Store the resolution before acquiring so synchronous deliveries match it
    fn publish_resolution(&self, index: usize, generation: u64, resolution: &Resolution) -> bool {
        let mut state = self.state.lock();
        if !state.active {
            return false;
        }
        let Some(slot) = state.slots.get_mut(index) else {
            return false;
        };
        if slot.generation != generation {
            return false;
        }
        if slot.resolution.target != resolution.target {
            slot.value = BoundValue::Unresolved;
            slot.stamp = None;
        }
        slot.resolution = resolution.clone();
        true
    }

    /// Acquire every hop relation, then the target
    async fn acquire_chain(
        self: &Arc<Self>,
        index: usize,
        generation: u64,
        resolution: &Resolution,
    ) -> Vec<Lease> {
        let roles = resolution
            .hops
            .iter()
            .enumerate()
            .map(|(hop, link)| (link.relation.clone(), ListenerRole::Hop(hop)))
            .chain(
                resolution
                    .target
                    .clone()
                    .map(|target| (target, ListenerRole::Target)),
            );

        let mut leases = Vec::new();
        for (address, role) in roles {
            let listener = Arc::new(SlotListener {
                runtime: Arc::downgrade(self),
                slot: index,
                generation,
                role,
            });
            match self.registry.acquire(address, listener).await {
                Ok(lease) => leases.push(lease),
                Err(e) => warn!(binding = %self.id, error = %e, "acquire failed"),
            }
        }
        leases
    }

    async fn release_all(&self, leases: Vec<Lease>) {
        for lease in leases {
            self.registry.release(lease).await;
        }
    }

    // ═══════════════════════════════════════════
    // NOTIFICATIONS
    // ═══════════════════════════════════════════

    fn on_target_sample(
        &self,
        index: usize,
        generation: u64,
        address: &FieldAddress,
        sample: &FieldSample,
    ) {
        {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }
            let Some(slot) = state.slots.get_mut(index) else {
                return;
            };
            if slot.generation != generation || slot.resolution.target.as_ref() != Some(address) {
                return;
            }
            if slot.stamp.is_some_and(|stamp| sample.timestamp_ms <= stamp) {
                return;
            }
            slot.stamp = Some(sample.timestamp_ms);
            slot.value = BoundValue::Value(sample.value.clone());
        }
        self.recompute();
    }

    fn on_hop_sample(self: &Arc<Self>, index: usize, generation: u64, hop: usize, sample: &FieldSample) {
        let next = entity_ref(&sample.value);
        let new_generation = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.active {
                return;
            }
            let Some(slot) = state.slots.get_mut(index) else {
                return;
            };
            if slot.generation != generation {
                return;
            }
            match slot.resolution.hops.get(hop) {
                Some(link) if link.next != next => {}
                _ => return,
            }
            slot.generation += 1;
            state.pending += 1;
            state.phase = BindingPhase::Resolving;
            slot.generation
        };

        debug!(binding = %self.id, slot = index, hop, generation = new_generation, "relation changed, re-resolving");
        let runtime = Arc::clone(self);
        self.runtime
            .spawn(async move { runtime.reresolve(index, hop, new_generation).await });
    }

    // ═══════════════════════════════════════════
    // RE-RESOLUTION
    // ═══════════════════════════════════════════

    async fn reresolve(self: Arc<Self>, index: usize, hop: usize, generation: u64) {
        self.rebind_slot(index, hop, generation).await;

        let settled = {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            if state.active && state.pending == 0 {
                state.phase = BindingPhase::Bound;
                true
            } else {
                false
            }
        };
        if settled {
            self.recompute();
        }
    }

    /// Walk again from `hop`, acquire the new chain, then release the old one
    async fn rebind_slot(self: &Arc<Self>, index: usize, hop: usize, generation: u64) {
        let previous = {
            let state = self.state.lock();
            match state.slots.get(index) {
                Some(slot) if state.active && slot.generation == generation => {
                    (slot.path.clone(), slot.resolution.clone())
                }
                _ => return,
            }
        };
        let (path, previous) = previous;

        let resolution = self
            .resolver
            .resolve_from(&path, &previous, hop, generation)
            .await;
        if !self.publish_resolution(index, generation, &resolution) {
            return;
        }

        let acquired = self.acquire_chain(index, generation, &resolution).await;
        let released = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.slots.get_mut(index) {
                Some(slot) if state.active && slot.generation == generation => {
                    std::mem::replace(&mut slot.leases, acquired)
                }
                _ => acquired,
            }
        };
        self.release_all(released).await;

        self.emitter.emit(EventKind::PathReresolved {
            binding_id: Arc::clone(&self.id),
            path: path.path.canonical(),
            generation,
            from: previous.target.as_ref().map(ToString::to_string),
            to: resolution.target.as_ref().map(ToString::to_string),
        });
        if let Some(err) = resolution.unresolved_error(&path) {
            debug!(binding = %self.id, error = %err, "dependency unresolved after re-resolution");
        }
    }

    // ═══════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════

    /// Evaluate against the current snapshot and queue the output if it changed
    fn recompute(&self) {
        {
            let mut state = self.state.lock();
            if !state.active || !state.ready || state.pending > 0 {
                return;
            }

            let mut values = DependencyValues::new();
            for slot in &state.slots {
                values.insert(&slot.path.path, slot.value.clone());
            }
            state.last_evaluated_ms = Some(unix_millis());

            match self.program.evaluate(&values) {
                Ok(output) => {
                    state.error = false;
                    if state.last_output.as_ref() == Some(&output) {
                        return;
                    }
                    state.last_output = Some(output.clone());
                    state.outbox.push_back(output);
                }
                Err(err) => {
                    state.error = true;
                    drop(state);
                    self.report_failure(err);
                    return;
                }
            }

            // the running drainer picks this one up
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Deliver queued outputs until the outbox is empty, without holding `state`
    fn drain(&self) {
        loop {
            let output = {
                let mut state = self.state.lock();
                let next = if state.active {
                    state.outbox.pop_front()
                } else {
                    state.outbox.clear();
                    None
                };
                match next {
                    Some(output) => output,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            self.emitter.emit(EventKind::ValueDelivered {
                binding_id: Arc::clone(&self.id),
                value: output.clone().into_script_value(),
            });
            (self.on_change)(output);
        }
    }

    fn report_failure(&self, err: BindError) {
        warn!(binding = %self.id, error = %err, "evaluation failed, keeping previous output");
        self.emitter.emit(EventKind::EvaluationFailed {
            binding_id: Arc::clone(&self.id),
            error: err.to_string(),
        });
    }

    // ═══════════════════════════════════════════
    // TEARDOWN
    // ═══════════════════════════════════════════

    async fn deactivate(&self) {
        let leases = {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.ready = false;
            state.phase = BindingPhase::Unbound;
            state.last_output = None;
            state.outbox.clear();
            state
                .slots
                .iter_mut()
                .flat_map(|slot| {
                    slot.value = BoundValue::Unresolved;
                    slot.stamp = None;
                    std::mem::take(&mut slot.leases)
                })
                .collect::<Vec<_>>()
        };

        self.release_all(leases).await;
        self.emitter.emit(EventKind::BindingDeactivated {
            binding_id: Arc::clone(&self.id),
        });
        debug!(binding = %self.id, "binding deactivated");
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
