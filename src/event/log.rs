//! EventLog - append-only audit trail of engine activity
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: binding lifecycle, subscription lifecycle, delivery
//! - EventLog: thread-safe, append-only log with NDJSON export

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the engine log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// Everything the engine reports
///
/// `binding_id` is `"<n>:<component>.<property>"`; `target` is `"Entity.Field"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // BINDING LIFECYCLE
    // ═══════════════════════════════════════════
    BindingActivated {
        binding_id: Arc<str>,
        root: String,
        mode: String,
        dependencies: Vec<String>,
    },
    BindingDeactivated {
        binding_id: Arc<str>,
    },
    /// An intermediate relation changed and a dependency moved targets
    PathReresolved {
        binding_id: Arc<str>,
        path: String,
        generation: u64,
        from: Option<String>,
        to: Option<String>,
    },

    // ═══════════════════════════════════════════
    // SUBSCRIPTIONS
    // ═══════════════════════════════════════════
    SubscriptionOpened {
        target: String,
    },
    SubscriptionClosed {
        target: String,
    },
    StaleNotificationDropped {
        target: String,
        timestamp_ms: u64,
        last_timestamp_ms: u64,
    },

    // ═══════════════════════════════════════════
    // DELIVERY
    // ═══════════════════════════════════════════
    ValueDelivered {
        binding_id: Arc<str>,
        value: Value,
    },
    EvaluationFailed {
        binding_id: Arc<str>,
        error: String,
    },
}

impl EventKind {
    /// Binding the event belongs to, if any
    pub fn binding_id(&self) -> Option<&str> {
        match self {
            Self::BindingActivated { binding_id, .. }
            | Self::BindingDeactivated { binding_id }
            | Self::PathReresolved { binding_id, .. }
            | Self::ValueDelivered { binding_id, .. }
            | Self::EvaluationFailed { binding_id, .. } => Some(binding_id),
            Self::SubscriptionOpened { .. }
            | Self::SubscriptionClosed { .. }
            | Self::StaleNotificationDropped { .. } => None,
        }
    }

    /// Target address for subscription-level events
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::SubscriptionOpened { target }
            | Self::SubscriptionClosed { target }
            | Self::StaleNotificationDropped { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds the read lock for the duration of the callback.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events for one binding
    pub fn filter_binding(&self, binding_id: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.binding_id() == Some(binding_id))
                .cloned()
                .collect()
        })
    }

    /// Count events matching a predicate (no allocation)
    pub fn count_where(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.with_events(|events| events.iter().filter(|e| predicate(&e.kind)).count())
    }

    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    /// One JSON object per line
    pub fn write_ndjson(&self, out: &mut impl Write) -> std::io::Result<()> {
        self.with_events(|events| {
            for event in events {
                serde_json::to_writer(&mut *out, event)?;
                out.write_all(b"\n")?;
            }
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
