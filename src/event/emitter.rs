//! EventEmitter trait - where the engine reports what it does
//!
//! The engine holds an `Arc<dyn EventEmitter>`: an [`EventLog`] when the
//! caller wants an audit trail, [`NoopEmitter`] otherwise.

use super::log::{EventKind, EventLog};

pub trait EventEmitter: Send + Sync {
    /// Emit an event and return its ID
    fn emit(&self, kind: EventKind) -> u64;
}

impl EventEmitter for EventLog {
    fn emit(&self, kind: EventKind) -> u64 {
        EventLog::emit(self, kind)
    }
}

/// Emitter that drops everything (always returns 0)
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: EventKind) -> u64 {
        0
    }
}
