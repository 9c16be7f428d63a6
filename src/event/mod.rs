//! Event Module - audit trail for binding activity
//!
//! Key types:
//! - `Event`: Envelope with id + timestamp + kind
//! - `EventKind`: binding lifecycle, subscription lifecycle, delivery
//! - `EventLog`: Thread-safe, append-only log (NDJSON export)
//! - `EventEmitter`: Trait the engine reports through
//! - `NoopEmitter`: Emitter that drops everything

mod emitter;
mod log;

// Re-export all public types
pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
