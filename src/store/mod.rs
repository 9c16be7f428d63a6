//! Store Module - entity store contract and implementations
//!
//! Key types:
//! - `StoreAdapter`: async read/subscribe contract the engine binds against
//! - `FieldAddress`, `FieldSample`, `Notification`: wire-level value types
//! - `MemoryStore`: DashMap-backed reference store (CLI + tests)
//! - `RetryingStore`: backoff decorator for flaky transports

mod adapter;
mod memory;
mod retry;

// Re-export all public types
pub use adapter::{
    entity_ref, EntityId, FieldAddress, FieldId, FieldSample, Notification, NotificationSink,
    StoreAdapter, StoreSubscription,
};
pub use memory::{MemoryStore, StoreSnapshot};
pub use retry::{RetryConfig, RetryPolicy, RetryingStore};
