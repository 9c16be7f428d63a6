//! Store adapter contract - the entity store the engine binds against
//!
//! The engine never owns entity data. Everything goes through two async
//! primitives keyed by `(entity, field)`:
//! - `read`: one-shot fetch of the current sample
//! - `subscribe`: push notifications until the returned handle unsubscribes

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Identifier of an entity instance in the store
///
/// Arc<str> for zero-cost cloning across subscriptions and events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Identifier of a field (or relation) on an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(Arc<str>);

impl FieldId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Arc<str>> for FieldId {
    fn from(s: Arc<str>) -> Self {
        Self(s)
    }
}

/// Concrete `(entity, field)` pair - the key of every store operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldAddress {
    pub entity: EntityId,
    pub field: FieldId,
}

impl FieldAddress {
    pub fn new(entity: impl Into<EntityId>, field: impl Into<FieldId>) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.field)
    }
}

/// One observed value of a field: `{value, timestamp, writerId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSample {
    pub value: Value,
    /// Store write time (ms); orders samples within one field
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_id: Option<Arc<str>>,
}

impl FieldSample {
    pub fn new(value: impl Into<Value>, timestamp_ms: u64) -> Self {
        Self {
            value: value.into(),
            timestamp_ms,
            writer_id: None,
        }
    }

    pub fn with_writer(mut self, writer: impl AsRef<str>) -> Self {
        self.writer_id = Some(Arc::from(writer.as_ref()));
        self
    }
}

/// Payload handed to a subscription callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub current: FieldSample,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<FieldSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Notification {
    pub fn new(current: FieldSample) -> Self {
        Self {
            current,
            previous: None,
            context: None,
        }
    }
}

/// Callback the store invokes for every change of a subscribed field
pub type NotificationSink = Arc<dyn Fn(Notification) + Send + Sync>;

/// Handle returned by `StoreAdapter::subscribe`
#[async_trait]
pub trait StoreSubscription: Send + Sync {
    /// Stop delivery. The sink may still see in-flight notifications.
    async fn unsubscribe(&self) -> Result<()>;
}

/// Entity store primitives consumed by the engine
///
/// Implementations handle their own transport and retries; see
/// [`RetryingStore`](super::RetryingStore) for a backoff decorator.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// One-shot read. `Ok(None)` means the field has never been written.
    async fn read(&self, address: &FieldAddress) -> Result<Option<FieldSample>>;

    /// Register `sink` for change notifications on `address`
    async fn subscribe(
        &self,
        address: &FieldAddress,
        sink: NotificationSink,
    ) -> Result<Box<dyn StoreSubscription>>;
}

/// Interpret a relation value as a single entity reference
///
/// Accepted shapes:
/// - `"E2"` (plain id)
/// - `{"id": "E2"}` or `{"entityId": "E2"}`
///
/// Null, empty ids and list references yield `None`.
pub fn entity_ref(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(EntityId::new(id.trim())),
        Value::Object(map) => map
            .get("entityId")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(|id| EntityId::new(id.trim())),
        Value::Array(_) => {
            tracing::debug!("list references are not supported as path hops");
            None
        }
        _ => None,
    }
}
