//! Livebind - live data bindings from an entity store to UI properties
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         LANGUAGE                             │
//! │  lang/      Path syntax + script expressions → AST           │
//! │  eval/      Value semantics, helpers, compiled programs      │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  binding/   BindingSpec, BindingEngine, BindingHandle        │
//! │  resolve    Relation hops → concrete field address           │
//! │  registry   Refcounted, deduplicated store subscriptions     │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/     StoreAdapter contract, MemoryStore, RetryingStore│
//! │  event/     Audit trail (EventLog, EventEmitter)             │
//! │  config     ~/.config/livebind/config.toml + env overrides   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use livebind::{BindingEngine, BindingMode, BindingSpec, EngineConfig, MemoryStore};
//!
//! # async fn demo() -> livebind::Result<()> {
//! let store = MemoryStore::new();
//! store.write("E1", "Parent", "E2");
//! store.write("E2", "Status", "running");
//!
//! let engine = BindingEngine::init(Arc::new(store.clone()), EngineConfig::default())?;
//! let spec = BindingSpec::new("lamp", "text", "Parent->Status", BindingMode::Field);
//! let handle = engine
//!     .activate(spec, "E1", |value| println!("lamp.text = {value}"))
//!     .await?;
//!
//! store.write("E1", "Parent", "E3");
//! engine.deactivate(&handle).await;
//! # Ok(())
//! # }
//! ```

// ═══════════════════════════════════════════════════════════════
// LANGUAGE
// ═══════════════════════════════════════════════════════════════
pub mod eval;
pub mod lang;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod binding;
pub mod registry;
pub mod resolve;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;
pub mod event;
pub mod store;

pub use binding::{
    BindingEngine, BindingHandle, BindingMode, BindingPhase, BindingSet, BindingSpec,
    ScriptedWrite,
};
pub use config::EngineConfig;
pub use error::{BindError, FixSuggestion, Result};
pub use eval::{evaluate, BindingProgram, BoundValue, DependencyValues};
pub use event::{Event, EventEmitter, EventKind, EventLog, NoopEmitter};
pub use lang::{extract_dependencies, parse_expression, parse_path, FieldPath, PathExpr};
pub use registry::{Lease, SubscriptionListener, SubscriptionRegistry};
pub use resolve::{PathResolver, Resolution};
pub use store::{EntityId, FieldAddress, FieldSample, MemoryStore, StoreAdapter};
