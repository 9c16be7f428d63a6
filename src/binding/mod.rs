//! Binding Module - live bindings from store fields to component properties
//!
//! - `spec`: persisted shapes (`BindingSpec`, `BindingSet`)
//! - `runtime`: per-binding lifecycle (`BindingHandle`)
//! - `engine`: activation entry point (`BindingEngine`)
//!
//! Data flow:
//! ```text
//! BindingSpec ──compile──▶ BindingProgram
//!                               │ dependencies
//!                               ▼
//!                  PathResolver + SubscriptionRegistry
//!                               │ samples
//!                               ▼
//!                      evaluate ──▶ on_change(BoundValue)
//! ```

mod engine;
mod runtime;
mod spec;

// Re-export public types
pub use engine::BindingEngine;
pub use runtime::{BindingHandle, BindingPhase, ValueCallback};
pub use spec::{BindingMode, BindingSet, BindingSpec, ScriptedWrite};
