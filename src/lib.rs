//! # Resource Store
//!
//! A schema-less document store with a condition-tree query DSL and
//! change-notification streams, the storage layer under a container-platform
//! control plane.
//!
//! ## Core Concepts
//!
//! - **Conditions**: Immutable predicate trees walked through a visitor,
//!   translated by any backend
//! - **Filter tables**: Typed filter specs declared as data, compiled into
//!   condition trees with per-field coercion
//! - **Resources**: Flat feature fields plus an arbitrary nested `data`
//!   payload, upserted by feature identity
//! - **Watches**: Best-effort per-table change feeds with self-only, diff,
//!   max-event and timeout policies
//!
//! ## Example
//!
//! ```ignore
//! use resource_store::{
//!     Condition, Document, GetOptions, MemoryBackend, ResourceStore, WatchOption,
//! };
//! use serde_json::json;
//!
//! let store = ResourceStore::new(MemoryBackend::new());
//! let keys = vec!["name".to_string(), "namespace".to_string()];
//!
//! let mut handle = store.watch("pods", WatchOption::default());
//!
//! store.put("pods", Document::from_value(json!({
//!     "name": "web-0",
//!     "namespace": "default",
//!     "data": {"status": {"phase": "Running"}},
//! })), &keys)?;
//!
//! let running = store.get(
//!     "pods",
//!     &Condition::eq("data.status.phase", json!("Running")),
//!     &GetOptions::default(),
//! )?;
//! ```

pub mod backend;
pub mod condition;
pub mod error;
pub mod filter;
pub mod store;
pub mod stream;
pub mod types;
pub mod watch;

// Re-exports
pub use backend::{Backend, FindOptions, MemoryBackend, SortKey, SortOrder};
pub use condition::{BranchOp, Condition, ConditionVisitor, LeafOp};
pub use error::{Result, StoreError};
pub use filter::{Coerce, FilterTable, FilterTableBuilder, TimeLayout};
pub use store::{GetOptions, ResourceStore};
pub use stream::{
    cancel_pair, stream_events, CancelHandle, CancelToken, EventSink, JsonLinesSink, StreamOutcome,
};
pub use types::{Document, SessionId, Timestamp, WatchId, CREATE_TIME_FIELD, UPDATE_TIME_FIELD};
pub use watch::{
    EventKind, StreamSignal, TerminateReason, WatchConfig, WatchEvent, WatchHandle, WatchHub,
    WatchOption,
};
