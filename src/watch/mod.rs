//! Watch subscriptions: per-table change feeds with delivery policies.

mod hub;
mod types;

pub use hub::{WatchHandle, WatchHub};
pub use types::{EventKind, StreamSignal, TerminateReason, WatchConfig, WatchEvent, WatchOption};
