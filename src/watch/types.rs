//! Watch event and subscription option types.

use crate::condition::Condition;
use crate::types::{Document, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happened to a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Put,
    Delete,
}

/// One delivered change: the kind, the document's feature key and a snapshot
/// of its value (the stored value for puts, the removed value for deletes).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    pub value: Document,
}

/// Why the engine ended a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateReason {
    /// The subscription's wall-clock bound elapsed.
    Timeout,
    /// The delivered-event cap was reached.
    MaxEvents,
    /// The subscriber fell behind and its buffer overflowed.
    Overflow,
    /// The hub went away.
    Closed,
}

/// A message on a watch channel.
///
/// Termination is its own variant rather than a sentinel event kind, so a
/// consumer cannot mistake "the engine decided to stop" for a data event
/// with an empty payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "signal", content = "body", rename_all = "lowercase")]
pub enum StreamSignal {
    Data(WatchEvent),
    Terminate(TerminateReason),
}

impl StreamSignal {
    pub fn is_terminate(&self) -> bool {
        matches!(self, StreamSignal::Terminate(_))
    }
}

/// Configuration governing one subscription's lifetime and filtering.
#[derive(Clone, Debug)]
pub struct WatchOption {
    /// Compiled predicate a change must satisfy to be delivered.
    pub condition: Condition,

    /// The subscribing session, matched against write origins.
    pub session: SessionId,

    /// Deliver only changes written by `session`.
    pub self_only: bool,

    /// Hard cap on delivered data events; 0 means unlimited.
    pub max_events: u64,

    /// Wall-clock bound, independent of event count. None means unbounded.
    pub timeout: Option<Duration>,

    /// Suppress an update whose value is identical (timestamps aside) to the
    /// last value delivered for that key.
    pub must_diff: bool,

    /// Max buffered events before the subscriber is dropped.
    /// 0 uses the hub default.
    pub buffer_size: usize,
}

impl Default for WatchOption {
    fn default() -> Self {
        Self {
            condition: Condition::all(),
            session: SessionId::default(),
            self_only: false,
            max_events: 0,
            timeout: None,
            must_diff: false,
            buffer_size: 0,
        }
    }
}

/// Hub-level defaults.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Default per-subscription buffer size.
    pub buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}
