//! Watch hub: observes every store write/delete and fans changes out to
//! matching subscriptions.
//!
//! One independent consumer per subscription, coordinated only through that
//! subscription's private bounded channel. The hub's registry lock is held
//! just long enough to evaluate policies and enqueue; delivery itself never
//! blocks on a consumer. A slow consumer whose buffer fills is dropped
//! (best-effort, at-most-once delivery).

use crate::backend::{compile_matcher, Matcher};
use crate::types::{Document, SessionId, WatchId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::types::{EventKind, StreamSignal, TerminateReason, WatchConfig, WatchEvent, WatchOption};

/// Internal per-subscription state.
struct Watcher {
    matcher: Matcher,
    session: SessionId,
    self_only: bool,
    max_events: u64,
    must_diff: bool,
    deadline: Option<Instant>,
    sender: Sender<StreamSignal>,
    /// Data events may occupy at most this many channel slots; the channel
    /// is one slot larger so a terminator always fits.
    data_capacity: usize,
    delivered: u64,
    /// Last delivered value per feature key, kept only under `must_diff`.
    last_delivered: HashMap<String, Document>,
}

enum Delivery {
    Kept,
    Dropped(TerminateReason),
}

impl Watcher {
    /// Evaluate one change against this subscription's policies and deliver
    /// it if it qualifies.
    fn offer(
        &mut self,
        now: Instant,
        kind: EventKind,
        key: &str,
        doc: &Document,
        origin: Option<SessionId>,
    ) -> Delivery {
        if self.deadline.is_some_and(|d| now >= d) {
            return Delivery::Dropped(TerminateReason::Timeout);
        }
        if !(self.matcher)(doc) {
            return Delivery::Kept;
        }
        if self.self_only && origin != Some(self.session) {
            return Delivery::Kept;
        }
        if self.must_diff {
            match kind {
                EventKind::Put => {
                    if self
                        .last_delivered
                        .get(key)
                        .is_some_and(|prev| prev.same_content(doc))
                    {
                        return Delivery::Kept;
                    }
                }
                EventKind::Delete => {
                    self.last_delivered.remove(key);
                }
            }
        }

        let event = WatchEvent {
            kind,
            key: key.to_string(),
            value: doc.clone(),
        };
        if self.sender.len() >= self.data_capacity
            || self.sender.try_send(StreamSignal::Data(event)).is_err()
        {
            return Delivery::Dropped(TerminateReason::Overflow);
        }
        if self.must_diff && kind == EventKind::Put {
            self.last_delivered.insert(key.to_string(), doc.clone());
        }

        self.delivered += 1;
        if self.max_events > 0 && self.delivered >= self.max_events {
            return Delivery::Dropped(TerminateReason::MaxEvents);
        }
        Delivery::Kept
    }
}

/// Per-table change feed registry.
pub struct WatchHub {
    config: WatchConfig,
    /// table -> active watchers.
    watchers: Mutex<HashMap<String, HashMap<u64, Watcher>>>,
    next_id: AtomicU64,
}

impl WatchHub {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a subscription on a table.
    ///
    /// Only changes written after attachment are observed; a write racing
    /// the attachment may be missed (best-effort, at-most-once).
    pub fn watch(self: &Arc<Self>, table: &str, option: WatchOption) -> WatchHandle {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let buffer = if option.buffer_size > 0 {
            option.buffer_size
        } else {
            self.config.buffer_size
        };
        // One extra slot so the terminator is deliverable even when the
        // data buffer is full.
        let (sender, receiver) = bounded(buffer + 1);
        let deadline = option.timeout.map(|t| Instant::now() + t);

        let watcher = Watcher {
            matcher: compile_matcher(&option.condition),
            session: option.session,
            self_only: option.self_only,
            max_events: option.max_events,
            must_diff: option.must_diff,
            deadline,
            sender,
            data_capacity: buffer,
            delivered: 0,
            last_delivered: HashMap::new(),
        };

        self.watchers
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(id.0, watcher);
        debug!(table, id = id.0, "watch attached");

        WatchHandle {
            id,
            table: table.to_string(),
            receiver,
            deadline,
            hub: Arc::clone(self),
            finished: false,
        }
    }

    /// Detach a subscription. Idempotent.
    pub fn unwatch(&self, table: &str, id: WatchId) {
        let mut map = self.watchers.lock();
        if let Some(subs) = map.get_mut(table) {
            if subs.remove(&id.0).is_some() {
                debug!(table, id = id.0, "watch detached");
            }
            if subs.is_empty() {
                map.remove(table);
            }
        }
    }

    /// Number of active subscriptions on a table.
    pub fn watch_count(&self, table: &str) -> usize {
        self.watchers.lock().get(table).map_or(0, |s| s.len())
    }

    /// Observation point: called by the store for every write/delete it
    /// performs. Events for one key arrive here in write order and each
    /// channel is FIFO, so per-key order holds within a subscription.
    pub(crate) fn notify(
        &self,
        table: &str,
        kind: EventKind,
        key: &str,
        doc: &Document,
        origin: Option<SessionId>,
    ) {
        let mut map = self.watchers.lock();
        let Some(subs) = map.get_mut(table) else {
            return;
        };
        let now = Instant::now();
        subs.retain(|id, watcher| match watcher.offer(now, kind, key, doc, origin) {
            Delivery::Kept => true,
            Delivery::Dropped(reason) => {
                // The reserved slot guarantees room; only a consumer that
                // already went away can make this fail.
                let _ = watcher.sender.try_send(StreamSignal::Terminate(reason));
                debug!(table, id = *id, ?reason, "watch terminated by engine");
                false
            }
        });
        if subs.is_empty() {
            map.remove(table);
        }
    }
}

/// Consumer side of one subscription.
///
/// Dropping the handle detaches the subscription.
pub struct WatchHandle {
    id: WatchId,
    table: String,
    receiver: Receiver<StreamSignal>,
    deadline: Option<Instant>,
    hub: Arc<WatchHub>,
    finished: bool,
}

impl WatchHandle {
    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The raw channel, for callers that need to wait on multiple sources.
    pub fn receiver(&self) -> &Receiver<StreamSignal> {
        &self.receiver
    }

    /// The wall-clock bound for this subscription, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Block until the next signal, the deadline, or channel closure.
    ///
    /// A quiet table past the deadline synthesizes `Terminate(Timeout)`
    /// locally, so timeouts fire even when nothing is being written.
    pub fn next(&mut self) -> StreamSignal {
        if self.finished {
            return StreamSignal::Terminate(TerminateReason::Closed);
        }
        let received = match self.deadline {
            Some(deadline) => self.receiver.recv_deadline(deadline).map_err(|e| {
                matches!(e, crossbeam_channel::RecvTimeoutError::Timeout)
            }),
            None => self.receiver.recv().map_err(|_| false),
        };
        match received {
            Ok(signal) => {
                if signal.is_terminate() {
                    self.finish();
                }
                signal
            }
            Err(timed_out) => {
                self.finish();
                if timed_out {
                    StreamSignal::Terminate(TerminateReason::Timeout)
                } else {
                    StreamSignal::Terminate(TerminateReason::Closed)
                }
            }
        }
    }

    /// Detach now instead of at drop.
    pub fn cancel(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.hub.unwatch(&self.table, self.id);
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use serde_json::json;
    use std::time::Duration;

    fn hub() -> Arc<WatchHub> {
        Arc::new(WatchHub::new(WatchConfig::default()))
    }

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value)
    }

    fn put(hub: &WatchHub, name: &str) {
        hub.notify(
            "pods",
            EventKind::Put,
            &format!("name={}", name),
            &doc(json!({"name": name})),
            None,
        );
    }

    #[test]
    fn test_condition_filters_delivery() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                condition: Condition::eq("name", json!("web-0")),
                ..Default::default()
            },
        );

        put(&hub, "db-0");
        put(&hub, "web-0");

        match handle.next() {
            StreamSignal::Data(event) => {
                assert_eq!(event.kind, EventKind::Put);
                assert_eq!(event.value.get("name"), Some(&json!("web-0")));
            }
            other => panic!("expected data, got {:?}", other),
        }
        assert!(handle.receiver().is_empty());
    }

    #[test]
    fn test_max_events_caps_and_terminates() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                max_events: 3,
                ..Default::default()
            },
        );

        for i in 0..5 {
            put(&hub, &format!("pod-{}", i));
        }

        for _ in 0..3 {
            assert!(matches!(handle.next(), StreamSignal::Data(_)));
        }
        assert!(matches!(
            handle.next(),
            StreamSignal::Terminate(TerminateReason::MaxEvents)
        ));
        assert_eq!(hub.watch_count("pods"), 0);
    }

    #[test]
    fn test_self_only_suppresses_other_sessions() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                session: SessionId(7),
                self_only: true,
                ..Default::default()
            },
        );

        hub.notify("pods", EventKind::Put, "k", &doc(json!({"n": 1})), Some(SessionId(8)));
        hub.notify("pods", EventKind::Put, "k", &doc(json!({"n": 2})), None);
        hub.notify("pods", EventKind::Put, "k", &doc(json!({"n": 3})), Some(SessionId(7)));

        match handle.next() {
            StreamSignal::Data(event) => assert_eq!(event.value.get("n"), Some(&json!(3))),
            other => panic!("expected data, got {:?}", other),
        }
        assert!(handle.receiver().is_empty());
    }

    #[test]
    fn test_must_diff_suppresses_identical_rewrite() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                must_diff: true,
                ..Default::default()
            },
        );

        let mut v1 = doc(json!({"name": "web-0", "phase": "Running"}));
        v1.insert("updateTime", json!(100));
        let mut v1_again = v1.clone();
        v1_again.insert("updateTime", json!(200));
        let mut v2 = v1.clone();
        v2.insert("phase", json!("Failed"));

        hub.notify("pods", EventKind::Put, "k", &v1, None);
        hub.notify("pods", EventKind::Put, "k", &v1_again, None);
        hub.notify("pods", EventKind::Put, "k", &v2, None);

        assert!(matches!(handle.next(), StreamSignal::Data(_)));
        match handle.next() {
            StreamSignal::Data(event) => {
                assert_eq!(event.value.get("phase"), Some(&json!("Failed")))
            }
            other => panic!("expected data, got {:?}", other),
        }
        assert!(handle.receiver().is_empty());
    }

    #[test]
    fn test_must_diff_redelivers_after_delete() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                must_diff: true,
                ..Default::default()
            },
        );

        let v = doc(json!({"name": "web-0"}));
        hub.notify("pods", EventKind::Put, "k", &v, None);
        hub.notify("pods", EventKind::Delete, "k", &v, None);
        hub.notify("pods", EventKind::Put, "k", &v, None);

        let kinds: Vec<EventKind> = (0..3)
            .map(|_| match handle.next() {
                StreamSignal::Data(event) => event.kind,
                other => panic!("expected data, got {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec![EventKind::Put, EventKind::Delete, EventKind::Put]);
    }

    #[test]
    fn test_timeout_fires_on_quiet_table() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );

        assert!(matches!(
            handle.next(),
            StreamSignal::Terminate(TerminateReason::Timeout)
        ));
        assert_eq!(hub.watch_count("pods"), 0);
    }

    #[test]
    fn test_slow_subscriber_dropped_with_overflow() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                buffer_size: 2,
                ..Default::default()
            },
        );

        for i in 0..10 {
            put(&hub, &format!("pod-{}", i));
        }
        assert_eq!(hub.watch_count("pods"), 0);

        // The buffered events drain first, then the reason for the drop.
        assert!(matches!(handle.next(), StreamSignal::Data(_)));
        assert!(matches!(handle.next(), StreamSignal::Data(_)));
        assert!(matches!(
            handle.next(),
            StreamSignal::Terminate(TerminateReason::Overflow)
        ));
    }

    #[test]
    fn test_max_events_terminator_survives_full_buffer() {
        let hub = hub();
        let mut handle = hub.watch(
            "pods",
            WatchOption {
                max_events: 2,
                buffer_size: 2,
                ..Default::default()
            },
        );

        // Fill the buffer to its cap without consuming, then read back.
        // The terminator must still arrive behind the buffered events.
        put(&hub, "pod-0");
        put(&hub, "pod-1");
        assert_eq!(hub.watch_count("pods"), 0);

        assert!(matches!(handle.next(), StreamSignal::Data(_)));
        assert!(matches!(handle.next(), StreamSignal::Data(_)));
        assert!(matches!(
            handle.next(),
            StreamSignal::Terminate(TerminateReason::MaxEvents)
        ));
    }

    #[test]
    fn test_drop_detaches() {
        let hub = hub();
        let handle = hub.watch("pods", WatchOption::default());
        assert_eq!(hub.watch_count("pods"), 1);
        drop(handle);
        assert_eq!(hub.watch_count("pods"), 0);
    }
}
