//! Generic upsert/read/delete operations over named resource tables.
//!
//! The store is schema-less: a table holds whatever documents its callers
//! write, keyed by the feature fields each caller names at write time. Every
//! write and delete is fed to the [`WatchHub`] so subscriptions observe
//! exactly what the store did.

use crate::backend::{Backend, FindOptions, SortKey};
use crate::condition::Condition;
use crate::error::{Result, StoreError};
use crate::types::{Document, SessionId, Timestamp, CREATE_TIME_FIELD, UPDATE_TIME_FIELD};
use crate::watch::{EventKind, WatchConfig, WatchHandle, WatchHub, WatchOption};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Read shaping for [`ResourceStore::get`].
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Top-level fields to keep; empty keeps whole documents.
    pub projection: Vec<String>,
    pub offset: usize,
    /// 0 means unlimited.
    pub limit: usize,
    pub sort: Vec<SortKey>,
    /// Ad hoc equality constraints merged into the condition, letting
    /// callers filter on fields outside the declared feature set. Values
    /// bypass filter-table coercion.
    pub extra: Map<String, Value>,
}

/// Generic resource store over a backend, shared by all CRUD callers and
/// all watch subscriptions.
pub struct ResourceStore<B: Backend> {
    backend: B,
    hub: Arc<WatchHub>,
    /// Declared feature fields per table, recorded at first write. Used to
    /// derive event keys for deletes.
    feature_keys: RwLock<HashMap<String, Vec<String>>>,
    /// Serializes mutation + notification so watchers see per-key write
    /// order.
    write_lock: Mutex<()>,
}

impl<B: Backend> ResourceStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, WatchConfig::default())
    }

    pub fn with_config(backend: B, config: WatchConfig) -> Self {
        Self {
            backend,
            hub: Arc::new(WatchHub::new(config)),
            feature_keys: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// The change-feed engine fed by this store's writes.
    pub fn hub(&self) -> &Arc<WatchHub> {
        &self.hub
    }

    /// Open a change subscription on a table.
    pub fn watch(&self, table: &str, option: WatchOption) -> WatchHandle {
        self.hub.watch(table, option)
    }

    /// Upsert a document keyed by the equality condition over the subset of
    /// `doc` named by `feature_keys`. The newer document always wins; there
    /// are no version counters, a losing concurrent writer is simply
    /// overwritten by the next one.
    pub fn put(&self, table: &str, doc: Document, feature_keys: &[String]) -> Result<Document> {
        self.put_from(table, doc, feature_keys, None)
    }

    /// [`put`](Self::put) with an explicit write origin, matched against
    /// `self_only` subscriptions.
    pub fn put_from(
        &self,
        table: &str,
        mut doc: Document,
        feature_keys: &[String],
        origin: Option<SessionId>,
    ) -> Result<Document> {
        let condition = feature_condition(&doc, feature_keys);
        let key = doc.feature_key(feature_keys);
        let now = Timestamp::now();
        // The backend preserves the stored createTime on replace.
        doc.insert(CREATE_TIME_FIELD, json!(now.0));
        doc.insert(UPDATE_TIME_FIELD, json!(now.0));

        self.feature_keys
            .write()
            .entry(table.to_string())
            .or_insert_with(|| feature_keys.to_vec());

        let _guard = self.write_lock.lock();
        let stored = self.backend.upsert(table, &condition, doc)?;
        self.hub.notify(table, EventKind::Put, &key, &stored, origin);
        debug!(table, key = %key, "put");
        Ok(stored)
    }

    /// Return matching documents shaped by `options`. Empty is not an error.
    pub fn get(
        &self,
        table: &str,
        condition: &Condition,
        options: &GetOptions,
    ) -> Result<Vec<Document>> {
        let condition = merge_extra(condition, &options.extra);
        let find = FindOptions {
            projection: options.projection.clone(),
            offset: options.offset,
            limit: options.limit,
            sort: options.sort.clone(),
        };
        self.backend.find(table, &condition, &find)
    }

    /// Delete every document matching `condition` and return the removed
    /// set. Two-phase get-then-remove, so watchers are told exactly what
    /// was deleted. Zero matches is success under `ignore_not_found`,
    /// otherwise a [`StoreError::NotFound`].
    pub fn delete_batch(
        &self,
        table: &str,
        condition: &Condition,
        ignore_not_found: bool,
    ) -> Result<Vec<Document>> {
        self.delete_batch_from(table, condition, ignore_not_found, None)
    }

    pub fn delete_batch_from(
        &self,
        table: &str,
        condition: &Condition,
        ignore_not_found: bool,
        origin: Option<SessionId>,
    ) -> Result<Vec<Document>> {
        let _guard = self.write_lock.lock();
        let matched = self
            .backend
            .find(table, condition, &FindOptions::default())?;
        if matched.is_empty() {
            if ignore_not_found {
                return Ok(Vec::new());
            }
            return Err(StoreError::NotFound {
                table: table.to_string(),
            });
        }

        let removed = self.backend.remove(table, condition)?;
        let keys = self.feature_keys.read().get(table).cloned().unwrap_or_default();
        for doc in &removed {
            let key = doc.feature_key(&keys);
            self.hub.notify(table, EventKind::Delete, &key, doc, origin);
        }
        debug!(table, count = removed.len(), "delete batch");
        Ok(removed)
    }

    /// Retention cleanup: delete matching documents whose `updateTime` falls
    /// inside the given bounds. The range is ANDed onto `condition`.
    pub fn delete_range(
        &self,
        table: &str,
        condition: &Condition,
        updated_after: Option<Timestamp>,
        updated_before: Option<Timestamp>,
        ignore_not_found: bool,
    ) -> Result<Vec<Document>> {
        let mut parts = vec![condition.clone()];
        if let Some(begin) = updated_after {
            parts.push(Condition::gt(UPDATE_TIME_FIELD, json!(begin.0)));
        }
        if let Some(end) = updated_before {
            parts.push(Condition::lt(UPDATE_TIME_FIELD, json!(end.0)));
        }
        let bounded = if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::and(parts)
        };
        self.delete_batch(table, &bounded, ignore_not_found)
    }
}

/// Equality condition over the subset of `doc` named by `feature_keys`.
/// Fields absent from the document contribute no constraint.
fn feature_condition(doc: &Document, feature_keys: &[String]) -> Condition {
    let mut parts: Vec<Condition> = feature_keys
        .iter()
        .filter_map(|key| {
            doc.get(key)
                .map(|value| Condition::eq(key.clone(), value.clone()))
        })
        .collect();
    debug_assert!(
        !parts.is_empty(),
        "upsert document carries none of its feature fields"
    );
    match parts.len() {
        0 => Condition::all(),
        1 => parts.remove(0),
        _ => Condition::and(parts),
    }
}

fn merge_extra(condition: &Condition, extra: &Map<String, Value>) -> Condition {
    if extra.is_empty() {
        return condition.clone();
    }
    let mut parts = Vec::with_capacity(extra.len() + 1);
    if !condition.is_match_all() {
        parts.push(condition.clone());
    }
    for (field, value) in extra {
        parts.push(Condition::eq(field.clone(), value.clone()));
    }
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Condition::and(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn store() -> ResourceStore<MemoryBackend> {
        ResourceStore::new(MemoryBackend::new())
    }

    fn pod(name: &str, ns: &str, phase: &str) -> Document {
        Document::from_value(json!({
            "name": name,
            "namespace": ns,
            "data": {"status": {"phase": phase}},
        }))
    }

    fn pod_keys() -> Vec<String> {
        vec!["name".into(), "namespace".into()]
    }

    #[test]
    fn test_put_twice_same_key_keeps_one_doc_second_wins() {
        let store = store();
        store.put("pods", pod("web-0", "default", "Pending"), &pod_keys()).unwrap();
        store.put("pods", pod("web-0", "default", "Running"), &pod_keys()).unwrap();

        let found = store
            .get("pods", &Condition::eq("name", json!("web-0")), &GetOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].get_path("data.status.phase"),
            Some(&json!("Running"))
        );
    }

    #[test]
    fn test_put_stamps_timestamps() {
        let store = store();
        let stored = store.put("pods", pod("web-0", "default", "Pending"), &pod_keys()).unwrap();
        assert!(stored.get(CREATE_TIME_FIELD).is_some());
        assert!(stored.get(UPDATE_TIME_FIELD).is_some());
    }

    #[test]
    fn test_get_empty_result_is_ok() {
        let store = store();
        let found = store
            .get("pods", &Condition::eq("name", json!("nope")), &GetOptions::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_get_with_extra_side_channel() {
        let store = store();
        store.put("pods", pod("web-0", "default", "Running"), &pod_keys()).unwrap();
        store.put("pods", pod("web-1", "dev", "Running"), &pod_keys()).unwrap();

        let mut extra = Map::new();
        extra.insert("namespace".to_string(), json!("dev"));
        let options = GetOptions {
            extra,
            ..Default::default()
        };
        let found = store.get("pods", &Condition::all(), &options).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("name"), Some(&json!("web-1")));
    }

    #[test]
    fn test_delete_batch_zero_matches() {
        let store = store();
        let removed = store
            .delete_batch("pods", &Condition::eq("name", json!("ghost")), true)
            .unwrap();
        assert!(removed.is_empty());

        let err = store
            .delete_batch("pods", &Condition::eq("name", json!("ghost")), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_delete_batch_returns_removed_docs() {
        let store = store();
        store.put("pods", pod("web-0", "default", "Running"), &pod_keys()).unwrap();
        store.put("pods", pod("web-1", "default", "Running"), &pod_keys()).unwrap();
        store.put("pods", pod("db-0", "prod", "Running"), &pod_keys()).unwrap();

        let removed = store
            .delete_batch("pods", &Condition::eq("namespace", json!("default")), false)
            .unwrap();
        assert_eq!(removed.len(), 2);

        let left = store.get("pods", &Condition::all(), &GetOptions::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].get("name"), Some(&json!("db-0")));
    }

    #[test]
    fn test_delete_range_bounds_update_time() {
        let store = store();
        store.put("events", pod("a", "default", "Running"), &pod_keys()).unwrap();

        // Everything was just written, so a range ending in the past
        // matches nothing and a wide range matches everything.
        let removed = store
            .delete_range("events", &Condition::all(), None, Some(Timestamp(1)), true)
            .unwrap();
        assert!(removed.is_empty());

        let removed = store
            .delete_range(
                "events",
                &Condition::all(),
                Some(Timestamp(1)),
                Some(Timestamp(i64::MAX)),
                true,
            )
            .unwrap();
        assert_eq!(removed.len(), 1);
    }
}
