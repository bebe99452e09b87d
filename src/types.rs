//! Core types for the resource store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Field stamped by the store on first insert.
pub const CREATE_TIME_FIELD: &str = "createTime";

/// Field stamped by the store on every write.
pub const UPDATE_TIME_FIELD: &str = "updateTime";

/// Seconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_secs() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Identity of a writing session, matched against `self_only` watches.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SessionId(pub u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Unique identifier for a watch subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

impl fmt::Debug for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchId({})", self.0)
    }
}

/// A schema-less resource record.
///
/// Flat feature fields live at the top level next to an arbitrary nested
/// `data` payload and the store-stamped `createTime`/`updateTime`. There is
/// no compiled schema: a document is whatever its ingestion caller wrote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Document(pub Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Build a document from raw JSON. Non-object values become an empty doc.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Document(map),
            _ => Document(Map::new()),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Set a top-level field, replacing any existing value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Get a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Resolve a dotted path (`data.metadata.name`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Derive the upsert-identity string for the named feature fields.
    ///
    /// Key order in `feature_keys` is irrelevant: segments are emitted in
    /// sorted field order so two callers naming the same set agree.
    pub fn feature_key(&self, feature_keys: &[String]) -> String {
        let mut keys: Vec<&String> = feature_keys.iter().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(key);
            out.push('=');
            match self.0.get(key.as_str()) {
                Some(Value::String(s)) => out.push_str(s),
                Some(v) => out.push_str(&v.to_string()),
                None => {}
            }
        }
        out
    }

    /// Project down to the named top-level paths. Empty projection keeps all.
    pub fn project(&self, projection: &[String]) -> Document {
        if projection.is_empty() {
            return self.clone();
        }
        let mut out = Map::new();
        for path in projection {
            if let Some(value) = self.0.get(path.as_str()) {
                out.insert(path.clone(), value.clone());
            }
        }
        Document(out)
    }

    /// Compare the caller-visible content of two documents, ignoring the
    /// store-stamped timestamps. Used for no-op write suppression.
    pub fn same_content(&self, other: &Document) -> bool {
        let skip = |k: &str| k == CREATE_TIME_FIELD || k == UPDATE_TIME_FIELD;
        let count = |d: &Document| d.0.keys().filter(|k| !skip(k)).count();
        if count(self) != count(other) {
            return false;
        }
        self.0
            .iter()
            .filter(|(k, _)| !skip(k))
            .all(|(k, v)| other.0.get(k) == Some(v))
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}
