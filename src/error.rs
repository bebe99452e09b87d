//! Error types for the resource store.

use thiserror::Error;

/// Main error type for store operations.
///
/// Zero matches is not an error for reads (empty set) and is suppressed for
/// deletes under `ignore_not_found`. Watch termination is signaled in-band
/// via [`crate::watch::StreamSignal::Terminate`], not through this type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An upsert conflicted with the uniqueness of a feature key.
    /// Distinguishable so callers can map it to an "already exists" response.
    #[error("Duplicate key in table '{table}': {detail}")]
    DuplicateKey { table: String, detail: String },

    /// A delete matched nothing and the caller did not opt out with
    /// `ignore_not_found`.
    #[error("No matching documents in table '{table}'")]
    NotFound { table: String },

    /// Opaque backend failure. Always propagated, never swallowed.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True if this error maps to a conflict ("already exists") response.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
