//! Storage backend seam.
//!
//! The real database driver is an external collaborator; the store only
//! needs the three primitives below, each taking a [`Condition`] that the
//! backend translates through the visitor contract. [`MemoryBackend`] is the
//! in-process implementation and the reference consumer of that contract.

mod matcher;
mod memory;

pub use matcher::{compile_matcher, Matcher};
pub use memory::MemoryBackend;

use crate::condition::Condition;
use crate::error::Result;
use crate::types::Document;

/// Sort direction for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort key, applied in declaration order.
#[derive(Clone, Debug)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Read shaping for [`Backend::find`].
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    /// Top-level fields to keep; empty keeps the whole document.
    pub projection: Vec<String>,
    /// Records to skip after sorting.
    pub offset: usize,
    /// Maximum records to return; 0 means unlimited.
    pub limit: usize,
    /// Sort keys, applied in order.
    pub sort: Vec<SortKey>,
}

/// The driver primitives the store is built on.
///
/// Every mutation is one atomic backend operation; the store never splits an
/// upsert or a remove across round trips a concurrent writer could
/// interleave with.
pub trait Backend: Send + Sync {
    /// Return matching documents shaped by `options`. Empty is not an error.
    fn find(&self, table: &str, condition: &Condition, options: &FindOptions)
        -> Result<Vec<Document>>;

    /// Insert-or-replace keyed by `condition`; the newer document wins.
    /// On replace the stored record's `createTime` is preserved. Returns the
    /// document as stored.
    fn upsert(&self, table: &str, condition: &Condition, doc: Document) -> Result<Document>;

    /// Remove matching documents and return them, so callers can observe
    /// exactly what was deleted. Zero matches returns an empty set.
    fn remove(&self, table: &str, condition: &Condition) -> Result<Vec<Document>>;
}
