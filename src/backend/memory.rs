//! In-memory backend: one document list per table, guarded by a single
//! read-write lock so each upsert or remove is one atomic operation.

use super::matcher::{cmp_values, compile_matcher};
use super::{Backend, FindOptions, SortOrder};
use crate::condition::Condition;
use crate::error::{Result, StoreError};
use crate::types::{Document, CREATE_TIME_FIELD};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Table-per-resource-type document storage with no enforced schema.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored in a table.
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |docs| docs.len())
    }
}

impl Backend for MemoryBackend {
    fn find(
        &self,
        table: &str,
        condition: &Condition,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let matches = compile_matcher(condition);
        let tables = self.tables.read();
        let mut found: Vec<Document> = tables
            .get(table)
            .map(|docs| docs.iter().filter(|d| matches(d)).cloned().collect())
            .unwrap_or_default();
        drop(tables);

        if !options.sort.is_empty() {
            found.sort_by(|a, b| {
                for key in &options.sort {
                    let ord = cmp_values(a.get_path(&key.field), b.get_path(&key.field));
                    let ord = match key.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let mut shaped: Vec<Document> = found
            .into_iter()
            .skip(options.offset)
            .map(|d| d.project(&options.projection))
            .collect();
        if options.limit > 0 {
            shaped.truncate(options.limit);
        }
        Ok(shaped)
    }

    fn upsert(&self, table: &str, condition: &Condition, doc: Document) -> Result<Document> {
        let matches = compile_matcher(condition);
        let mut tables = self.tables.write();
        let docs = tables.entry(table.to_string()).or_default();

        let hits: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| matches(d))
            .map(|(i, _)| i)
            .collect();

        match hits.len() {
            0 => {
                docs.push(doc.clone());
                Ok(doc)
            }
            1 => {
                // Last writer wins, but the original createTime survives.
                let mut stored = doc;
                if let Some(created) = docs[hits[0]].get(CREATE_TIME_FIELD) {
                    stored.insert(CREATE_TIME_FIELD, created.clone());
                }
                docs[hits[0]] = stored.clone();
                Ok(stored)
            }
            n => Err(StoreError::DuplicateKey {
                table: table.to_string(),
                detail: format!("upsert condition matches {} documents", n),
            }),
        }
    }

    fn remove(&self, table: &str, condition: &Condition) -> Result<Vec<Document>> {
        let matches = compile_matcher(condition);
        let mut tables = self.tables.write();
        let Some(docs) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let mut removed = Vec::new();
        docs.retain(|d| {
            if matches(d) {
                removed.push(d.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
