//! Filter compilation: typed filter specs to condition trees.
//!
//! A filter spec is a plain struct of string fields, one per queryable
//! attribute, where the empty string means "no constraint". Instead of
//! inspecting the struct reflectively at every call, each spec type declares
//! its queryable fields once in a [`FilterTable`]: a list of
//! `(accessor, path, coercion, allow_no_exists)` rules built at startup and
//! passed by reference wherever compilation happens. The table turns a spec
//! value into a correct [`Condition`] with no per-kind query code.
//!
//! Compilation is best-effort and never fails: an unparseable int, bool or
//! timestamp silently omits that one constraint instead of poisoning the
//! whole filter.

use crate::condition::Condition;
use serde_json::{json, Value};
use tracing::debug;

/// How a declared field's string value is coerced before emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coerce {
    /// Split on `,` and emit set membership. Every plain field thereby
    /// supports comma-separated multi-value queries.
    None,
    /// Parse as `i32`, emit equality.
    Int,
    /// Parse as `i64`, emit equality.
    Int64,
    /// Case-insensitive `"true"`/`"1"` is true, anything else false.
    Bool,
    /// Unix-seconds lower bound: emit `Gt` after layout formatting.
    TimeL,
    /// Unix-seconds upper bound: emit `Lt` after layout formatting.
    TimeR,
}

/// How `TimeL`/`TimeR` values are rendered into the condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TimeLayout {
    /// Keep the raw unix seconds as a number.
    #[default]
    Unix,
    /// Render through a chrono format string (e.g. `"%Y-%m-%dT%H:%M:%SZ"`),
    /// for tables whose stored timestamps are formatted text.
    Format(&'static str),
}

impl TimeLayout {
    fn render(&self, secs: i64) -> Option<Value> {
        match self {
            TimeLayout::Unix => Some(json!(secs)),
            TimeLayout::Format(layout) => {
                let time = chrono::DateTime::from_timestamp(secs, 0)?;
                Some(Value::String(time.format(layout).to_string()))
            }
        }
    }
}

/// One declared queryable field of a filter-spec type.
struct FieldRule<S> {
    path: &'static str,
    coerce: Coerce,
    allow_no_exists: bool,
    get: fn(&S) -> &str,
}

/// The declarative field table for one filter-spec type.
///
/// Built once per type (typically in a `table()` associated function on the
/// spec struct) and shared by reference.
pub struct FilterTable<S> {
    rules: Vec<FieldRule<S>>,
    time_layout: TimeLayout,
}

impl<S> FilterTable<S> {
    pub fn builder() -> FilterTableBuilder<S> {
        FilterTableBuilder {
            rules: Vec::new(),
            time_layout: TimeLayout::default(),
        }
    }

    /// Compile one spec value into a condition tree.
    ///
    /// Fields at their zero value contribute nothing; an all-zero spec
    /// compiles to the match-all identity. A single emitted sub-condition is
    /// returned bare, two or more are ANDed in declaration order.
    pub fn compile(&self, spec: &S) -> Condition {
        let mut parts = Vec::new();
        for rule in &self.rules {
            let raw = (rule.get)(spec);
            if raw.is_empty() {
                continue;
            }
            let sub = match self.emit(rule, raw) {
                Some(sub) => sub,
                None => {
                    debug!(path = rule.path, value = raw, "unparseable filter value, constraint omitted");
                    continue;
                }
            };
            let sub = if rule.allow_no_exists {
                Condition::or(vec![sub, Condition::exists(rule.path, false)])
            } else {
                sub
            };
            parts.push(sub);
        }
        match parts.len() {
            0 => Condition::all(),
            1 => parts.remove(0),
            _ => Condition::and(parts),
        }
    }

    fn emit(&self, rule: &FieldRule<S>, raw: &str) -> Option<Condition> {
        match rule.coerce {
            Coerce::None => {
                let values = raw
                    .split(',')
                    .map(|part| Value::String(part.to_string()))
                    .collect();
                Some(Condition::is_in(rule.path, values))
            }
            Coerce::Int => {
                let n: i32 = raw.parse().ok()?;
                Some(Condition::eq(rule.path, json!(n)))
            }
            Coerce::Int64 => {
                let n: i64 = raw.parse().ok()?;
                Some(Condition::eq(rule.path, json!(n)))
            }
            Coerce::Bool => {
                let truthy = raw.eq_ignore_ascii_case("true") || raw == "1";
                Some(Condition::eq(rule.path, Value::Bool(truthy)))
            }
            Coerce::TimeL => {
                let secs: i64 = raw.parse().ok()?;
                Some(Condition::gt(rule.path, self.time_layout.render(secs)?))
            }
            Coerce::TimeR => {
                let secs: i64 = raw.parse().ok()?;
                Some(Condition::lt(rule.path, self.time_layout.render(secs)?))
            }
        }
    }
}

/// Builder for [`FilterTable`]. Declaration order becomes AND order.
pub struct FilterTableBuilder<S> {
    rules: Vec<FieldRule<S>>,
    time_layout: TimeLayout,
}

impl<S> FilterTableBuilder<S> {
    /// Set the layout for `TimeL`/`TimeR` fields.
    pub fn time_layout(mut self, layout: TimeLayout) -> Self {
        self.time_layout = layout;
        self
    }

    /// Declare a field with an explicit coercion.
    pub fn coerced(mut self, path: &'static str, coerce: Coerce, get: fn(&S) -> &str) -> Self {
        self.rules.push(FieldRule {
            path,
            coerce,
            allow_no_exists: false,
            get,
        });
        self
    }

    /// Declare a plain field (comma-separated membership).
    pub fn field(self, path: &'static str, get: fn(&S) -> &str) -> Self {
        self.coerced(path, Coerce::None, get)
    }

    /// Declare a field that also matches records where the path is absent,
    /// for optional fields introduced after existing data was written.
    pub fn optional(
        mut self,
        path: &'static str,
        coerce: Coerce,
        get: fn(&S) -> &str,
    ) -> Self {
        self.rules.push(FieldRule {
            path,
            coerce,
            allow_no_exists: true,
            get,
        });
        self
    }

    pub fn build(self) -> FilterTable<S> {
        FilterTable {
            rules: self.rules,
            time_layout: self.time_layout,
        }
    }
}
