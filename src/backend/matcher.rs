//! Condition evaluation against in-memory documents.
//!
//! This is the reference consumer of the [`ConditionVisitor`] contract: a
//! tree is compiled once into a closure, then applied to any number of
//! documents. Both the memory backend and the watch engine evaluate
//! conditions this way.

use crate::condition::{BranchOp, Condition, ConditionVisitor, LeafOp};
use crate::types::Document;
use serde_json::Value;
use std::cmp::Ordering;

/// A compiled predicate over documents.
pub type Matcher = Box<dyn Fn(&Document) -> bool + Send + Sync>;

/// Compile a condition tree into a matcher closure.
pub fn compile_matcher(condition: &Condition) -> Matcher {
    condition.combine(&mut MatcherCompiler)
}

struct MatcherCompiler;

impl ConditionVisitor for MatcherCompiler {
    type Output = Matcher;

    fn leaf(&mut self, op: LeafOp, field: &str, value: &Value) -> Matcher {
        // Tr is the identity filter: no predicate, not "match nothing".
        if op == LeafOp::Tr {
            return Box::new(|_| true);
        }
        let field = field.to_string();
        let value = value.clone();
        match op {
            LeafOp::Eq | LeafOp::Mat => Box::new(move |doc| {
                doc.get_path(&field).is_some_and(|actual| loose_eq(actual, &value))
            }),
            LeafOp::Ne => Box::new(move |doc| {
                !doc.get_path(&field).is_some_and(|actual| loose_eq(actual, &value))
            }),
            LeafOp::Lt => compare(field, value, |ord| ord == Ordering::Less),
            LeafOp::Lte => compare(field, value, |ord| ord != Ordering::Greater),
            LeafOp::Gt => compare(field, value, |ord| ord == Ordering::Greater),
            LeafOp::Gte => compare(field, value, |ord| ord != Ordering::Less),
            LeafOp::In => Box::new(move |doc| {
                doc.get_path(&field)
                    .is_some_and(|actual| in_set(actual, &value))
            }),
            LeafOp::Nin => Box::new(move |doc| {
                !doc.get_path(&field)
                    .is_some_and(|actual| in_set(actual, &value))
            }),
            LeafOp::Con => Box::new(move |doc| {
                match (doc.get_path(&field), value.as_str()) {
                    (Some(Value::String(actual)), Some(needle)) => actual.contains(needle),
                    _ => false,
                }
            }),
            LeafOp::Ext => {
                let want_present = value.as_bool().unwrap_or(true);
                Box::new(move |doc| doc.get_path(&field).is_some() == want_present)
            }
            LeafOp::Typ => Box::new(move |doc| {
                match (doc.get_path(&field), value.as_str()) {
                    (Some(actual), Some(name)) => type_name(actual) == name,
                    _ => false,
                }
            }),
            LeafOp::Tr => unreachable!("handled above"),
        }
    }

    fn branch(&mut self, op: BranchOp, children: &[Condition]) -> Matcher {
        let compiled: Vec<Matcher> = children.iter().map(|c| c.combine(self)).collect();
        match op {
            BranchOp::And => Box::new(move |doc| compiled.iter().all(|m| m(doc))),
            BranchOp::Or => Box::new(move |doc| compiled.iter().any(|m| m(doc))),
            BranchOp::Nor => Box::new(move |doc| !compiled.iter().any(|m| m(doc))),
            BranchOp::Not => {
                debug_assert_eq!(compiled.len(), 1, "Not takes exactly one child");
                Box::new(move |doc| !compiled.iter().all(|m| m(doc)))
            }
        }
    }
}

fn compare(field: String, value: Value, accept: fn(Ordering) -> bool) -> Matcher {
    Box::new(move |doc| {
        doc.get_path(&field)
            .and_then(|actual| partial_cmp_values(actual, &value))
            .is_some_and(accept)
    })
}

/// Equality that treats `1` and `1.0` as the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn in_set(actual: &Value, candidates: &Value) -> bool {
    match candidates {
        Value::Array(items) => items.iter().any(|item| loose_eq(actual, item)),
        single => loose_eq(actual, single),
    }
}

/// Ordering between comparable values; None for mixed or unordered types.
fn partial_cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting: type rank first, then within-type compare.
/// Missing fields sort before present ones under ascending order.
pub(crate) fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => {
            let rank = |v: &Value| match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Array(_) => 4,
                Value::Object(_) => 5,
            };
            rank(x)
                .cmp(&rank(y))
                .then_with(|| partial_cmp_values(x, y).unwrap_or(Ordering::Equal))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value)
    }

    #[test]
    fn test_match_all_matches_everything() {
        let m = compile_matcher(&Condition::all());
        assert!(m(&doc(json!({}))));
        assert!(m(&doc(json!({"anything": 1}))));
    }

    #[test]
    fn test_eq_is_numeric_loose() {
        let m = compile_matcher(&Condition::eq("n", json!(1)));
        assert!(m(&doc(json!({"n": 1}))));
        assert!(m(&doc(json!({"n": 1.0}))));
        assert!(!m(&doc(json!({"n": 2}))));
        assert!(!m(&doc(json!({}))));
    }

    #[test]
    fn test_ne_matches_missing_field() {
        let m = compile_matcher(&Condition::ne("phase", json!("Running")));
        assert!(m(&doc(json!({"phase": "Pending"}))));
        assert!(m(&doc(json!({}))));
        assert!(!m(&doc(json!({"phase": "Running"}))));
    }

    #[test]
    fn test_range_operators() {
        let m = compile_matcher(&Condition::and(vec![
            Condition::gt("updateTime", json!(100)),
            Condition::lte("updateTime", json!(200)),
        ]));
        assert!(m(&doc(json!({"updateTime": 150}))));
        assert!(m(&doc(json!({"updateTime": 200}))));
        assert!(!m(&doc(json!({"updateTime": 100}))));
        assert!(!m(&doc(json!({"updateTime": 250}))));
    }

    #[test]
    fn test_in_nin() {
        let m = compile_matcher(&Condition::is_in(
            "namespace",
            vec![json!("default"), json!("kube-system")],
        ));
        assert!(m(&doc(json!({"namespace": "kube-system"}))));
        assert!(!m(&doc(json!({"namespace": "dev"}))));

        let m = compile_matcher(&Condition::nin("namespace", vec![json!("dev")]));
        assert!(m(&doc(json!({"namespace": "prod"}))));
        assert!(m(&doc(json!({}))));
        assert!(!m(&doc(json!({"namespace": "dev"}))));
    }

    #[test]
    fn test_contains_and_type() {
        let m = compile_matcher(&Condition::contains("name", "web"));
        assert!(m(&doc(json!({"name": "web-frontend"}))));
        assert!(!m(&doc(json!({"name": "db"}))));
        assert!(!m(&doc(json!({"name": 7}))));

        let m = compile_matcher(&Condition::has_type("replicas", "number"));
        assert!(m(&doc(json!({"replicas": 3}))));
        assert!(!m(&doc(json!({"replicas": "3"}))));
        assert!(!m(&doc(json!({}))));
    }

    #[test]
    fn test_exists_false_matches_absent() {
        let m = compile_matcher(&Condition::exists("zone", false));
        assert!(m(&doc(json!({}))));
        assert!(!m(&doc(json!({"zone": "us-east"}))));
    }

    #[test]
    fn test_nested_path_match() {
        let m = compile_matcher(&Condition::eq("data.metadata.name", json!("web-0")));
        assert!(m(&doc(json!({"data": {"metadata": {"name": "web-0"}}}))));
        assert!(!m(&doc(json!({"data": {"metadata": {}}}))));
    }

    #[test]
    fn test_boolean_combinators() {
        let a = Condition::eq("a", json!(1));
        let b = Condition::eq("b", json!(2));

        let m = compile_matcher(&Condition::nor(vec![a.clone(), b.clone()]));
        assert!(m(&doc(json!({"a": 9, "b": 9}))));
        assert!(!m(&doc(json!({"a": 1, "b": 9}))));

        let m = compile_matcher(&Condition::not(a));
        assert!(m(&doc(json!({"a": 2}))));
        assert!(!m(&doc(json!({"a": 1}))));
    }
}
