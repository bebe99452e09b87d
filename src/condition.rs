//! Condition trees: immutable, backend-agnostic query predicates.
//!
//! A condition is either a leaf (one terminal test against a dotted field
//! path) or a branch (a logical combinator over child conditions). Trees are
//! built programmatically, never parsed from untrusted text, and are walked
//! through a single visitor entry point, [`Condition::combine`]. Backends
//! (document store, SQL, in-memory) translate trees by supplying the leaf and
//! branch halves of the visitor; the tree itself knows nothing about storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal test operators. Leaves carry a field path and a value payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Set membership: value is an array of candidates.
    In,
    /// Negated set membership.
    Nin,
    /// Substring containment.
    Con,
    /// Field existence test: value is `true` (must exist) or `false`.
    Ext,
    /// Dynamic type test: value names a JSON type ("string", "number", ...).
    Typ,
    /// Identity filter. With an empty field this matches everything;
    /// backends must translate it to "no predicate", not "match nothing".
    Tr,
    /// Marks a test destined for a streaming match stage. Static backends
    /// evaluate it as a plain equality.
    Mat,
}

/// Logical combinators over child conditions.
///
/// Contract: `Not` takes exactly one child; the others take one or more.
/// Violations are programming errors, not recoverable runtime failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchOp {
    And,
    Or,
    Nor,
    Not,
}

/// A node in the predicate tree.
///
/// The leaf/branch distinction is carried by the variant, so a node is a
/// leaf if and only if it has no children by construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum Condition {
    Leaf {
        op: LeafOp,
        field: String,
        value: Value,
    },
    Branch {
        op: BranchOp,
        children: Vec<Condition>,
    },
}

/// Backend translation of a condition tree.
///
/// [`Condition::combine`] dispatches purely on structure: a leaf invokes
/// [`leaf`](ConditionVisitor::leaf), a branch invokes
/// [`branch`](ConditionVisitor::branch). Branch implementations recurse by
/// calling `combine` on each child.
pub trait ConditionVisitor {
    type Output;

    fn leaf(&mut self, op: LeafOp, field: &str, value: &Value) -> Self::Output;

    fn branch(&mut self, op: BranchOp, children: &[Condition]) -> Self::Output;
}

impl Condition {
    /// Build a terminal node.
    pub fn leaf(op: LeafOp, field: impl Into<String>, value: Value) -> Self {
        Condition::Leaf {
            op,
            field: field.into(),
            value,
        }
    }

    /// Build a combinator node.
    pub fn branch(op: BranchOp, children: Vec<Condition>) -> Self {
        debug_assert!(
            op != BranchOp::Not || children.len() == 1,
            "Not takes exactly one child"
        );
        debug_assert!(!children.is_empty(), "branch requires children");
        Condition::Branch { op, children }
    }

    /// The identity filter: matches every document.
    pub fn all() -> Self {
        Condition::Leaf {
            op: LeafOp::Tr,
            field: String::new(),
            value: Value::Null,
        }
    }

    /// True if this is the identity filter.
    pub fn is_match_all(&self) -> bool {
        matches!(
            self,
            Condition::Leaf { op: LeafOp::Tr, field, .. } if field.is_empty()
        )
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Eq, field, value)
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Ne, field, value)
    }

    pub fn lt(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Lt, field, value)
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Lte, field, value)
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Gt, field, value)
    }

    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Gte, field, value)
    }

    /// Set membership over an array of candidate values.
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::leaf(LeafOp::In, field, Value::Array(values))
    }

    pub fn nin(field: impl Into<String>, values: Vec<Value>) -> Self {
        Condition::leaf(LeafOp::Nin, field, Value::Array(values))
    }

    /// Substring containment against a string field.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Condition::leaf(LeafOp::Con, field, Value::String(needle.into()))
    }

    /// Field existence (or, with `false`, absence).
    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Condition::leaf(LeafOp::Ext, field, Value::Bool(present))
    }

    /// Dynamic type test against a JSON type name.
    pub fn has_type(field: impl Into<String>, type_name: impl Into<String>) -> Self {
        Condition::leaf(LeafOp::Typ, field, Value::String(type_name.into()))
    }

    /// Equality earmarked for a streaming match stage.
    pub fn match_stage(field: impl Into<String>, value: Value) -> Self {
        Condition::leaf(LeafOp::Mat, field, value)
    }

    pub fn and(children: Vec<Condition>) -> Self {
        Condition::branch(BranchOp::And, children)
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Condition::branch(BranchOp::Or, children)
    }

    pub fn nor(children: Vec<Condition>) -> Self {
        Condition::branch(BranchOp::Nor, children)
    }

    pub fn not(child: Condition) -> Self {
        Condition::branch(BranchOp::Not, vec![child])
    }

    /// Walk this node through a visitor. The sole extension point for
    /// backends: a leaf dispatches to `leaf`, a branch to `branch`, nothing
    /// else happens here.
    pub fn combine<V: ConditionVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Condition::Leaf { op, field, value } => visitor.leaf(*op, field, value),
            Condition::Branch { op, children } => visitor.branch(*op, children),
        }
    }
}
