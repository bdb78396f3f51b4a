//! The operator table: a plain map keyed by operator name (§9
//! "Operator extensibility"). The ten built-in kinds are dispatched directly
//! (they're a closed Rust enum, so there is no real ambiguity to resolve at
//! runtime), but the same `Operator` trait used internally is exposed so a
//! host application can register additional kinds and have them take part
//! in `apply`/`invert`/`compose` through the registry. The server must know
//! every operator it transforms; an operator kind with no registry entry
//! logs and passes through unchanged (§9).

use crate::op::Operation;
use crate::semantics::{self, Prior};
use serde_json::Value;
use std::collections::HashMap;

/// The four functions every operator kind provides (`transform` is handled
/// separately by the transform engine, which needs both sides of a pair at
/// once rather than a single operator's view).
pub trait Operator: Send + Sync {
    fn apply(&self, container: &mut Value, key: &str, op: &Operation) -> crate::error::Result<Prior>;
    fn invert(&self, prior: &Prior, op: &Operation) -> Vec<Operation>;
    fn compose(&self, a: &Operation, b: &Operation) -> Option<Operation>;
}

struct BuiltinOperator;

impl Operator for BuiltinOperator {
    fn apply(&self, container: &mut Value, key: &str, op: &Operation) -> crate::error::Result<Prior> {
        semantics::apply_leaf(container, key, op)
    }

    fn invert(&self, prior: &Prior, op: &Operation) -> Vec<Operation> {
        semantics::invert_leaf(prior, op)
    }

    fn compose(&self, a: &Operation, b: &Operation) -> Option<Operation> {
        semantics::compose_pair(a, b)
    }
}

const BUILTIN_KINDS: &[&str] = &[
    "add", "remove", "replace", "copy", "move", "@txt", "@inc", "@bit", "@max", "@min",
];

/// A table of operator kinds, pre-populated with the ten built-ins.
#[derive(Default)]
pub struct Registry {
    custom: HashMap<String, Box<dyn Operator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom operator kind. Panics if the kind shadows a
    /// built-in, since the built-ins are dispatched without consulting this
    /// table (the panic catches the mistake at setup time, not in the hot
    /// path).
    pub fn register(&mut self, kind: impl Into<String>, operator: Box<dyn Operator>) {
        let kind = kind.into();
        assert!(!BUILTIN_KINDS.contains(&kind.as_str()), "{kind} is a built-in operator");
        self.custom.insert(kind, operator);
    }

    pub fn is_known(&self, kind: &str) -> bool {
        BUILTIN_KINDS.contains(&kind) || self.custom.contains_key(kind)
    }

    fn operator_for(&self, kind: &str) -> Option<&dyn Operator> {
        if BUILTIN_KINDS.contains(&kind) {
            Some(&BuiltinOperator)
        } else {
            self.custom.get(kind).map(|b| b.as_ref())
        }
    }

    pub fn apply(&self, container: &mut Value, key: &str, op: &Operation) -> crate::error::Result<Prior> {
        match self.operator_for(op.kind()) {
            Some(operator) => operator.apply(container, key, op),
            None => {
                tracing::warn!(kind = op.kind(), "unknown operator, passing through unapplied");
                Ok(Prior::NoOp)
            }
        }
    }

    pub fn invert(&self, prior: &Prior, op: &Operation) -> Vec<Operation> {
        match self.operator_for(op.kind()) {
            Some(operator) => operator.invert(prior, op),
            None => vec![],
        }
    }

    pub fn compose(&self, a: &Operation, b: &Operation) -> Option<Operation> {
        match self.operator_for(a.kind()) {
            Some(operator) if a.kind() == b.kind() || matches!(b.kind(), "replace" | "remove") => {
                operator.compose(a, b)
            }
            _ => None,
        }
    }
}
