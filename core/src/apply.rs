//! C3: applies a patch (an ordered list of [`Operation`]s) to a [`Value`].

use crate::error::{PatchError, Result};
use crate::op::Operation;
use crate::pointer::{AutoCreate, PointerBuf};
use crate::registry::Registry;
use crate::semantics::Prior;
use serde_json::Value;

/// Options controlling `apply`, per §4.3 and §6 "Configuration".
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Errors abort the whole patch (the default when neither `silent` nor
    /// `rigid` is set).
    pub strict: bool,
    /// Per-op errors are logged and the remaining ops still apply.
    pub silent: bool,
    /// On any error, the entire patch is rolled back and the pre-patch value
    /// is returned unchanged.
    pub rigid: bool,
    /// Every op's path is prefixed with this pointer before it is applied.
    pub at_path: Option<PointerBuf>,
}

impl ApplyOptions {
    pub fn strict() -> Self {
        Self { strict: true, ..Default::default() }
    }

    pub fn silent() -> Self {
        Self { silent: true, ..Default::default() }
    }

    pub fn rigid() -> Self {
        Self { rigid: true, ..Default::default() }
    }
}

/// Applies `ops` to `value`, returning the new value. `value` is never
/// mutated in place; on success the caller's original is dropped and the
/// new root returned.
pub fn apply(registry: &Registry, value: &Value, ops: &[Operation], opts: &ApplyOptions) -> Result<Value> {
    if opts.rigid {
        let mut working = value.clone();
        match apply_in_place(registry, &mut working, ops, opts) {
            Ok(()) => Ok(working),
            Err(err) => {
                tracing::warn!(error = %err, "rigid apply rolled back");
                Ok(value.clone())
            }
        }
    } else {
        let mut working = value.clone();
        apply_in_place(registry, &mut working, ops, opts)?;
        Ok(working)
    }
}

fn apply_in_place(registry: &Registry, value: &mut Value, ops: &[Operation], opts: &ApplyOptions) -> Result<()> {
    for op in ops {
        let op = if let Some(prefix) = &opts.at_path {
            rewrite_op_path(op, prefix)
        } else {
            op.clone()
        };
        match apply_one(registry, value, &op) {
            Ok(()) => {}
            Err(err) if opts.silent && !opts.strict => {
                tracing::warn!(error = %err, op = op.kind(), "silent apply: dropping failed op");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn rewrite_op_path(op: &Operation, prefix: &PointerBuf) -> Operation {
    let mut op = op.clone();
    let new_path = prefix.join(op.path());
    op = op.with_path(new_path);
    if let Operation::Copy { from, .. } | Operation::Move { from, .. } = &mut op {
        *from = prefix.join(from);
    }
    op
}

/// Applies a single op in place, for callers (like `compose::invert`) that
/// are threading their own forward walk over the state.
pub fn apply_single(registry: &Registry, value: &mut Value, op: &Operation) -> Result<()> {
    apply_one(registry, value, op)
}

fn apply_one(registry: &Registry, value: &mut Value, op: &Operation) -> Result<()> {
    match op {
        Operation::Copy { from, path, ts } => {
            let src = crate::pointer::traverse(value, from)?.clone();
            let add = Operation::Add { path: path.clone(), value: src, ts: *ts, soft: None };
            apply_one(registry, value, &add)
        }
        Operation::Move { from, path, .. } => apply_move(registry, value, from, path),
        _ => {
            let path = op.path().clone();
            if op.is_soft() && soft_target_occupied(value, &path) {
                return Ok(());
            }
            // A root replace has no parent to traverse to; it assigns the
            // whole value directly.
            if path.is_root() {
                if let Operation::Replace { value: new_value, .. } = op {
                    *value = new_value.clone();
                    return Ok(());
                }
            }
            let policy = match op {
                Operation::Add { .. } => AutoCreate::FirstElementAware,
                Operation::Replace { .. } => AutoCreate::MappingsOnly,
                _ => AutoCreate::None,
            };
            let (parent, key) = crate::pointer::traverse_parent_mut(value, &path, policy)?;
            registry.apply(parent, key, op).map(|_: Prior| ())
        }
    }
}

/// Soft ops are dropped if data already sits at or below their target.
fn soft_target_occupied(value: &Value, path: &PointerBuf) -> bool {
    match crate::pointer::traverse(value, path) {
        Ok(v) => !matches!(v, Value::Null),
        Err(_) => false,
    }
}

fn apply_move(registry: &Registry, value: &mut Value, from: &PointerBuf, to: &PointerBuf) -> Result<()> {
    let src = crate::pointer::traverse(value, from)?.clone();
    let remove = Operation::Remove { path: from.clone(), ts: None };
    apply_one_leaf_only(registry, value, &remove)?;
    let corrected_to = correct_index_after_remove(from, to);
    let add = Operation::Add { path: corrected_to, value: src, ts: None, soft: None };
    apply_one_leaf_only(registry, value, &add)
}

fn apply_one_leaf_only(registry: &Registry, value: &mut Value, op: &Operation) -> Result<()> {
    if let Operation::Replace { path, value: new_value, .. } = op {
        if path.is_root() {
            *value = new_value.clone();
            return Ok(());
        }
    }
    let path = op.path().clone();
    let policy = match op {
        Operation::Add { .. } => AutoCreate::FirstElementAware,
        _ => AutoCreate::None,
    };
    let (parent, key) = crate::pointer::traverse_parent_mut(value, &path, policy)?;
    registry.apply(parent, key, op).map(|_| ())
}

/// If `from` and `to` share a sequence parent, removing `from` first shifts
/// indices past it down by one.
fn correct_index_after_remove(from: &PointerBuf, to: &PointerBuf) -> PointerBuf {
    let (Some(from_parent), Some(to_parent)) = (from.parent(), to.parent()) else {
        return to.clone();
    };
    if from_parent != to_parent {
        return to.clone();
    }
    let (Some(from_idx), Some(to_idx)) = (from.last().and_then(|s| s.parse::<i64>().ok()), to.last()) else {
        return to.clone();
    };
    if to_idx == "-" {
        return to.clone();
    }
    let Ok(to_idx) = to_idx.parse::<i64>() else { return to.clone() };
    if to_idx > from_idx {
        to_parent.push((to_idx - 1).to_string())
    } else {
        to.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_identity() {
        let registry = Registry::new();
        let v = json!({"a": 1});
        let out = apply(&registry, &v, &[], &ApplyOptions::strict()).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn root_replace_assigns_whole_value() {
        let registry = Registry::new();
        let v = Value::Null;
        let ops = vec![Operation::Replace { path: PointerBuf::root(), value: json!({"x": 1}), ts: None, soft: None }];
        let out = apply(&registry, &v, &ops, &ApplyOptions::strict()).unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[test]
    fn move_within_same_sequence_shifts_index() {
        let registry = Registry::new();
        let v = json!({"matrix": [[0,1,2],[3,4,5]]});
        let ops = vec![Operation::Move {
            from: PointerBuf::parse("/matrix/1/0").unwrap(),
            path: PointerBuf::parse("/matrix/0/-").unwrap(),
            ts: None,
        }];
        let out = apply(&registry, &v, &ops, &ApplyOptions::strict()).unwrap();
        assert_eq!(out, json!({"matrix": [[0,1,2,3],[4,5]]}));
    }

    #[test]
    fn rigid_rolls_back_on_error() {
        let registry = Registry::new();
        let v = json!({"a": 1});
        let ops = vec![Operation::Remove { path: PointerBuf::parse("/missing").unwrap(), ts: None }];
        let out = apply(&registry, &v, &ops, &ApplyOptions::rigid()).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn silent_skips_failed_op_and_continues() {
        let registry = Registry::new();
        let v = json!({"a": 1});
        let ops = vec![
            Operation::Remove { path: PointerBuf::parse("/missing").unwrap(), ts: None },
            Operation::Add { path: PointerBuf::parse("/b").unwrap(), value: json!(2), ts: None, soft: None },
        ];
        let out = apply(&registry, &v, &ops, &ApplyOptions::silent()).unwrap();
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn add_first_element_creates_array() {
        let registry = Registry::new();
        let v = json!({});
        let ops = vec![Operation::Add {
            path: PointerBuf::parse("/list/0").unwrap(),
            value: json!("x"),
            ts: None,
            soft: None,
        }];
        let out = apply(&registry, &v, &ops, &ApplyOptions::strict()).unwrap();
        assert_eq!(out, json!({"list": ["x"]}));
    }
}
