//! C5: patch-sequence `compose` (fold adjacent mergeable ops) and `invert`
//! (produce the undo sequence against a prior state).

use crate::error::Result;
use crate::op::Operation;
use crate::pointer::{AutoCreate, PointerBuf};
use crate::registry::Registry;
use serde_json::Value;

/// Folds `patch` left to right, merging adjacent ops on the same path when
/// the registry's `compose` says they combine. A `replace`/`remove`
/// absorbs any earlier op on its own subtree (not just the exact path),
/// since the earlier op's effect is entirely superseded. The reverse also
/// holds: an earlier `replace`/`add` that already covers a later op's path
/// absorbs it by folding the later op straight into the carried value,
/// rather than keeping both as separate list entries.
pub fn compose(registry: &Registry, patch: &[Operation]) -> Vec<Operation> {
    let mut out: Vec<Operation> = Vec::with_capacity(patch.len());
    'next_op: for op in patch {
        // A replace/remove at `p` absorbs any prior op at or under `p`.
        if matches!(op, Operation::Replace { .. } | Operation::Remove { .. }) {
            out.retain(|existing| !existing.path().starts_with(op.path()));
        }
        if let Some(last) = out.last() {
            if last.path() == op.path() {
                if let Some(merged) = registry.compose(last, op) {
                    *out.last_mut().unwrap() = merged;
                    continue 'next_op;
                }
            }
        }
        if !matches!(op, Operation::Copy { .. } | Operation::Move { .. }) {
            if let Some(ancestor) = out.iter_mut().rev().find(|existing| {
                matches!(existing, Operation::Replace { .. } | Operation::Add { .. })
                    && op.path().is_descendant_of(existing.path())
            }) {
                let rel = relative_path(ancestor.path(), op.path());
                let rebased = op.clone().with_path(rel);
                let carried = match ancestor {
                    Operation::Replace { value, .. } | Operation::Add { value, .. } => value,
                    _ => unreachable!("filtered to replace/add above"),
                };
                if crate::apply::apply_single(registry, carried, &rebased).is_ok() {
                    continue 'next_op;
                }
            }
        }
        out.push(op.clone());
    }
    out
}

/// `full`'s tokens with `ancestor`'s shared prefix stripped, for rebasing an
/// absorbed op onto the ancestor's own carried value.
fn relative_path(ancestor: &PointerBuf, full: &PointerBuf) -> PointerBuf {
    PointerBuf::from_tokens(full.tokens()[ancestor.len()..].to_vec())
}

/// Walks `patch` against `state`, snapshotting prior values as it goes, and
/// returns the sequence that undoes it (in reverse application order).
pub fn invert(registry: &Registry, state: &Value, patch: &[Operation]) -> Result<Vec<Operation>> {
    let mut working = state.clone();
    let mut undo = Vec::with_capacity(patch.len());
    for op in patch {
        let ops = invert_one(registry, &mut working, op)?;
        undo.splice(0..0, ops);
    }
    Ok(undo)
}

fn invert_one(registry: &Registry, value: &mut Value, op: &Operation) -> Result<Vec<Operation>> {
    match op {
        Operation::Copy { path, .. } => {
            // Copy only ever adds at `path`; undo is a plain remove, then apply.
            let undo = vec![Operation::Remove { path: path.clone(), ts: None }];
            crate::apply::apply_single(registry, value, op)?;
            Ok(undo)
        }
        Operation::Move { from, path, .. } => {
            let undo = vec![Operation::Move { from: path.clone(), path: from.clone(), ts: None }];
            crate::apply::apply_single(registry, value, op)?;
            Ok(undo)
        }
        _ => {
            let path = op.path().clone();
            let policy = match op {
                Operation::Add { .. } => AutoCreate::FirstElementAware,
                Operation::Replace { .. } => AutoCreate::MappingsOnly,
                _ => AutoCreate::None,
            };
            let (parent, key) = crate::pointer::traverse_parent_mut(value, &path, policy)?;
            let prior = registry.apply(parent, key, op)?;
            Ok(registry.invert(&prior, op))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compose_sums_adjacent_inc() {
        let registry = Registry::new();
        let patch = vec![
            Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 3.0, ts: None },
            Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 2.0, ts: None },
        ];
        let composed = compose(&registry, &patch);
        assert_eq!(composed.len(), 1);
        assert_eq!(composed[0], Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 5.0, ts: None });
    }

    #[test]
    fn replace_absorbs_descendant_ops() {
        let registry = Registry::new();
        let patch = vec![
            Operation::Add { path: PointerBuf::parse("/a/b").unwrap(), value: json!(1), ts: None, soft: None },
            Operation::Replace { path: PointerBuf::parse("/a").unwrap(), value: json!({"c": 2}), ts: None, soft: None },
        ];
        let composed = compose(&registry, &patch);
        assert_eq!(composed.len(), 1);
        assert!(matches!(composed[0], Operation::Replace { .. }));
    }

    #[test]
    fn earlier_replace_absorbs_later_descendant_write() {
        let registry = Registry::new();
        let patch = vec![
            Operation::Replace { path: PointerBuf::parse("/doc").unwrap(), value: json!({"a": 1}), ts: None, soft: None },
            Operation::Replace { path: PointerBuf::parse("/doc/a").unwrap(), value: json!(2), ts: None, soft: None },
        ];
        let composed = compose(&registry, &patch);
        assert_eq!(composed.len(), 1);
        assert_eq!(
            composed[0],
            Operation::Replace { path: PointerBuf::parse("/doc").unwrap(), value: json!({"a": 2}), ts: None, soft: None }
        );
    }

    #[test]
    fn earlier_add_absorbs_later_descendant_add() {
        let registry = Registry::new();
        let patch = vec![
            Operation::Add { path: PointerBuf::parse("/obj").unwrap(), value: json!({}), ts: None, soft: None },
            Operation::Add { path: PointerBuf::parse("/obj/x").unwrap(), value: json!(1), ts: None, soft: None },
        ];
        let composed = compose(&registry, &patch);
        assert_eq!(composed.len(), 1);
        assert_eq!(
            composed[0],
            Operation::Add { path: PointerBuf::parse("/obj").unwrap(), value: json!({"x": 1}), ts: None, soft: None }
        );
    }

    #[test]
    fn invert_round_trips() {
        let registry = Registry::new();
        let v = json!({"x": 1});
        let patch = vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(2), ts: None, soft: None }];
        let undo = invert(&registry, &v, &patch).unwrap();
        let forward = crate::apply::apply(&registry, &v, &patch, &crate::apply::ApplyOptions::strict()).unwrap();
        let back = crate::apply::apply(&registry, &forward, &undo, &crate::apply::ApplyOptions::strict()).unwrap();
        assert_eq!(back, v);
    }
}
