//! C4: the OT transform engine. `transform(state_before_a, a, b)` returns
//! `b` rebased over `a`, i.e. the ops `b` would need to be to preserve its
//! intent had `a` already happened.

use crate::error::Result;
use crate::op::Operation;
use crate::pointer::PointerBuf;
use crate::registry::Registry;
use serde_json::Value;

/// Transforms `b` against `a`, given the state the ops in `a` start from.
/// Deterministic and idempotent: `transform(s, a, []) == []`,
/// `transform(s, [], b) == b`, and neither input list is mutated.
pub fn transform(registry: &Registry, state_before_a: &Value, a: &[Operation], b: &[Operation]) -> Result<Vec<Operation>> {
    let mut state = state_before_a.clone();
    let mut current: Vec<Operation> = b.to_vec();
    for a_op in a {
        let mut next = Vec::with_capacity(current.len());
        for b_op in &current {
            next.extend(transform_pair(&state, a_op, b_op));
        }
        current = next;
        if let Err(err) = crate::apply::apply_single(registry, &mut state, a_op) {
            tracing::warn!(error = %err, op = a_op.kind(), "transform: dropped a-op while advancing probe state");
        }
    }
    Ok(current)
}

fn transform_pair(state: &Value, a: &Operation, b: &Operation) -> Vec<Operation> {
    if b.is_soft() && target_occupied(state, b.path()) {
        return vec![];
    }

    if let Operation::Move { from, path, ts } = a {
        let remove = Operation::Remove { path: from.clone(), ts: *ts };
        let add = Operation::Add { path: path.clone(), value: Value::Null, ts: *ts, soft: None };
        let after_remove: Vec<Operation> = vec![b.clone()]
            .iter()
            .flat_map(|op| transform_pair(state, &remove, op))
            .collect();
        let mut state_after_remove = state.clone();
        let _ = crate::apply::apply_single(&Registry::new(), &mut state_after_remove, &remove);
        return after_remove
            .iter()
            .flat_map(|op| transform_pair(&state_after_remove, &add, op))
            .collect();
    }

    if let Operation::Move { from, path, ts } = b {
        let remove = Operation::Remove { path: from.clone(), ts: *ts };
        let add = Operation::Add { path: path.clone(), value: moved_value(state, from), ts: *ts, soft: None };
        let mut out = transform_pair(state, a, &remove);
        out.extend(transform_pair(state, a, &add));
        return out;
    }

    if let Some((seq_parent, a_idx, b_idx)) = shared_sequence_indices(state, a, b) {
        match a {
            Operation::Add { .. } => {
                return if b_idx >= a_idx {
                    vec![with_index(b, &seq_parent, b_idx + 1)]
                } else {
                    vec![b.clone()]
                };
            }
            Operation::Remove { .. } => {
                if b_idx > a_idx {
                    return vec![with_index(b, &seq_parent, b_idx - 1)];
                }
                if b_idx == a_idx {
                    return match b {
                        Operation::Replace { value, ts, .. } => vec![with_index(
                            &Operation::Add { path: b.path().clone(), value: value.clone(), ts: *ts, soft: None },
                            &seq_parent,
                            a_idx,
                        )],
                        Operation::Remove { .. } => vec![],
                        _ if b.is_combinable() => vec![delta_identity_replace(b)],
                        _ => vec![b.clone()],
                    };
                }
                return vec![b.clone()];
            }
            _ => {}
        }
    }

    if a.path() != b.path() {
        if b.path().is_descendant_of(a.path()) {
            match a {
                Operation::Replace { .. } => return vec![],
                Operation::Remove { .. } => {
                    return if b.is_combinable() {
                        vec![delta_identity_replace(b)]
                    } else {
                        vec![]
                    };
                }
                _ => {}
            }
        }
        return vec![b.clone()];
    }

    // Same path, same or differing operator kind.
    if let (Operation::Txt { delta: a_delta, .. }, Operation::Txt { delta: b_delta, ts, .. }) = (a, b) {
        return match a_delta.transform(b_delta) {
            Ok((_a_prime, b_prime)) => vec![Operation::Txt { path: b.path().clone(), delta: b_prime, ts: *ts }],
            Err(_) => vec![b.clone()],
        };
    }

    // Two adds on the same non-sequence key, or any other same-path pair not
    // specially handled above: B survives unchanged (§4.4).
    vec![b.clone()]
}

fn target_occupied(state: &Value, path: &PointerBuf) -> bool {
    match crate::pointer::traverse(state, path) {
        Ok(v) => !matches!(v, Value::Null),
        Err(_) => false,
    }
}

fn moved_value(state: &Value, from: &PointerBuf) -> Value {
    crate::pointer::traverse(state, from).cloned().unwrap_or(Value::Null)
}

/// If `a` and `b` both target indices of the same sequence, returns the
/// parent pointer and their resolved indices.
fn shared_sequence_indices(state: &Value, a: &Operation, b: &Operation) -> Option<(PointerBuf, usize, usize)> {
    let a_parent = a.path().parent()?;
    let b_parent = b.path().parent()?;
    if a_parent != b_parent {
        return None;
    }
    if !matches!(crate::pointer::traverse(state, &a_parent), Ok(Value::Array(_))) {
        return None;
    }
    let a_idx = resolved_index(state, &a_parent, a.path().last()?)?;
    let b_idx = resolved_index(state, &a_parent, b.path().last()?)?;
    Some((a_parent, a_idx, b_idx))
}

fn resolved_index(state: &Value, parent: &PointerBuf, token: &str) -> Option<usize> {
    if token == "-" {
        return match crate::pointer::traverse(state, parent) {
            Ok(Value::Array(arr)) => Some(arr.len()),
            _ => None,
        };
    }
    token.parse::<usize>().ok()
}

fn with_index(op: &Operation, parent: &PointerBuf, index: usize) -> Operation {
    op.with_path(parent.push(index.to_string()))
}

/// For a combinable op whose target was just removed: the value it would
/// have produced against the identity element (0 for `@inc`/`@bit`, the
/// incoming value itself for `@max`/`@min`, since an absent target is
/// already treated as `replace`).
fn delta_identity_replace(op: &Operation) -> Operation {
    let path = op.path().clone();
    let ts = op.ts();
    let value = match op {
        Operation::Inc { value, .. } => Value::from(*value),
        Operation::Bit { mask, .. } => Value::from(crate::semantics::low_half(*mask)),
        Operation::Max { value, .. } | Operation::Min { value, .. } => value.clone(),
        _ => Value::Null,
    };
    Operation::Replace { path, value, ts, soft: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transform_is_identity_on_empty_a() {
        let registry = Registry::new();
        let v = json!({"x": 1});
        let b = vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 1.0, ts: None }];
        let out = transform(&registry, &v, &[], &b).unwrap();
        assert_eq!(out, b);
    }

    #[test]
    fn transform_is_identity_on_empty_b() {
        let registry = Registry::new();
        let v = json!({"x": 1});
        let a = vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 1.0, ts: None }];
        let out = transform(&registry, &v, &a, &[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn disjoint_ops_pass_through() {
        let registry = Registry::new();
        let v = json!({"x": 1, "y": 1});
        let a = vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(2), ts: None, soft: None }];
        let b = vec![Operation::Replace { path: PointerBuf::parse("/y").unwrap(), value: json!(3), ts: None, soft: None }];
        let out = transform(&registry, &v, &a, &b).unwrap();
        assert_eq!(out, b);
    }

    #[test]
    fn concurrent_increments_both_apply() {
        let registry = Registry::new();
        let v = json!({"x": 5});
        let a = vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 3.0, ts: None }];
        let b = vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 2.0, ts: None }];
        let b_prime = transform(&registry, &v, &a, &b).unwrap();
        let after_a = crate::apply::apply(&registry, &v, &a, &crate::apply::ApplyOptions::strict()).unwrap();
        let result = crate::apply::apply(&registry, &after_a, &b_prime, &crate::apply::ApplyOptions::strict()).unwrap();
        assert_eq!(result, json!({"x": 10}));
    }

    #[test]
    fn insert_then_remove_reindexes() {
        let registry = Registry::new();
        let v = json!([0, 1, 2]);
        let a = vec![Operation::Add { path: PointerBuf::parse("/1").unwrap(), value: json!("X"), ts: None, soft: None }];
        let b = vec![Operation::Remove { path: PointerBuf::parse("/2").unwrap(), ts: None }];
        let after_a = crate::apply::apply(&registry, &v, &a, &crate::apply::ApplyOptions::strict()).unwrap();
        let b_prime = transform(&registry, &v, &a, &b).unwrap();
        let result = crate::apply::apply(&registry, &after_a, &b_prime, &crate::apply::ApplyOptions::strict()).unwrap();
        assert_eq!(result, json!([0, "X", 1]));
    }

    #[test]
    fn tp1_holds_for_disjoint_intents() {
        let registry = Registry::new();
        let v = json!({"a": 1, "b": 1});
        let a = vec![Operation::Replace { path: PointerBuf::parse("/a").unwrap(), value: json!(2), ts: None, soft: None }];
        let b = vec![Operation::Replace { path: PointerBuf::parse("/b").unwrap(), value: json!(2), ts: None, soft: None }];
        let b_prime = transform(&registry, &v, &a, &b).unwrap();
        let a_prime = transform(&registry, &v, &b, &a).unwrap();
        let left = {
            let s = crate::apply::apply(&registry, &v, &a, &crate::apply::ApplyOptions::strict()).unwrap();
            crate::apply::apply(&registry, &s, &b_prime, &crate::apply::ApplyOptions::strict()).unwrap()
        };
        let right = {
            let s = crate::apply::apply(&registry, &v, &b, &crate::apply::ApplyOptions::strict()).unwrap();
            crate::apply::apply(&registry, &s, &a_prime, &crate::apply::ApplyOptions::strict()).unwrap()
        };
        assert_eq!(left, right);
    }
}
