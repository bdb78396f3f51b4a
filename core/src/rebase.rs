//! C6: rebases a list of pending local [`Change`]s over a batch of
//! concurrently-committed ops, per §4.6. Each change's own ops are
//! transformed against the full concatenation of the incoming ops (they
//! all happened before any of the pending changes, from the rebased
//! change's point of view); a change whose ops transform away entirely is
//! dropped rather than kept as a no-op.

use crate::error::Result;
use crate::op::{Change, Operation};
use crate::registry::Registry;
use serde_json::Value;

pub fn rebase(registry: &Registry, state_before_a: &Value, a_ops: &[Operation], pending: &[Change]) -> Result<Vec<Change>> {
    let mut out = Vec::with_capacity(pending.len());
    for change in pending {
        let rebased_ops = crate::transform::transform(registry, state_before_a, a_ops, &change.ops)?;
        if rebased_ops.is_empty() {
            continue;
        }
        let mut rebased = change.clone();
        rebased.ops = rebased_ops;
        rebased.rev = None;
        out.push(rebased);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::PointerBuf;
    use serde_json::json;

    #[test]
    fn rebase_drops_change_that_transforms_to_nothing() {
        let registry = Registry::new();
        let v = json!({"x": 1});
        let a_ops = vec![Operation::Remove { path: PointerBuf::parse("/x").unwrap(), ts: None }];
        let pending = vec![Change::new(
            "c1".into(),
            0,
            vec![Operation::Remove { path: PointerBuf::parse("/x").unwrap(), ts: None }],
            0.0,
        )];
        let out = rebase(&registry, &v, &a_ops, &pending).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn rebase_keeps_and_clears_rev_on_surviving_change() {
        let registry = Registry::new();
        let v = json!({"x": 5, "y": 1});
        let a_ops = vec![Operation::Replace { path: PointerBuf::parse("/y").unwrap(), value: json!(2), ts: None, soft: None }];
        let mut change = Change::new("c1".into(), 0, vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 1.0, ts: None }], 0.0);
        change.rev = Some(3);
        let out = rebase(&registry, &v, &a_ops, &[change]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rev, None);
        assert_eq!(out[0].ops.len(), 1);
    }
}
