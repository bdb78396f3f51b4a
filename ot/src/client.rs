//! C8: the client-side apply pipeline, §4.8.

use crate::error::Result;
use patches_core::{apply, rebase, ApplyOptions, Change, PatchError, Registry};
use serde_json::Value;

/// The client's local view of a document: the last state it has folded and
/// the revision it corresponds to.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: Value,
    pub rev: u64,
}

/// Folds newly committed server changes onto `snapshot`, then rebases any
/// still-pending local changes against them.
pub fn apply_committed_changes(
    registry: &Registry,
    snapshot: &Snapshot,
    server_changes: &[Change],
    pending: &[Change],
) -> Result<(Snapshot, Vec<Change>)> {
    let mut new_changes: Vec<Change> = server_changes.iter().filter(|c| c.rev.map_or(false, |r| r > snapshot.rev)).cloned().collect();
    new_changes.sort_by_key(|c| c.rev.unwrap_or(0));

    if new_changes.is_empty() {
        return Ok((snapshot.clone(), pending.to_vec()));
    }

    if let Some(catchup) = recognize_synthetic_catchup(&new_changes[0]) {
        let state = catchup;
        let rev = new_changes[0].rev.unwrap();
        let rest = &new_changes[1..];
        let mut folded = Snapshot { state, rev };
        for change in rest {
            folded.state = apply(registry, &folded.state, &change.ops, &ApplyOptions::strict())?;
            folded.rev = change.rev.unwrap_or(folded.rev);
        }
        let rebased = rebase(registry, &folded.state, &rest.iter().flat_map(|c| c.ops.clone()).collect::<Vec<_>>(), pending)?;
        return Ok((folded, rebased));
    }

    let first_rev = new_changes[0].rev.unwrap();
    if first_rev != snapshot.rev + 1 {
        return Err(PatchError::Gap { expected: snapshot.rev + 1, got: first_rev }.into());
    }

    let mut state = snapshot.state.clone();
    let mut rev = snapshot.rev;
    for change in &new_changes {
        state = apply(registry, &state, &change.ops, &ApplyOptions::strict())?;
        rev = change.rev.unwrap_or(rev);
    }

    let all_ops: Vec<_> = new_changes.iter().flat_map(|c| c.ops.clone()).collect();
    let rebased_pending = if pending.is_empty() { vec![] } else { rebase(registry, &snapshot.state, &all_ops, pending)? };

    Ok((Snapshot { state, rev }, rebased_pending))
}

/// The server's synthetic catchup change (§4.7 step 10) is a single
/// root-level replace at `baseRev == 0`.
fn recognize_synthetic_catchup(change: &Change) -> Option<Value> {
    if change.base_rev != 0 || change.ops.len() != 1 {
        return None;
    }
    match &change.ops[0] {
        patches_core::Operation::Replace { path, value, .. } if path.is_root() => Some(value.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patches_core::{Operation, PointerBuf};
    use serde_json::json;

    #[test]
    fn folds_consecutive_server_changes() {
        let registry = Registry::new();
        let snapshot = Snapshot { state: json!({"x": 1}), rev: 0 };
        let change = Change { rev: Some(1), ..Change::new("c1", 0, vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(2), ts: None, soft: None }], 0.0) };
        let (next, pending) = apply_committed_changes(&registry, &snapshot, &[change], &[]).unwrap();
        assert_eq!(next.state, json!({"x": 2}));
        assert_eq!(next.rev, 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn detects_gap_when_a_revision_is_missing() {
        let registry = Registry::new();
        let snapshot = Snapshot { state: json!({"x": 1}), rev: 0 };
        let change = Change { rev: Some(2), ..Change::new("c1", 1, vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(2), ts: None, soft: None }], 0.0) };
        let err = apply_committed_changes(&registry, &snapshot, &[change], &[]).unwrap_err();
        assert!(matches!(err, crate::error::OtError::Patch(PatchError::Gap { .. })));
    }

    #[test]
    fn rebases_pending_local_change_against_server_change() {
        let registry = Registry::new();
        let snapshot = Snapshot { state: json!({"x": 5}), rev: 0 };
        let server = Change { rev: Some(1), ..Change::new("s1", 0, vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 3.0, ts: None }], 0.0) };
        let pending = Change::new("local", 0, vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 2.0, ts: None }], 0.0);
        let (next, rebased) = apply_committed_changes(&registry, &snapshot, &[server], &[pending]).unwrap();
        assert_eq!(next.state, json!({"x": 8}));
        assert_eq!(rebased.len(), 1);
        let merged = apply(&registry, &next.state, &rebased[0].ops, &ApplyOptions::strict()).unwrap();
        assert_eq!(merged, json!({"x": 10}));
    }
}
