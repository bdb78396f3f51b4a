//! C10: the client's server/local display merge, and branch merge into a
//! source document, §4.9.

use crate::consolidate::{consolidate_ops, fold_onto_existing};
use crate::error::Result;
use patches_core::{Change, Operation, PointerBuf};
use patches_storage::{Branch, BranchPatch, BranchStatus, FieldRecord, Storage};
use std::collections::HashSet;

pub struct MergeResult {
    pub changes: Vec<Change>,
    /// `None` unless a `@txt` transform actually rebased a pending local op.
    pub updated_local_ops: Option<Vec<Operation>>,
}

/// Merges freshly-received `server_changes` with the client's still-pending
/// `local_ops`, for optimistic display (the server changes are already
/// committed; this never touches storage).
pub fn merge_server_with_local(server_changes: &[Change], local_ops: &[Operation]) -> MergeResult {
    let mut changes = server_changes.to_vec();
    let mut updated_local = local_ops.to_vec();
    let mut any_txt_transform = false;
    let mut touched_paths: HashSet<PointerBuf> = HashSet::new();

    for change in &mut changes {
        for server_op in &mut change.ops {
            let path = server_op.path().clone();
            let Some(local_idx) = updated_local.iter().position(|op| op.path() == &path) else { continue };
            touched_paths.insert(path.clone());
            let local_op = updated_local[local_idx].clone();

            match (&server_op.clone(), &local_op) {
                (Operation::Txt { delta: s_delta, .. }, Operation::Txt { delta: l_delta, ts: l_ts, .. }) => {
                    if let Ok((s_prime, l_prime)) = s_delta.transform(l_delta) {
                        let server_ts = server_op.ts();
                        *server_op = Operation::Txt { path: path.clone(), delta: s_prime, ts: server_ts };
                        updated_local[local_idx] = Operation::Txt { path, delta: l_prime, ts: *l_ts };
                        any_txt_transform = true;
                    }
                }
                (_, local) if local.is_combinable() => {
                    *server_op = fold_onto_existing(server_op, local);
                }
                _ => {
                    // Local is non-combinable, non-`@txt`: the server's
                    // already-committed value wins; nothing to change.
                }
            }
        }
    }

    let untouched: Vec<Operation> = updated_local.iter().filter(|op| !touched_paths.contains(op.path())).cloned().collect();
    if !untouched.is_empty() {
        match changes.last_mut() {
            Some(last) => last.ops.extend(untouched),
            None => {
                tracing::trace!(count = untouched.len(), "no server changes to append untouched local ops to, synthesizing one");
                changes.push(Change::new("local-merge", 0, untouched, 0.0));
            }
        }
    }

    MergeResult { changes, updated_local_ops: any_txt_transform.then_some(updated_local) }
}

/// Projects a branch's LWW field records onto its source document as
/// ordinary ops (each carrying the branch field's own timestamp, so the
/// usual per-path LWW rule decides conflicts), then marks the branch merged.
pub async fn merge_branch_into_source(
    storage: &dyn Storage,
    branch: &Branch,
    branch_fields: &[FieldRecord],
    existing_source_ops: &[Operation],
) -> Result<Vec<Operation>> {
    let incoming: Vec<Operation> = branch_fields
        .iter()
        .map(|f| Operation::Replace { path: f.path.clone(), value: f.value.clone(), ts: Some(f.ts), soft: None })
        .collect();
    let result = consolidate_ops(existing_source_ops, &incoming);
    tracing::debug!(branch_id = %branch.id, fields = branch_fields.len(), saved = result.ops_to_save.len(), "merged branch into source");
    storage.update_branch(&branch.id, &BranchPatch { status: Some(BranchStatus::Merged), name: None }).await?;
    Ok(result.ops_to_save)
}

#[cfg(test)]
mod tests {
    use super::*;
    use patches_core::PointerBuf;
    use serde_json::json;

    #[test]
    fn local_combinable_op_folds_onto_server_value_for_display() {
        let server_change = Change::new(
            "s1",
            0,
            vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(10), ts: Some(1.0), soft: None }],
            0.0,
        );
        let local = vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 5.0, ts: Some(2.0) }];
        let merged = merge_server_with_local(&[server_change], &local);
        assert_eq!(merged.changes[0].ops[0], Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(15.0), ts: Some(2.0), soft: None });
        assert!(merged.updated_local_ops.is_none());
    }

    #[test]
    fn untouched_local_ops_are_appended_to_last_change() {
        let server_change = Change::new("s1", 0, vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(1), ts: None, soft: None }], 0.0);
        let local = vec![Operation::Replace { path: PointerBuf::parse("/y").unwrap(), value: json!(2), ts: None, soft: None }];
        let merged = merge_server_with_local(&[server_change], &local);
        assert_eq!(merged.changes[0].ops.len(), 2);
    }
}
