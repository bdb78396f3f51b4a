//! C7: the server-side commit pipeline, §4.7.

use crate::error::{OtError, Result};
use crate::ids::now_millis;
use crate::versioning::handle_offline_sessions_and_batches;
use patches_core::{apply, rebase, ApplyOptions, Change, Operation, PatchError, PointerBuf, Registry};
use patches_storage::{ListChangesOptions, ListVersionsOptions, Storage, VersionOrderBy, VersionOrigin};
use serde_json::Value;

/// Recognized server configuration (§6 "Configuration").
#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub session_timeout_millis: f64,
    pub historical_import: bool,
    pub force_commit: bool,
    pub max_payload_bytes: Option<usize>,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self { session_timeout_millis: 30.0 * 60.0 * 1000.0, historical_import: false, force_commit: false, max_payload_bytes: None }
    }
}

/// Whether a commit actually advanced the document or just replayed an
/// already-committed batch (idempotency, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Replayed,
}

#[derive(Debug, Clone)]
pub struct CommitResult {
    /// Changes the client must apply before its own pending ones (a
    /// rewind/reload, or the synthetic catchup replace).
    pub catchup: Vec<Change>,
    /// The incoming changes as actually persisted (post-transform).
    pub new: Vec<Change>,
    pub outcome: CommitOutcome,
}

/// `stateAtRevision`: folds the latest applicable main version with its
/// subsequent changes up to (and including) `rev`. `rev = None` means the
/// latest state.
pub async fn state_at_revision(storage: &dyn Storage, registry: &Registry, doc_id: &str, rev: Option<u64>) -> Result<(Value, u64)> {
    let opts = ListVersionsOptions {
        origin: Some(VersionOrigin::Main),
        order_by: Some(VersionOrderBy::EndRev),
        reverse: true,
        limit: Some(1),
        end_before: rev.map(|r| r + 1),
        ..Default::default()
    };
    let versions = storage.list_versions(doc_id, &opts).await?;
    let (mut state, mut state_rev) = match versions.first() {
        Some(v) => (storage.load_version_state(doc_id, &v.id).await?, v.end_rev),
        None => (Value::Null, 0),
    };
    let list_opts = ListChangesOptions { start_after: Some(state_rev), end_before: rev.map(|r| r + 1), ..Default::default() };
    for change in storage.list_changes(doc_id, &list_opts).await? {
        state = apply(registry, &state, &change.ops, &ApplyOptions::strict())?;
        state_rev = change.rev.unwrap_or(state_rev);
    }
    Ok((state, state_rev))
}

fn touches_root(ops: &[Operation]) -> bool {
    ops.iter().any(|op| op.path().is_root())
}

fn drop_shadowed_soft_ops(ops: &[Operation], state: &Value) -> Vec<Operation> {
    ops.iter()
        .filter(|op| !(op.is_soft() && patches_core::pointer::traverse(state, op.path()).map_or(false, |v| !v.is_null())))
        .cloned()
        .collect()
}

pub async fn commit_changes(
    storage: &dyn Storage,
    registry: &Registry,
    doc_id: &str,
    mut incoming: Vec<Change>,
    opts: &CommitOptions,
) -> Result<CommitResult> {
    // 1. Empty.
    if incoming.is_empty() {
        return Ok(CommitResult { catchup: vec![], new: vec![], outcome: CommitOutcome::Committed });
    }

    // 2. Load snapshot.
    let (mut current_state, current_rev) = state_at_revision(storage, registry, doc_id, None).await?;

    // 3. Determine baseRev, with the offline-first synthetic catchup optimization.
    let is_batch_continuation = incoming.iter().any(|c| c.batch_id.is_some());
    let mut base_rev = incoming[0].base_rev;
    let mut needs_synthetic_catchup = false;
    if base_rev == 0 && current_rev > 0 && !is_batch_continuation && !incoming.iter().any(|c| touches_root(&c.ops)) {
        base_rev = current_rev;
        for change in &mut incoming {
            change.base_rev = base_rev;
            change.ops = drop_shadowed_soft_ops(&change.ops, &current_state);
        }
        needs_synthetic_catchup = true;
    }

    // 4. Validation.
    if !opts.historical_import && incoming.iter().any(|c| c.base_rev != base_rev) {
        return Err(PatchError::InconsistentBatch.into());
    }
    if base_rev > current_rev {
        return Err(PatchError::BehindClient { base_rev, current_rev }.into());
    }
    if base_rev == 0 && current_rev > 0 && !is_batch_continuation && incoming.iter().any(|c| touches_root(&c.ops)) {
        return Err(PatchError::ExistingDoc.into());
    }

    let server_now = now_millis();
    let compare_time = if opts.historical_import { incoming[0].created_at } else { server_now };

    // 5. Assign revisions & timestamps.
    for (i, change) in incoming.iter_mut().enumerate() {
        change.rev = Some(base_rev + i as u64 + 1);
        change.committed_at = Some(server_now);
        if change.created_at > server_now {
            change.created_at = server_now;
        }
    }

    // 6. Session version trigger.
    let last_committed = storage
        .list_changes(doc_id, &ListChangesOptions { end_before: Some(base_rev + 1), reverse: true, limit: Some(1), ..Default::default() })
        .await?;
    if let Some(last) = last_committed.first() {
        if compare_time - last.created_at > opts.session_timeout_millis {
            let version_id = crate::ids::fresh_sortable_id();
            let metadata = patches_storage::VersionMetadata {
                id: version_id,
                doc_id: doc_id.to_string(),
                origin: VersionOrigin::Main,
                start_rev: 0,
                end_rev: current_rev,
                started_at: last.created_at,
                ended_at: compare_time,
                group_id: None,
                parent_id: None,
                is_offline: Some(false),
                name: None,
            };
            storage.create_version(doc_id, &metadata, &current_state, &[]).await?;
        }
    }

    // 7. Idempotency filter.
    let committed_changes: Vec<Change> = storage
        .list_changes(
            doc_id,
            &ListChangesOptions {
                start_after: Some(base_rev),
                without_batch_id: incoming[0].batch_id.clone(),
                ..Default::default()
            },
        )
        .await?;
    let committed_ids: std::collections::HashSet<&str> = committed_changes.iter().map(|c| c.id.as_str()).collect();
    let deduped: Vec<Change> = incoming.into_iter().filter(|c| !committed_ids.contains(c.id.as_str())).collect();
    if deduped.is_empty() {
        return Ok(CommitResult { catchup: committed_changes, new: vec![], outcome: CommitOutcome::Replayed });
    }

    // 8. Offline/batch path.
    let batch_id = deduped[0].batch_id.clone();
    let is_offline_batch = batch_id.is_some() || (server_now - deduped[0].created_at > opts.session_timeout_millis);
    let to_transform: Vec<Change> = if is_offline_batch {
        let can_fast_forward = committed_changes.is_empty();
        let origin = if can_fast_forward { VersionOrigin::Main } else { VersionOrigin::OfflineBranch };
        let persisted = handle_offline_sessions_and_batches(
            storage,
            registry,
            doc_id,
            &deduped,
            base_rev,
            batch_id.as_deref(),
            origin,
            opts.session_timeout_millis,
            opts.max_payload_bytes,
        )
        .await?;
        if can_fast_forward {
            storage.save_changes(doc_id, &persisted).await?;
            return Ok(CommitResult { catchup: vec![], new: persisted, outcome: CommitOutcome::Committed });
        }
        persisted
    } else {
        deduped
    };

    // 9. Transformation.
    let (state_at_base, _) = state_at_revision(storage, registry, doc_id, Some(base_rev)).await?;
    let committed_ops: Vec<Operation> = committed_changes.iter().flat_map(|c| c.ops.iter().cloned()).collect();
    let rebased = rebase(registry, &state_at_base, &committed_ops, &to_transform)?;

    let mut transformed = Vec::with_capacity(rebased.len());
    let mut probe_state = current_state.clone();
    for mut change in rebased {
        match apply(registry, &probe_state, &change.ops, &ApplyOptions::strict()) {
            Ok(next_state) => {
                if !opts.force_commit && next_state == probe_state && !change.ops.is_empty() {
                    tracing::debug!(change_id = %change.id, "transformed change is a no-op, dropping");
                    continue;
                }
                probe_state = next_state;
            }
            Err(err) => {
                if opts.force_commit {
                    tracing::warn!(change_id = %change.id, error = %err, "force-committing change that failed to transform cleanly");
                } else {
                    tracing::warn!(change_id = %change.id, error = %err, "dropping change that failed to transform cleanly");
                    continue;
                }
            }
        }
        change.rev = Some(current_rev + transformed.len() as u64 + 1);
        transformed.push(change);
    }
    current_state = probe_state;
    storage.save_changes(doc_id, &transformed).await?;
    let _ = current_state;

    // 10. Synthetic catchup.
    if needs_synthetic_catchup {
        let (latest_state, latest_rev) = state_at_revision(storage, registry, doc_id, None).await?;
        let synthetic = Change {
            id: format!("synthetic-catchup-{doc_id}"),
            base_rev: 0,
            rev: Some(latest_rev),
            ops: vec![Operation::Replace { path: PointerBuf::root(), value: latest_state, ts: None, soft: None }],
            created_at: server_now,
            committed_at: Some(server_now),
            batch_id: None,
        };
        return Ok(CommitResult { catchup: vec![synthetic], new: transformed, outcome: CommitOutcome::Committed });
    }

    Ok(CommitResult { catchup: committed_changes, new: transformed, outcome: CommitOutcome::Committed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use patches_storage::MemoryStorage;
    use serde_json::json;

    #[async_std::test]
    async fn commits_fresh_document() {
        let storage = MemoryStorage::new();
        let registry = Registry::new();
        let change = Change::new("c1", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!({"x": 1}), ts: None, soft: None }], 0.0);
        let result = commit_changes(&storage, &registry, "doc1", vec![change], &CommitOptions::default()).await.unwrap();
        assert_eq!(result.new.len(), 1);
        assert_eq!(result.new[0].rev, Some(1));
    }

    #[async_std::test]
    async fn rejects_stale_base_rev() {
        let storage = MemoryStorage::new();
        let registry = Registry::new();
        let c1 = Change::new("c1", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!({"x": 1}), ts: None, soft: None }], 0.0);
        commit_changes(&storage, &registry, "doc1", vec![c1], &CommitOptions::default()).await.unwrap();

        let stale = Change::new("c2", 5, vec![Operation::Replace { path: PointerBuf::parse("/x").unwrap(), value: json!(2), ts: None, soft: None }], 1.0);
        let err = commit_changes(&storage, &registry, "doc1", vec![stale], &CommitOptions::default()).await.unwrap_err();
        assert!(matches!(err, OtError::Patch(PatchError::BehindClient { .. })));
    }

    #[async_std::test]
    async fn replays_duplicate_change_id_idempotently() {
        let storage = MemoryStorage::new();
        let registry = Registry::new();
        let c1 = Change::new("c1", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!({"x": 1}), ts: None, soft: None }], 0.0);
        let first = commit_changes(&storage, &registry, "doc1", vec![c1.clone()], &CommitOptions::default()).await.unwrap();
        assert_eq!(first.outcome, CommitOutcome::Committed);

        let mut replay = c1;
        replay.base_rev = 1;
        let second = commit_changes(&storage, &registry, "doc1", vec![replay], &CommitOptions::default()).await.unwrap();
        assert_eq!(second.outcome, CommitOutcome::Replayed);
        assert!(second.new.is_empty());
    }

    #[async_std::test]
    async fn concurrent_increments_both_survive_transform() {
        let storage = MemoryStorage::new();
        let registry = Registry::new();
        let seed = Change::new("seed", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!({"x": 5}), ts: None, soft: None }], 0.0);
        commit_changes(&storage, &registry, "doc1", vec![seed], &CommitOptions::default()).await.unwrap();

        let a = Change::new("a", 1, vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 3.0, ts: None }], 1.0);
        commit_changes(&storage, &registry, "doc1", vec![a], &CommitOptions::default()).await.unwrap();

        let b = Change::new("b", 1, vec![Operation::Inc { path: PointerBuf::parse("/x").unwrap(), value: 2.0, ts: None }], 1.0);
        let result = commit_changes(&storage, &registry, "doc1", vec![b], &CommitOptions::default()).await.unwrap();
        assert_eq!(result.new.len(), 1);

        let (state, _) = state_at_revision(&storage, &registry, "doc1", None).await.unwrap();
        assert_eq!(state, json!({"x": 10}));
    }

    #[async_std::test]
    async fn change_that_fails_to_apply_is_dropped_unless_force_commit() {
        let storage = MemoryStorage::new();
        let registry = Registry::new();
        // Recent timestamps keep this on the live (non-offline-batch) commit
        // path, so the failure is handled by the step-9 transform probe
        // instead of propagating out of the offline-session folding.
        let now = crate::ids::now_millis();
        let seed = Change::new("seed", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!({}), ts: None, soft: None }], now);
        commit_changes(&storage, &registry, "doc1", vec![seed], &CommitOptions::default()).await.unwrap();

        // `/missing` doesn't exist yet, so a `replace` there fails to apply.
        let bad = Change::new("bad", 1, vec![Operation::Replace { path: PointerBuf::parse("/missing").unwrap(), value: json!(1), ts: None, soft: None }], now);
        let dropped = commit_changes(&storage, &registry, "doc1", vec![bad.clone()], &CommitOptions::default()).await.unwrap();
        assert!(dropped.new.is_empty());

        let forced_opts = CommitOptions { force_commit: true, ..CommitOptions::default() };
        let forced = commit_changes(&storage, &registry, "doc1", vec![bad], &forced_opts).await.unwrap();
        assert_eq!(forced.new.len(), 1);
        assert_eq!(forced.new[0].id, "bad");
    }
}
