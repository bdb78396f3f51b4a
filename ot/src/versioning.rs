//! C11: groups a batch of changes into sessions and folds each session into
//! a version, per §4.10. Called from the server pipeline's offline/batch
//! path (§4.7 step 8).

use crate::error::Result;
use crate::ids::fresh_sortable_id;
use patches_core::{apply, ApplyOptions, Change, Operation, Registry};
use patches_storage::{ListVersionsOptions, Storage, VersionMetadata, VersionOrderBy, VersionOrigin};

#[allow(clippy::too_many_arguments)]
pub async fn handle_offline_sessions_and_batches(
    storage: &dyn Storage,
    registry: &Registry,
    doc_id: &str,
    changes: &[Change],
    base_rev: u64,
    batch_id: Option<&str>,
    origin: VersionOrigin,
    session_timeout_millis: f64,
    max_payload_bytes: Option<usize>,
) -> Result<Vec<Change>> {
    if changes.is_empty() {
        return Ok(vec![]);
    }
    let group_id = batch_id.map(str::to_string).unwrap_or_else(fresh_sortable_id);

    let recent = storage
        .list_versions(
            doc_id,
            &ListVersionsOptions {
                group_id: Some(group_id.clone()),
                order_by: Some(VersionOrderBy::EndRev),
                reverse: true,
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;

    let (mut state, mut state_rev, parent_id) = if let Some(v) = recent.first() {
        (storage.load_version_state(doc_id, &v.id).await?, v.end_rev, Some(v.id.clone()))
    } else {
        let (s, r) = crate::server::state_at_revision(storage, registry, doc_id, Some(base_rev)).await?;
        (s, r, None)
    };
    let mut extend_target: Option<(String, f64)> = recent.first().map(|v| (v.id.clone(), v.ended_at));

    for session in split_into_sessions(changes, session_timeout_millis) {
        let first_created_at = session[0].created_at;
        for change in &session {
            state = apply(registry, &state, &change.ops, &ApplyOptions::strict())?;
            state_rev = change.rev.unwrap_or(state_rev);
        }
        let end_rev = session.last().unwrap().rev.unwrap_or(state_rev);
        let ended_at = session.last().unwrap().committed_at.unwrap_or(first_created_at);

        extend_target = Some(match extend_target {
            Some((version_id, prev_ended_at)) if first_created_at - prev_ended_at <= session_timeout_millis => {
                storage.append_version_changes(doc_id, &version_id, &session, ended_at, end_rev, &state).await?;
                (version_id, ended_at)
            }
            _ => {
                let id = fresh_sortable_id();
                let metadata = VersionMetadata {
                    id: id.clone(),
                    doc_id: doc_id.to_string(),
                    origin,
                    start_rev: session[0].base_rev,
                    end_rev,
                    started_at: first_created_at,
                    ended_at,
                    group_id: Some(group_id.clone()),
                    parent_id: parent_id.clone(),
                    is_offline: Some(matches!(origin, VersionOrigin::OfflineBranch)),
                    name: None,
                };
                storage.create_version(doc_id, &metadata, &state, &session).await?;
                (id, ended_at)
            }
        });
    }

    if matches!(origin, VersionOrigin::OfflineBranch) {
        let collapsed = collapse_changes(changes);
        Ok(split_by_payload(collapsed, max_payload_bytes))
    } else {
        Ok(changes.to_vec())
    }
}

/// Splits a change list into runs where consecutive `createdAt` gaps never
/// exceed `session_timeout_millis`; the last change always ends a session.
fn split_into_sessions(changes: &[Change], session_timeout_millis: f64) -> Vec<Vec<Change>> {
    let mut sessions: Vec<Vec<Change>> = Vec::new();
    for change in changes {
        match sessions.last_mut() {
            Some(session) if change.created_at - session.last().unwrap().created_at <= session_timeout_millis => {
                session.push(change.clone());
            }
            _ => sessions.push(vec![change.clone()]),
        }
    }
    sessions
}

/// Concatenates every change's ops into one, keyed by the first change's id.
fn collapse_changes(changes: &[Change]) -> Change {
    let first = &changes[0];
    let mut ops: Vec<Operation> = Vec::new();
    for change in changes {
        ops.extend(change.ops.iter().cloned());
    }
    Change::new(first.id.clone(), first.base_rev, ops, first.created_at)
}

/// Splits a collapsed change's ops into payload-sized pieces, each a
/// distinct change sharing the original id as a prefix.
fn split_by_payload(change: Change, max_payload_bytes: Option<usize>) -> Vec<Change> {
    let Some(max_bytes) = max_payload_bytes else { return vec![change] };
    let mut out = Vec::new();
    let mut current_ops: Vec<Operation> = Vec::new();
    let mut current_bytes = 0usize;
    for op in change.ops {
        let op_bytes = serde_json::to_vec(&op).map(|b| b.len()).unwrap_or(0);
        if !current_ops.is_empty() && current_bytes + op_bytes > max_bytes {
            out.push(current_ops.drain(..).collect::<Vec<_>>());
            current_bytes = 0;
        }
        current_bytes += op_bytes;
        current_ops.push(op);
    }
    if !current_ops.is_empty() {
        out.push(current_ops);
    }
    out.into_iter()
        .enumerate()
        .map(|(i, ops)| {
            let id = if i == 0 { change.id.clone() } else { format!("{}-{i}", change.id) };
            let mut c = Change::new(id, change.base_rev, ops, change.created_at);
            c.batch_id = change.batch_id.clone();
            c
        })
        .collect()
}
