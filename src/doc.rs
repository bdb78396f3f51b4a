//! `DocHandle`: the client/server RPC surface of §6 bound to one `docId`,
//! backed by whichever consistency model (`ConsistencyMode`) the document
//! was opened with. Talks to `Storage` directly; holds no transport or
//! encryption state of its own.

use crate::engine::{ConsistencyMode, Engine};
use crate::events::EventStream;
use anyhow::{bail, Result};
use patches_core::{Change, Operation, PatchError};
use patches_lww::ConsolidateResult;
use patches_ot::{apply_committed_changes, commit_changes, fresh_sortable_id, now_millis, state_at_revision, CommitOutcome, CommitResult, Snapshot};
use patches_storage::{
    Branch, BranchStatus, ListChangesOptions, ListOpsOptions, ListVersionsOptions, Tombstone, VersionMetadata, VersionPatch,
};
use serde_json::Value;

/// A document bound to one consistency model. Cheap to clone; cloning shares
/// the underlying `Engine`.
#[derive(Clone)]
pub struct DocHandle {
    engine: Engine,
    doc_id: String,
    mode: ConsistencyMode,
}

impl DocHandle {
    pub(crate) fn new(engine: Engine, doc_id: String, mode: ConsistencyMode) -> Self {
        Self { engine, doc_id, mode }
    }

    pub fn id(&self) -> &str {
        &self.doc_id
    }

    pub fn mode(&self) -> ConsistencyMode {
        self.mode
    }

    /// `subscribe(ids)`, one id at a time — the caller fans a single
    /// subscription list over as many `DocHandle`s as it has ids for.
    pub fn subscribe(&self, client_id: impl Into<String>) -> EventStream {
        self.engine.events().subscribe(&self.doc_id, client_id)
    }

    /// `unsubscribe(ids)`.
    pub fn unsubscribe(&self, client_id: &str) {
        self.engine.events().unsubscribe(&self.doc_id, client_id);
    }

    async fn ensure_not_deleted(&self) -> Result<()> {
        if let Some(tombstone) = self.engine.storage().get_tombstone(&self.doc_id).await? {
            bail!("document {} was deleted at {}", self.doc_id, tombstone.deleted_at);
        }
        Ok(())
    }

    /// `getDoc(docId) -> {state, rev}`.
    pub async fn get_doc(&self) -> Result<(Value, u64)> {
        self.ensure_not_deleted().await?;
        match self.mode {
            ConsistencyMode::OperationalTransform => {
                let (state, rev) = state_at_revision(self.engine.storage(), self.engine.registry(), &self.doc_id, None).await?;
                Ok((state, rev))
            }
            ConsistencyMode::LastWriterWins => {
                let records = self.engine.storage().list_ops(&self.doc_id, &ListOpsOptions::default()).await?;
                let rev = records.iter().map(|r| r.rev).max().unwrap_or(0);
                Ok((patches_lww::project_fields(self.engine.registry(), &records), rev))
            }
        }
    }

    /// `getChangesSince(docId, rev) -> Change[]`. OT only — LWW exposes
    /// `list_ops` instead, since its unit of replication is a field record,
    /// not an ordered `Change`.
    pub async fn get_changes_since(&self, rev: u64) -> Result<Vec<Change>> {
        self.require_mode(ConsistencyMode::OperationalTransform)?;
        let opts = ListChangesOptions { start_after: Some(rev), ..Default::default() };
        Ok(self.engine.storage().list_changes(&self.doc_id, &opts).await?)
    }

    /// `patchDoc(docId, changes) -> {catchup, new}` for an OT document. The
    /// per-docId commit lock enforces §5's "no other writer advances
    /// currentRev for that document" between snapshot load and save.
    pub async fn commit(&self, changes: Vec<Change>, originating_client_id: Option<&str>) -> Result<CommitResult> {
        self.require_mode(ConsistencyMode::OperationalTransform)?;
        self.ensure_not_deleted().await?;
        let lock = self.engine.lock_for(&self.doc_id);
        let _guard = lock.lock().await;
        let opts = self.engine.config().commit_options();
        let result = commit_changes(self.engine.storage(), self.engine.registry(), &self.doc_id, changes, &opts).await?;
        if result.outcome == CommitOutcome::Committed {
            self.engine.events().publish(&self.doc_id, result.new.clone(), originating_client_id);
        }
        Ok(result)
    }

    /// Folds newly committed server changes onto a client-held `Snapshot`
    /// and rebases its pending changes, per C8. Pure; does not touch
    /// storage — exposed here purely so callers don't need to depend on
    /// `patches-ot` directly for the common client-side path.
    pub fn fold_client_snapshot(&self, snapshot: &Snapshot, server_changes: &[Change], pending: &[Change]) -> Result<(Snapshot, Vec<Change>)> {
        self.require_mode(ConsistencyMode::OperationalTransform)?;
        Ok(apply_committed_changes(self.engine.registry(), snapshot, server_changes, pending)?)
    }

    /// `patchDoc(docId, changes) -> opsToReturn` for an LWW document:
    /// consolidates `ops` against the field records on file, persists the
    /// survivors, and returns what the client should apply for display
    /// (consolidated ops plus any correction ops).
    pub async fn apply_ops(&self, ops: Vec<Operation>, originating_client_id: Option<&str>) -> Result<ConsolidateResult> {
        self.require_mode(ConsistencyMode::LastWriterWins)?;
        self.ensure_not_deleted().await?;
        let lock = self.engine.lock_for(&self.doc_id);
        let _guard = lock.lock().await;

        let existing_records = self.engine.storage().list_ops(&self.doc_id, &ListOpsOptions::default()).await?;
        let existing: Vec<Operation> = existing_records.into_iter().map(|r| Operation::Replace { path: r.path, value: r.value, ts: Some(r.ts), soft: None }).collect();
        let result = patches_lww::consolidate_ops(&existing, &ops);

        if !result.ops_to_save.is_empty() {
            let rows: Vec<(patches_core::PointerBuf, Value, f64)> =
                result.ops_to_save.iter().map(|op| (op.path().clone(), op_value(op), op.ts().unwrap_or(0.0))).collect();
            self.engine.storage().save_ops(&self.doc_id, &rows).await?;
            let change = Change::new(fresh_sortable_id(), 0, result.ops_to_save.clone(), now_millis());
            self.engine.events().publish(&self.doc_id, vec![change], originating_client_id);
        }
        Ok(result)
    }

    /// Client-side display merge for an LWW document, per C10. Pure.
    pub fn merge_with_local(&self, server_changes: &[Change], local_ops: &[Operation]) -> Result<patches_lww::MergeResult> {
        self.require_mode(ConsistencyMode::LastWriterWins)?;
        Ok(patches_lww::merge_server_with_local(server_changes, local_ops))
    }

    /// `deleteDoc(docId)`.
    pub async fn delete(&self, last_rev: u64) -> Result<()> {
        let storage = self.engine.storage();
        storage.create_tombstone(&Tombstone { doc_id: self.doc_id.clone(), deleted_at: now_millis(), last_rev }).await?;
        storage.delete_doc(&self.doc_id).await?;
        Ok(())
    }

    // --- Version CRUD (§6) -------------------------------------------------

    pub async fn list_versions(&self, opts: &ListVersionsOptions) -> Result<Vec<VersionMetadata>> {
        Ok(self.engine.storage().list_versions(&self.doc_id, opts).await?)
    }

    pub async fn load_version_state(&self, version_id: &str) -> Result<Value> {
        Ok(self.engine.storage().load_version_state(&self.doc_id, version_id).await?)
    }

    pub async fn load_version_changes(&self, version_id: &str) -> Result<Vec<Change>> {
        Ok(self.engine.storage().load_version_changes(&self.doc_id, version_id).await?)
    }

    pub async fn update_version(&self, version_id: &str, patch: &VersionPatch) -> Result<()> {
        Ok(self.engine.storage().update_version(&self.doc_id, version_id, patch).await?)
    }

    // --- Branching (§3 "Branch", C10 branch merge) -------------------------

    /// Branches this document at its current revision. Fails if this
    /// document is itself a branch (§7 `BranchOfBranch`) — branches are
    /// tracked by `sourceDocId`, so a branch of a branch would need a
    /// second hop the storage model doesn't represent.
    pub async fn branch(&self, branch_id: impl Into<String>, branched_at_rev: u64, created_at: f64, name: Option<String>) -> Result<Branch> {
        if self.engine.storage().load_branch(&self.doc_id).await?.is_some() {
            return Err(PatchError::BranchOfBranch.into());
        }
        let branch = Branch { id: branch_id.into(), source_doc_id: self.doc_id.clone(), branched_at_rev, status: BranchStatus::Open, created_at, name };
        self.engine.storage().create_branch(&branch).await?;
        Ok(branch)
    }

    /// Merges an open branch's field records back into its source document.
    pub async fn merge_branch(&self, branch: &Branch) -> Result<Vec<Operation>> {
        if branch.status != BranchStatus::Open {
            return Err(PatchError::BranchNotOpen.into());
        }
        let branch_fields = self.engine.storage().list_ops(&branch.id, &ListOpsOptions::default()).await?;
        let existing_records = self.engine.storage().list_ops(&self.doc_id, &ListOpsOptions::default()).await?;
        let existing: Vec<Operation> = existing_records.into_iter().map(|r| Operation::Replace { path: r.path, value: r.value, ts: Some(r.ts), soft: None }).collect();
        let merged = patches_lww::merge_branch_into_source(self.engine.storage(), branch, &branch_fields, &existing).await?;
        if !merged.is_empty() {
            let rows: Vec<(patches_core::PointerBuf, Value, f64)> = merged.iter().map(|op| (op.path().clone(), op_value(op), op.ts().unwrap_or(0.0))).collect();
            self.engine.storage().save_ops(&self.doc_id, &rows).await?;
        }
        Ok(merged)
    }

    pub async fn close_branch(&self, branch_id: &str) -> Result<()> {
        Ok(self.engine.storage().close_branch(branch_id).await?)
    }

    pub async fn list_branches(&self) -> Result<Vec<Branch>> {
        Ok(self.engine.storage().list_branches(&self.doc_id).await?)
    }

    fn require_mode(&self, expected: ConsistencyMode) -> Result<()> {
        if self.mode != expected {
            bail!("document {} is not open in {:?} mode", self.doc_id, expected);
        }
        Ok(())
    }
}

/// Extracts the value a consolidated op carries, for persisting via
/// `save_ops`'s flat `(path, value, ts)` shape. Combinable ops have already
/// been folded to a concrete value by `consolidate_ops`/`fold_onto_existing`
/// by the time they reach here, except `@bit`/`@txt`, whose raw carried
/// value (mask / delta) is what `FieldRecord` ends up storing — re-reading
/// that into a live value happens on next projection via `apply_single`.
fn op_value(op: &Operation) -> Value {
    match op {
        Operation::Add { value, .. } | Operation::Replace { value, .. } | Operation::Max { value, .. } | Operation::Min { value, .. } => value.clone(),
        Operation::Inc { value, .. } => Value::from(*value),
        Operation::Bit { mask, .. } => Value::from(*mask),
        Operation::Txt { delta, .. } => serde_json::to_value(delta).unwrap_or(Value::Null),
        Operation::Remove { .. } => Value::Null,
        Operation::Copy { .. } | Operation::Move { .. } => Value::Null,
    }
}
