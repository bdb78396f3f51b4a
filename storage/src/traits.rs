//! The storage interface the OT/LWW pipelines consume, per §6. The core
//! algorithms are storage-agnostic; everything here is what an adapter
//! (sled, Postgres, an in-memory test double, ...) must provide.

use crate::error::Result;
use crate::types::{
    Branch, BranchPatch, FieldRecord, ListChangesOptions, ListOpsOptions, ListVersionsOptions, Tombstone,
    VersionMetadata, VersionPatch,
};
use async_trait::async_trait;
use patches_core::{Change, PointerBuf};
use serde_json::Value;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn list_changes(&self, doc_id: &str, opts: &ListChangesOptions) -> Result<Vec<Change>>;
    async fn save_changes(&self, doc_id: &str, changes: &[Change]) -> Result<()>;

    async fn list_versions(&self, doc_id: &str, opts: &ListVersionsOptions) -> Result<Vec<VersionMetadata>>;
    async fn create_version(&self, doc_id: &str, metadata: &VersionMetadata, state: &Value, changes: &[Change]) -> Result<()>;
    async fn append_version_changes(
        &self,
        doc_id: &str,
        version_id: &str,
        changes: &[Change],
        new_ended_at: f64,
        new_end_rev: u64,
        new_state: &Value,
    ) -> Result<()>;
    async fn update_version(&self, doc_id: &str, version_id: &str, patch: &VersionPatch) -> Result<()>;
    async fn load_version_state(&self, doc_id: &str, version_id: &str) -> Result<Value>;
    async fn load_version_changes(&self, doc_id: &str, version_id: &str) -> Result<Vec<Change>>;

    async fn delete_doc(&self, doc_id: &str) -> Result<()>;
    async fn create_tombstone(&self, tombstone: &Tombstone) -> Result<()>;
    async fn get_tombstone(&self, doc_id: &str) -> Result<Option<Tombstone>>;
    async fn remove_tombstone(&self, doc_id: &str) -> Result<()>;

    /// LWW-only: appends field ops and returns the new document revision.
    async fn save_ops(&self, doc_id: &str, ops: &[(PointerBuf, Value, f64)]) -> Result<u64>;
    async fn list_ops(&self, doc_id: &str, opts: &ListOpsOptions) -> Result<Vec<FieldRecord>>;
    async fn get_snapshot(&self, doc_id: &str) -> Result<Option<(Value, u64)>>;
    async fn save_snapshot(&self, doc_id: &str, state: &Value, rev: u64) -> Result<()>;

    async fn create_branch(&self, branch: &Branch) -> Result<()>;
    async fn list_branches(&self, source_doc_id: &str) -> Result<Vec<Branch>>;
    async fn load_branch(&self, branch_id: &str) -> Result<Option<Branch>>;
    async fn update_branch(&self, branch_id: &str, patch: &BranchPatch) -> Result<()>;
    async fn close_branch(&self, branch_id: &str) -> Result<()>;
}
