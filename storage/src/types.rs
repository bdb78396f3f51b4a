//! Wire/storage-level types the `Storage` trait exchanges, per §6 and §4.10.

use patches_core::PointerBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionOrigin {
    Main,
    OfflineBranch,
}

/// A stored snapshot of document state plus the revision range it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub id: String,
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub origin: VersionOrigin,
    #[serde(rename = "startRev")]
    pub start_rev: u64,
    #[serde(rename = "endRev")]
    pub end_rev: u64,
    #[serde(rename = "startedAt")]
    pub started_at: f64,
    #[serde(rename = "endedAt")]
    pub ended_at: f64,
    #[serde(rename = "groupId", skip_serializing_if = "Option::is_none", default)]
    pub group_id: Option<String>,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,
    #[serde(rename = "isOffline", skip_serializing_if = "Option::is_none", default)]
    pub is_offline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

/// Ordering for `listVersions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrderBy {
    EndRev,
    StartedAt,
}

#[derive(Debug, Clone, Default)]
pub struct ListVersionsOptions {
    pub group_id: Option<String>,
    pub origin: Option<VersionOrigin>,
    pub start_after: Option<u64>,
    pub end_before: Option<u64>,
    pub limit: Option<usize>,
    pub reverse: bool,
    pub order_by: Option<VersionOrderBy>,
}

/// Partial update applied by `updateVersion`.
#[derive(Debug, Clone, Default)]
pub struct VersionPatch {
    pub ended_at: Option<f64>,
    pub end_rev: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListChangesOptions {
    pub start_after: Option<u64>,
    pub end_before: Option<u64>,
    pub without_batch_id: Option<String>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

/// Marks a document as deleted without losing its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    #[serde(rename = "docId")]
    pub doc_id: String,
    #[serde(rename = "deletedAt")]
    pub deleted_at: f64,
    #[serde(rename = "lastRev")]
    pub last_rev: u64,
}

/// A single LWW field's current value, timestamp and the revision it was
/// last written at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRecord {
    pub path: PointerBuf,
    pub value: Value,
    pub ts: f64,
    pub rev: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ListOpsOptions {
    pub since_rev: Option<u64>,
    pub paths: Option<Vec<PointerBuf>>,
}

/// Status of a branched-off working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Open,
    Closed,
    Merged,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    #[serde(rename = "sourceDocId")]
    pub source_doc_id: String,
    #[serde(rename = "branchedAtRev")]
    pub branched_at_rev: u64,
    pub status: BranchStatus,
    #[serde(rename = "createdAt")]
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BranchPatch {
    pub status: Option<BranchStatus>,
    pub name: Option<String>,
}
