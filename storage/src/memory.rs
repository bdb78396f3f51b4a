//! An in-memory `Storage` implementation. Not meant for production use, but
//! faithful to the trait's ordering/atomicity contract — useful as a test
//! double and as a reference for adapter authors.

use crate::error::{Result, StorageError};
use crate::traits::Storage;
use crate::types::{
    Branch, BranchPatch, FieldRecord, ListChangesOptions, ListOpsOptions, ListVersionsOptions, Tombstone,
    VersionMetadata, VersionOrderBy, VersionPatch,
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use patches_core::{Change, PointerBuf};
use serde_json::Value;

#[derive(Default)]
struct DocRecord {
    changes: Vec<Change>,
    versions: Vec<(VersionMetadata, Value, Vec<Change>)>,
    tombstone: Option<Tombstone>,
    ops: Vec<FieldRecord>,
    ops_rev: u64,
    snapshot: Option<(Value, u64)>,
    branches: Vec<Branch>,
}

/// A process-local reference implementation of [`Storage`].
#[derive(Default)]
pub struct MemoryStorage {
    docs: Mutex<FnvHashMap<String, DocRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_changes(&self, doc_id: &str, opts: &ListChangesOptions) -> Result<Vec<Change>> {
        let docs = self.docs.lock();
        let Some(doc) = docs.get(doc_id) else { return Ok(vec![]) };
        let mut out: Vec<Change> = doc
            .changes
            .iter()
            .filter(|c| opts.start_after.map_or(true, |after| c.rev.map_or(false, |r| r > after)))
            .filter(|c| opts.end_before.map_or(true, |before| c.rev.map_or(false, |r| r < before)))
            .filter(|c| match (&opts.without_batch_id, &c.batch_id) {
                (Some(excluded), Some(batch)) => batch != excluded,
                _ => true,
            })
            .cloned()
            .collect();
        out.sort_by_key(|c| c.rev.unwrap_or(0));
        if opts.reverse {
            out.reverse();
        }
        if let Some(limit) = opts.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn save_changes(&self, doc_id: &str, changes: &[Change]) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(doc_id.to_string()).or_default();
        doc.changes.extend_from_slice(changes);
        Ok(())
    }

    async fn list_versions(&self, doc_id: &str, opts: &ListVersionsOptions) -> Result<Vec<VersionMetadata>> {
        let docs = self.docs.lock();
        let Some(doc) = docs.get(doc_id) else { return Ok(vec![]) };
        let mut out: Vec<VersionMetadata> = doc
            .versions
            .iter()
            .map(|(meta, _, _)| meta.clone())
            .filter(|m| opts.group_id.as_ref().map_or(true, |g| m.group_id.as_deref() == Some(g.as_str())))
            .filter(|m| opts.origin.map_or(true, |o| m.origin == o))
            .filter(|m| opts.start_after.map_or(true, |after| m.end_rev > after))
            .filter(|m| opts.end_before.map_or(true, |before| m.end_rev < before))
            .collect();
        match opts.order_by {
            Some(VersionOrderBy::StartedAt) => out.sort_by(|a, b| a.started_at.partial_cmp(&b.started_at).unwrap()),
            _ => out.sort_by_key(|m| m.end_rev),
        }
        if opts.reverse {
            out.reverse();
        }
        if let Some(limit) = opts.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn create_version(&self, doc_id: &str, metadata: &VersionMetadata, state: &Value, changes: &[Change]) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(doc_id.to_string()).or_default();
        doc.versions.push((metadata.clone(), state.clone(), changes.to_vec()));
        Ok(())
    }

    async fn append_version_changes(
        &self,
        doc_id: &str,
        version_id: &str,
        changes: &[Change],
        new_ended_at: f64,
        new_end_rev: u64,
        new_state: &Value,
    ) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.get_mut(doc_id).ok_or_else(|| StorageError::DocNotFound(doc_id.to_string()))?;
        let (meta, state, existing) = doc
            .versions
            .iter_mut()
            .find(|(m, _, _)| m.id == version_id)
            .ok_or_else(|| StorageError::VersionNotFound(version_id.to_string()))?;
        meta.ended_at = new_ended_at;
        meta.end_rev = new_end_rev;
        *state = new_state.clone();
        existing.extend_from_slice(changes);
        Ok(())
    }

    async fn update_version(&self, doc_id: &str, version_id: &str, patch: &VersionPatch) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.get_mut(doc_id).ok_or_else(|| StorageError::DocNotFound(doc_id.to_string()))?;
        let (meta, _, _) = doc
            .versions
            .iter_mut()
            .find(|(m, _, _)| m.id == version_id)
            .ok_or_else(|| StorageError::VersionNotFound(version_id.to_string()))?;
        if let Some(ended_at) = patch.ended_at {
            meta.ended_at = ended_at;
        }
        if let Some(end_rev) = patch.end_rev {
            meta.end_rev = end_rev;
        }
        if let Some(name) = &patch.name {
            meta.name = Some(name.clone());
        }
        Ok(())
    }

    async fn load_version_state(&self, doc_id: &str, version_id: &str) -> Result<Value> {
        let docs = self.docs.lock();
        let doc = docs.get(doc_id).ok_or_else(|| StorageError::DocNotFound(doc_id.to_string()))?;
        doc.versions
            .iter()
            .find(|(m, _, _)| m.id == version_id)
            .map(|(_, state, _)| state.clone())
            .ok_or_else(|| StorageError::VersionNotFound(version_id.to_string()))
    }

    async fn load_version_changes(&self, doc_id: &str, version_id: &str) -> Result<Vec<Change>> {
        let docs = self.docs.lock();
        let doc = docs.get(doc_id).ok_or_else(|| StorageError::DocNotFound(doc_id.to_string()))?;
        doc.versions
            .iter()
            .find(|(m, _, _)| m.id == version_id)
            .map(|(_, _, changes)| changes.clone())
            .ok_or_else(|| StorageError::VersionNotFound(version_id.to_string()))
    }

    async fn delete_doc(&self, doc_id: &str) -> Result<()> {
        self.docs.lock().remove(doc_id);
        Ok(())
    }

    async fn create_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(tombstone.doc_id.clone()).or_default();
        doc.tombstone = Some(tombstone.clone());
        Ok(())
    }

    async fn get_tombstone(&self, doc_id: &str) -> Result<Option<Tombstone>> {
        Ok(self.docs.lock().get(doc_id).and_then(|d| d.tombstone.clone()))
    }

    async fn remove_tombstone(&self, doc_id: &str) -> Result<()> {
        if let Some(doc) = self.docs.lock().get_mut(doc_id) {
            doc.tombstone = None;
        }
        Ok(())
    }

    async fn save_ops(&self, doc_id: &str, ops: &[(PointerBuf, Value, f64)]) -> Result<u64> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(doc_id.to_string()).or_default();
        for (path, value, ts) in ops {
            doc.ops_rev += 1;
            doc.ops.push(FieldRecord { path: path.clone(), value: value.clone(), ts: *ts, rev: doc.ops_rev });
        }
        Ok(doc.ops_rev)
    }

    async fn list_ops(&self, doc_id: &str, opts: &ListOpsOptions) -> Result<Vec<FieldRecord>> {
        let docs = self.docs.lock();
        let Some(doc) = docs.get(doc_id) else { return Ok(vec![]) };
        Ok(doc
            .ops
            .iter()
            .filter(|r| opts.since_rev.map_or(true, |since| r.rev > since))
            .filter(|r| opts.paths.as_ref().map_or(true, |paths| paths.contains(&r.path)))
            .cloned()
            .collect())
    }

    async fn get_snapshot(&self, doc_id: &str) -> Result<Option<(Value, u64)>> {
        Ok(self.docs.lock().get(doc_id).and_then(|d| d.snapshot.clone()))
    }

    async fn save_snapshot(&self, doc_id: &str, state: &Value, rev: u64) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(doc_id.to_string()).or_default();
        doc.snapshot = Some((state.clone(), rev));
        Ok(())
    }

    async fn create_branch(&self, branch: &Branch) -> Result<()> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(branch.source_doc_id.clone()).or_default();
        doc.branches.push(branch.clone());
        Ok(())
    }

    async fn list_branches(&self, source_doc_id: &str) -> Result<Vec<Branch>> {
        Ok(self.docs.lock().get(source_doc_id).map(|d| d.branches.clone()).unwrap_or_default())
    }

    async fn load_branch(&self, branch_id: &str) -> Result<Option<Branch>> {
        let docs = self.docs.lock();
        Ok(docs.values().flat_map(|d| d.branches.iter()).find(|b| b.id == branch_id).cloned())
    }

    async fn update_branch(&self, branch_id: &str, patch: &BranchPatch) -> Result<()> {
        let mut docs = self.docs.lock();
        for doc in docs.values_mut() {
            if let Some(branch) = doc.branches.iter_mut().find(|b| b.id == branch_id) {
                if let Some(status) = patch.status {
                    branch.status = status;
                }
                if let Some(name) = &patch.name {
                    branch.name = Some(name.clone());
                }
                return Ok(());
            }
        }
        Err(StorageError::BranchNotFound(branch_id.to_string()))
    }

    async fn close_branch(&self, branch_id: &str) -> Result<()> {
        self.update_branch(branch_id, &BranchPatch { status: Some(crate::types::BranchStatus::Closed), name: None }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patches_core::Operation;
    use serde_json::json;

    #[async_std::test]
    async fn save_and_list_changes_orders_by_rev() {
        let storage = MemoryStorage::new();
        let mut c1 = Change::new("a", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!(1), ts: None, soft: None }], 0.0);
        c1.rev = Some(2);
        let mut c2 = c1.clone();
        c2.id = "b".into();
        c2.rev = Some(1);
        storage.save_changes("doc1", &[c1, c2]).await.unwrap();
        let listed = storage.list_changes("doc1", &ListChangesOptions::default()).await.unwrap();
        assert_eq!(listed[0].id, "b");
        assert_eq!(listed[1].id, "a");
    }

    #[async_std::test]
    async fn save_ops_assigns_monotonic_rev() {
        let storage = MemoryStorage::new();
        let rev = storage
            .save_ops("doc1", &[(PointerBuf::parse("/x").unwrap(), json!(1), 1.0)])
            .await
            .unwrap();
        assert_eq!(rev, 1);
        let rev2 = storage
            .save_ops("doc1", &[(PointerBuf::parse("/y").unwrap(), json!(2), 2.0)])
            .await
            .unwrap();
        assert_eq!(rev2, 2);
    }
}
