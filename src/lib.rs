//! `patches`: a collaborative JSON document engine supporting both
//! operational transform and last-writer-wins consistency (§2 "System
//! Overview"). This crate is the facade: it owns configuration, the
//! per-document commit lock and subscriber fan-out, and the `DocHandle`
//! through which callers reach the pure algorithms in `patches-core`, the
//! storage contract in `patches-storage`, and the OT/LWW pipelines in
//! `patches-ot`/`patches-lww`.

pub mod config;
pub mod doc;
pub mod engine;
pub mod events;

pub use config::Config;
pub use doc::DocHandle;
pub use engine::{ConsistencyMode, Engine};
pub use events::{DocUpdate, EventBroker, EventStream};

pub use patches_core as core;
pub use patches_lww as lww;
pub use patches_ot as ot;
pub use patches_storage as storage;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use patches_core::{Change, Operation, PointerBuf};
    use patches_storage::MemoryStorage;
    use serde_json::json;
    use std::sync::Arc;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[async_std::test]
    async fn ot_round_trip_commits_and_notifies_subscriber() {
        init_tracing();
        let engine = Engine::new(Arc::new(MemoryStorage::new()), Config::default());
        let doc = engine.doc("doc1", ConsistencyMode::OperationalTransform);
        let mut sub = doc.subscribe("bob");

        let change = Change::new("c1", 0, vec![Operation::Replace { path: PointerBuf::root(), value: json!({"x": 1}), ts: None, soft: None }], 0.0);
        let result = doc.commit(vec![change], Some("alice")).await.unwrap();
        assert_eq!(result.new.len(), 1);

        let update = sub.next().await.unwrap();
        assert_eq!(update.doc_id, "doc1");

        let (state, rev) = doc.get_doc().await.unwrap();
        assert_eq!(state, json!({"x": 1}));
        assert_eq!(rev, 1);
    }

    #[async_std::test]
    async fn lww_apply_ops_persists_and_projects() {
        init_tracing();
        let engine = Engine::new(Arc::new(MemoryStorage::new()), Config::default());
        let doc = engine.doc("doc2", ConsistencyMode::LastWriterWins);

        let ops = vec![Operation::Replace { path: PointerBuf::parse("/count").unwrap(), value: json!(1), ts: Some(1.0), soft: None }];
        doc.apply_ops(ops, None).await.unwrap();

        let inc = vec![Operation::Inc { path: PointerBuf::parse("/count").unwrap(), value: 4.0, ts: Some(2.0) }];
        let result = doc.apply_ops(inc, None).await.unwrap();
        assert_eq!(result.ops_to_save[0], Operation::Replace { path: PointerBuf::parse("/count").unwrap(), value: json!(5.0), ts: Some(2.0), soft: None });

        let (state, _) = doc.get_doc().await.unwrap();
        assert_eq!(state, json!({"count": 5.0}));
    }

    #[async_std::test]
    async fn mismatched_mode_call_is_rejected() {
        let engine = Engine::new(Arc::new(MemoryStorage::new()), Config::default());
        let doc = engine.doc("doc3", ConsistencyMode::LastWriterWins);
        assert!(doc.commit(vec![], None).await.is_err());
    }
}
