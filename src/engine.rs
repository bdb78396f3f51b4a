//! Ties `patches-core`/`patches-storage`/`patches-ot`/`patches-lww` together
//! behind the document handles the facade hands out.

use crate::config::Config;
use crate::events::EventBroker;
use fnv::FnvHashMap;
use futures::lock::Mutex as AsyncMutex;
use parking_lot::Mutex;
use patches_core::Registry;
use patches_storage::Storage;
use std::sync::Arc;

/// Which consistency model a document uses (§3 "Document (OT)" vs. "Field
/// record (LWW)"). Fixed per document at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMode {
    /// Operational transform: ordered, rebased `Change`s (C4, C6, C7, C8).
    OperationalTransform,
    /// Last-writer-wins field consolidation (C9, C10).
    LastWriterWins,
}

/// Owns the storage backend, the operator registry, configuration, and the
/// subscriber fan-out; hands out [`crate::doc::DocHandle`]s bound to a
/// `docId`.
#[derive(Clone)]
pub struct Engine(pub(crate) Arc<Inner>);

pub(crate) struct Inner {
    pub storage: Arc<dyn Storage>,
    pub registry: Registry,
    pub config: Config,
    pub events: EventBroker,
    /// Per-document commit locks, per §5 "the server must serialize commit
    /// pipelines per docId". Lazily created, kept for the engine's lifetime.
    pub locks: Mutex<FnvHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>, config: Config) -> Self {
        Self::with_registry(storage, Registry::new(), config)
    }

    /// Same as [`Engine::new`] but with a caller-supplied registry (e.g. one
    /// with custom operator kinds registered, §9 "Operator extensibility").
    pub fn with_registry(storage: Arc<dyn Storage>, registry: Registry, config: Config) -> Self {
        Self(Arc::new(Inner { storage, registry, config, events: EventBroker::new(), locks: Mutex::new(FnvHashMap::default()) }))
    }

    /// Returns a handle for `doc_id` using `mode`'s consistency model.
    pub fn doc(&self, doc_id: impl Into<String>, mode: ConsistencyMode) -> crate::doc::DocHandle {
        crate::doc::DocHandle::new(self.clone(), doc_id.into(), mode)
    }

    pub(crate) fn lock_for(&self, doc_id: &str) -> Arc<AsyncMutex<()>> {
        self.0.locks.lock().entry(doc_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.0.storage.as_ref()
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub(crate) fn config(&self) -> &Config {
        &self.0.config
    }

    pub(crate) fn events(&self) -> &EventBroker {
        &self.0.events
    }
}
