//! Projects a document's LWW field-record history onto a nested JSON value,
//! per §3 "Field record (LWW)": "the document's LWW state is the projection
//! of field records onto a nested value by their paths (deepest writes at a
//! subtree take precedence only via parent-overwrite at commit time)".
//!
//! Reuses the apply engine's single-op path rather than re-implementing
//! container traversal: folding the records as `replace` ops in ascending
//! `rev` order naturally gives ancestor writes precedence (an ancestor
//! replace turns a subtree into whatever value it carries, silently
//! discarding any since-stale descendant record whose parent is no longer a
//! container). The root path is special-cased since `replace` at the empty
//! pointer has no parent to traverse to.

use patches_core::{apply_single, Operation, Registry};
use patches_storage::FieldRecord;
use serde_json::{Map, Value};

pub fn project_fields(registry: &Registry, records: &[FieldRecord]) -> Value {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.rev);
    let mut state = Value::Null;
    for record in sorted {
        if record.path.is_root() {
            state = record.value;
            continue;
        }
        // A fresh document has no seeded root record; the first field write
        // still needs a container to land in.
        if state.is_null() {
            state = Value::Object(Map::new());
        }
        let op = Operation::Replace { path: record.path.clone(), value: record.value, ts: Some(record.ts), soft: None };
        if let Err(err) = apply_single(registry, &mut state, &op) {
            tracing::debug!(path = %record.path, error = %err, "dropping stale field record during projection");
        }
    }
    state
}
