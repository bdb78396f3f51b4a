//! Last-writer-wins consolidation (C9), client display merge, and branch
//! merge (C10), per §4.9.

pub mod consolidate;
pub mod error;
pub mod merge;
pub mod project;

pub use consolidate::{consolidate_field_op, consolidate_ops, incoming_wins, ConsolidateResult};
pub use error::{LwwError, Result};
pub use merge::{merge_branch_into_source, merge_server_with_local, MergeResult};
pub use project::project_fields;
