//! Operational-transform server (C7) and client (C8) pipelines, plus the
//! versioning/session-grouping helper (C11) they both lean on.

pub mod client;
pub mod error;
pub mod ids;
pub mod server;
pub mod versioning;

pub use client::{apply_committed_changes, Snapshot};
pub use error::{OtError, Result};
pub use ids::{fresh_sortable_id, now_millis};
pub use server::{commit_changes, state_at_revision, CommitOptions, CommitOutcome, CommitResult};
pub use versioning::handle_offline_sessions_and_batches;
