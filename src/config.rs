//! Engine-wide configuration, §6 "Configuration".

use patches_core::ApplyOptions;
use patches_ot::CommitOptions;
use std::time::Duration;

/// Options recognized by the engine: the OT commit pipeline's knobs plus the
/// per-apply options (§4.3) used when folding changes locally.
#[derive(Debug, Clone)]
pub struct Config {
    /// Session boundary for versioning (§4.10). Default 30 minutes.
    pub session_timeout: Duration,
    /// Cap for batch splitting after offline-branch collapse.
    pub max_payload_bytes: Option<usize>,
    /// Relaxes `baseRev` consistency and preserves incoming timestamps.
    pub historical_import: bool,
    /// Bypasses transform no-op detection in the commit pipeline.
    pub force_commit: bool,
    /// Apply options used wherever the engine folds ops locally (`strict`/
    /// `silent`/`rigid`/`at_path`).
    pub apply: ApplyOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30 * 60),
            max_payload_bytes: None,
            historical_import: false,
            force_commit: false,
            apply: ApplyOptions::default(),
        }
    }
}

impl Config {
    pub(crate) fn commit_options(&self) -> CommitOptions {
        CommitOptions {
            session_timeout_millis: self.session_timeout.as_millis() as f64,
            historical_import: self.historical_import,
            force_commit: self.force_commit,
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}
