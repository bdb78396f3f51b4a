//! The operation vocabulary: RFC 6902-style ops plus the LWW/CRDT extensions
//! (`@txt`, `@inc`, `@bit`, `@max`, `@min`).

use crate::pointer::PointerBuf;
use crate::textdelta::TextDelta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One operation in a patch. The wire shape is `{op, path, value?, from?, ts?, soft?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Add {
        path: PointerBuf,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        soft: Option<bool>,
    },
    Remove {
        path: PointerBuf,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    Replace {
        path: PointerBuf,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        soft: Option<bool>,
    },
    Copy {
        from: PointerBuf,
        path: PointerBuf,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    Move {
        from: PointerBuf,
        path: PointerBuf,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    #[serde(rename = "@txt")]
    Txt {
        path: PointerBuf,
        delta: TextDelta,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    #[serde(rename = "@inc")]
    Inc {
        path: PointerBuf,
        value: f64,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    #[serde(rename = "@bit")]
    Bit {
        path: PointerBuf,
        mask: i64,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    #[serde(rename = "@max")]
    Max {
        path: PointerBuf,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
    #[serde(rename = "@min")]
    Min {
        path: PointerBuf,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        ts: Option<f64>,
    },
}

impl Operation {
    /// The path an op targets; for `copy`/`move` this is the destination.
    pub fn path(&self) -> &PointerBuf {
        match self {
            Operation::Add { path, .. }
            | Operation::Remove { path, .. }
            | Operation::Replace { path, .. }
            | Operation::Copy { path, .. }
            | Operation::Move { path, .. }
            | Operation::Txt { path, .. }
            | Operation::Inc { path, .. }
            | Operation::Bit { path, .. }
            | Operation::Max { path, .. }
            | Operation::Min { path, .. } => path,
        }
    }

    pub fn with_path(&self, path: PointerBuf) -> Self {
        let mut op = self.clone();
        match &mut op {
            Operation::Add { path: p, .. }
            | Operation::Remove { path: p, .. }
            | Operation::Replace { path: p, .. }
            | Operation::Copy { path: p, .. }
            | Operation::Move { path: p, .. }
            | Operation::Txt { path: p, .. }
            | Operation::Inc { path: p, .. }
            | Operation::Bit { path: p, .. }
            | Operation::Max { path: p, .. }
            | Operation::Min { path: p, .. } => *p = path,
        }
        op
    }

    pub fn ts(&self) -> Option<f64> {
        match self {
            Operation::Add { ts, .. }
            | Operation::Remove { ts, .. }
            | Operation::Replace { ts, .. }
            | Operation::Copy { ts, .. }
            | Operation::Move { ts, .. }
            | Operation::Txt { ts, .. }
            | Operation::Inc { ts, .. }
            | Operation::Bit { ts, .. }
            | Operation::Max { ts, .. }
            | Operation::Min { ts, .. } => *ts,
        }
    }

    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Operation::Add { soft: Some(true), .. } | Operation::Replace { soft: Some(true), .. }
        )
    }

    /// Combinable CRDT operators: `@inc`, `@bit`, `@max`, `@min`, `@txt`.
    pub fn is_combinable(&self) -> bool {
        matches!(
            self,
            Operation::Inc { .. }
                | Operation::Bit { .. }
                | Operation::Max { .. }
                | Operation::Min { .. }
                | Operation::Txt { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Remove { .. } => "remove",
            Operation::Replace { .. } => "replace",
            Operation::Copy { .. } => "copy",
            Operation::Move { .. } => "move",
            Operation::Txt { .. } => "@txt",
            Operation::Inc { .. } => "@inc",
            Operation::Bit { .. } => "@bit",
            Operation::Max { .. } => "@max",
            Operation::Min { .. } => "@min",
        }
    }
}

/// A committed (or pending) unit of change, per §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub id: String,
    #[serde(rename = "baseRev")]
    pub base_rev: u64,
    #[serde(rename = "rev", skip_serializing_if = "Option::is_none", default)]
    pub rev: Option<u64>,
    pub ops: Vec<Operation>,
    #[serde(rename = "createdAt")]
    pub created_at: f64,
    #[serde(rename = "committedAt", skip_serializing_if = "Option::is_none", default)]
    pub committed_at: Option<f64>,
    #[serde(rename = "batchId", skip_serializing_if = "Option::is_none", default)]
    pub batch_id: Option<String>,
}

impl Change {
    pub fn new(id: impl Into<String>, base_rev: u64, ops: Vec<Operation>, created_at: f64) -> Self {
        Self {
            id: id.into(),
            base_rev,
            rev: None,
            ops,
            created_at,
            committed_at: None,
            batch_id: None,
        }
    }
}
