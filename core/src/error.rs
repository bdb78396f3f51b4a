use crate::pointer::PointerBuf;

/// Tagged error kinds for the JSON Patch / OT core, per the error handling design.
///
/// These are matched on by callers (the server pipeline in particular treats
/// most of them as "drop this op/change and log"), so they stay a closed,
/// structured set rather than opaque strings.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PatchError {
    #[error("path not found: {0}")]
    PathNotFound(PointerBuf),

    #[error("path type mismatch at {0}: expected a traversable container")]
    PathType(PointerBuf),

    #[error("index {index} out of range (len {len}) at {path}")]
    IndexOutOfRange {
        path: PointerBuf,
        index: usize,
        len: usize,
    },

    #[error("unknown operation kind: {0}")]
    UnknownOp(String),

    #[error("non-contiguous change stream: expected rev {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("client baseRev {base_rev} is ahead of server currentRev {current_rev}")]
    BehindClient { base_rev: u64, current_rev: u64 },

    #[error("root replace with baseRev 0 on an existing document")]
    ExistingDoc,

    #[error("inconsistent batch: changes do not share a single baseRev")]
    InconsistentBatch,

    #[error("cannot branch from a branch document")]
    BranchOfBranch,

    #[error("branch is not open")]
    BranchNotOpen,
}

pub type Result<T> = std::result::Result<T, PatchError>;
