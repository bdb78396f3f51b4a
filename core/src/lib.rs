//! Pure, storage-agnostic document algebra: JSON Pointer paths, the
//! operator set, and the apply/compose/invert/transform/rebase engines
//! that `patches-ot` and `patches-lww` build on.

pub mod apply;
pub mod compose;
pub mod error;
pub mod op;
pub mod pointer;
pub mod rebase;
pub mod registry;
pub mod semantics;
pub mod textdelta;
pub mod transform;

pub use apply::{apply, apply_single, ApplyOptions};
pub use compose::{compose, invert};
pub use error::{PatchError, Result};
pub use op::{Change, Operation};
pub use pointer::PointerBuf;
pub use rebase::rebase;
pub use registry::{Operator, Registry};
pub use textdelta::TextDelta;
pub use transform::transform;
