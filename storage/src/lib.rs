//! Storage interface consumed by `patches-ot`/`patches-lww`, plus an
//! in-memory reference adapter (§6).

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{Result, StorageError};
pub use memory::MemoryStorage;
pub use traits::Storage;
pub use types::*;
