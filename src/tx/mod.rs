//! Transaction management.
//!
//! A transaction's mode decides which operations are legal: a `ReadOnly`
//! transaction never reaches a mutating `StorageBackend` call (the executor
//! enforces this), a `ReadWrite` transaction stages writes that become
//! visible to the rest of the store only on commit (spec §4.2/§5).

use serde::{Deserialize, Serialize};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// Transaction trait that all backends must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;
}
