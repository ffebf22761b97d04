//! # Graph Store (C2)
//!
//! This is the contract between the Cypher engine and any storage engine.
//! It covers exactly the surface spec §4.2/§6.3 ask for: transactions, node
//! and relationship CRUD, scans and adjacency. Index creation DDL, schema
//! constraints, procedures, and vector search are explicit Non-goals — the
//! store is free to maintain internal label/type/adjacency indexes (and
//! `MemoryBackend` does), but nothing in the trait lets a query name one.

pub mod durable;
pub mod memory;

use async_trait::async_trait;
use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::{Error, Result};

pub use durable::DurableBackend;
pub use memory::MemoryBackend;

/// What a backend can do — currently only used to decide whether a durable
/// commit barrier exists; kept small on purpose (spec §6.3 is a contract,
/// not a feature-negotiation surface).
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCapabilities {
    pub durable: bool,
}

/// The universal storage contract (spec §4.2).
///
/// Every mutating method takes `&mut Self::Tx`: a transaction accumulates a
/// pending changeset that becomes visible to other transactions only at
/// `commit_tx`, and is discarded whole at `rollback_tx`. Reads made through
/// the *same* transaction always see its own pending writes (spec §4.2's
/// "writes are visible to subsequent reads within the same transaction").
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    /// Report what this backend can do (currently just durability).
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction. A `ReadWrite` transaction blocks until any
    /// in-flight writer has committed or rolled back (spec §5: single
    /// concurrent writer, many concurrent readers).
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction's pending changeset atomically.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Discard a transaction's pending changeset.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node / relationship CRUD
    // ========================================================================

    async fn create_node(&self, tx: &mut Self::Tx, labels: Vec<String>, props: PropertyMap) -> Result<NodeId>;

    async fn create_rel(
        &self,
        tx: &mut Self::Tx,
        rel_type: &str,
        from: NodeId,
        to: NodeId,
        props: PropertyMap,
    ) -> Result<RelId>;

    async fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;
    async fn get_rel(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    async fn set_node_prop(&self, tx: &mut Self::Tx, id: NodeId, key: &str, val: Value) -> Result<()>;
    async fn remove_node_prop(&self, tx: &mut Self::Tx, id: NodeId, key: &str) -> Result<()>;
    async fn set_rel_prop(&self, tx: &mut Self::Tx, id: RelId, key: &str, val: Value) -> Result<()>;
    async fn remove_rel_prop(&self, tx: &mut Self::Tx, id: RelId, key: &str) -> Result<()>;

    async fn add_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;
    async fn remove_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;

    /// Delete a node. Fails with `ConstraintViolation` if it still has
    /// incident relationships (spec §3.2/§4.2).
    async fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<()>;

    /// Delete a node and every incident relationship atomically. Returns
    /// the ids of the relationships removed so the caller can report exact
    /// counts (spec §8.1: `DETACH DELETE n` removes exactly `k+1` elements).
    async fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<Vec<RelId>>;

    async fn delete_rel(&self, tx: &mut Self::Tx, id: RelId) -> Result<()>;

    // ========================================================================
    // Scans
    // ========================================================================

    async fn scan_all_nodes(&self, tx: &Self::Tx) -> Result<Vec<Node>>;
    async fn scan_nodes_with_label(&self, tx: &Self::Tx, label: &str) -> Result<Vec<Node>>;
    async fn scan_all_rels(&self, tx: &Self::Tx) -> Result<Vec<Relationship>>;
    async fn scan_rels_of_type(&self, tx: &Self::Tx, rel_type: &str) -> Result<Vec<Relationship>>;

    // ========================================================================
    // Adjacency
    // ========================================================================

    /// Outgoing edges from `node`, optionally filtered to the given types.
    /// Each entry is `(relationship id, neighbour node id)`.
    async fn out_edges(&self, tx: &Self::Tx, node: NodeId, types: &[String]) -> Result<Vec<(RelId, NodeId)>>;

    /// Incoming edges into `node`, optionally filtered to the given types.
    async fn in_edges(&self, tx: &Self::Tx, node: NodeId, types: &[String]) -> Result<Vec<(RelId, NodeId)>>;

    /// All edges incident to `node` regardless of direction, tagged with
    /// the direction they were traversed in from `node`'s perspective.
    async fn both_edges(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        types: &[String],
    ) -> Result<Vec<(RelId, NodeId, Direction)>>;

    // ========================================================================
    // Introspection
    // ========================================================================

    async fn node_count(&self, tx: &Self::Tx) -> Result<u64>;
    async fn rel_count(&self, tx: &Self::Tx) -> Result<u64>;
}

pub(crate) fn write_guard_error() -> Error {
    Error::TxError("cannot mutate the store through a read-only transaction".into())
}
