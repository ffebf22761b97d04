//! # GraphForge — embedded property-graph database
//!
//! An in-process graph store with an openCypher-subset query engine on
//! top: parse, plan, evaluate expressions, execute.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between query engine and storage
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross all boundaries
//! 3. **Parser owns nothing**: Cypher → AST is a pure function
//! 4. **Backend-agnostic planner**: logical plans don't know about storage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphforge::{Graph, Value, PropertyMap};
//!
//! # async fn example() -> graphforge::Result<()> {
//! let graph = Graph::open_memory().await?;
//!
//! let mut params = PropertyMap::new();
//! params.insert("name".into(), Value::from("Ada"));
//! let result = graph.execute(
//!     "CREATE (n:Person {name: $name}) RETURN n",
//!     params,
//! ).await?;
//!
//! for row in &result.rows {
//!     println!("{:?}", row.get_value("n"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | Memory  | In-memory graph for testing/embedding (default) |
//! | Durable | Append-only WAL-backed backend with crash recovery |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod planner;
pub mod execution;
pub mod storage;
pub mod tx;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Path, Value, PropertyMap,
    NodeId, RelId, Direction,
};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{StorageBackend, BackendCapabilities};

// ============================================================================
// Re-exports: Transactions
// ============================================================================

pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Re-exports: Execution
// ============================================================================

pub use execution::{CancellationToken, QueryResult, ResultRow, ExecutionStats, FromValue};

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` wraps a storage backend and
/// provides Cypher execution.
pub struct Graph<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> Graph<B> {
    /// Create a Graph with the given backend.
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Execute a read-only Cypher query with parameters. Opens a `ReadOnly`
    /// transaction unconditionally; a query that turns out to contain a
    /// write clause fails with `Error::TxError` the moment the executor
    /// reaches it, rather than being silently upgraded (spec §5/§6.1 —
    /// callers pick the mode by calling `execute` or `mutate`, the engine
    /// never sniffs the AST to choose for them).
    pub async fn execute<P>(&self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        self.run(query, params, TxMode::ReadOnly, &CancellationToken::new()).await
    }

    /// Execute a Cypher query that may write, with parameters. Opens a
    /// `ReadWrite` transaction unconditionally (spec §6.1).
    pub async fn mutate<P>(&self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        self.run(query, params, TxMode::ReadWrite, &CancellationToken::new()).await
    }

    /// Same as [`Self::execute`], but aborts (rolling back any uncommitted
    /// writes) the moment `token.cancel()` is observed (spec §5).
    pub async fn execute_cancellable<P>(&self, query: &str, params: P, token: &CancellationToken) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        self.run(query, params, TxMode::ReadOnly, token).await
    }

    /// Same as [`Self::mutate`], cancellable.
    pub async fn mutate_cancellable<P>(&self, query: &str, params: P, token: &CancellationToken) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        self.run(query, params, TxMode::ReadWrite, token).await
    }

    async fn run<P>(&self, query: &str, params: P, mode: TxMode, token: &CancellationToken) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        let ast = cypher::parse(query)?;
        let params = params.into();

        let logical = planner::plan(&ast, &params)?;
        let optimized = planner::optimize(logical);

        let mut tx = self.backend.begin_tx(mode).await?;
        match execution::execute_cancellable(&self.backend, &mut tx, &optimized, &params, token).await {
            Ok(result) => {
                self.backend.commit_tx(tx).await?;
                Ok(result)
            }
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                Err(e)
            }
        }
    }

    /// Begin an explicit transaction spanning several statements.
    pub async fn begin(&self, mode: TxMode) -> Result<ExplicitTx<'_, B>> {
        let tx = self.backend.begin_tx(mode).await?;
        Ok(ExplicitTx { graph: self, tx: Some(tx) })
    }

    /// Create a node directly, bypassing Cypher (spec §6.2 builder API).
    pub async fn create_node(&self, labels: Vec<String>, props: PropertyMap) -> Result<Node> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let id = self.backend.create_node(&mut tx, labels, props).await?;
        let node = self.backend.get_node(&tx, id).await?.expect("just created");
        self.backend.commit_tx(tx).await?;
        Ok(node)
    }

    /// Create a relationship directly, bypassing Cypher.
    pub async fn create_rel(
        &self,
        rel_type: &str,
        from: NodeId,
        to: NodeId,
        props: PropertyMap,
    ) -> Result<Relationship> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let id = self.backend.create_rel(&mut tx, rel_type, from, to, props).await?;
        let rel = self.backend.get_rel(&tx, id).await?.expect("just created");
        self.backend.commit_tx(tx).await?;
        Ok(rel)
    }

    /// Set (or, for a `Null` value, remove — spec §3.2) properties on an
    /// existing node, bypassing Cypher.
    pub async fn set_node_props(&self, id: NodeId, props: PropertyMap) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        for (k, v) in props.iter() {
            if v.is_null() {
                self.backend.remove_node_prop(&mut tx, id, k).await?;
            } else {
                self.backend.set_node_prop(&mut tx, id, k, v.clone()).await?;
            }
        }
        self.backend.commit_tx(tx).await
    }

    /// Set (or remove, for `Null`) properties on an existing relationship.
    pub async fn set_rel_props(&self, id: RelId, props: PropertyMap) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        for (k, v) in props.iter() {
            if v.is_null() {
                self.backend.remove_rel_prop(&mut tx, id, k).await?;
            } else {
                self.backend.set_rel_prop(&mut tx, id, k, v.clone()).await?;
            }
        }
        self.backend.commit_tx(tx).await
    }

    /// Delete a node directly. `detach = true` removes incident
    /// relationships atomically (spec §3.2); otherwise a node with
    /// incident relationships fails with `Error::ConstraintViolation`.
    pub async fn delete_node(&self, id: NodeId, detach: bool) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        if detach {
            self.backend.detach_delete_node(&mut tx, id).await?;
        } else {
            self.backend.delete_node(&mut tx, id).await?;
        }
        self.backend.commit_tx(tx).await
    }

    /// Delete a relationship directly.
    pub async fn delete_rel(&self, id: RelId) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        self.backend.delete_rel(&mut tx, id).await?;
        self.backend.commit_tx(tx).await
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// In-memory graph for testing and embedding.
impl Graph<storage::MemoryBackend> {
    pub async fn open_memory() -> Result<Self> {
        Ok(Self::with_backend(storage::MemoryBackend::new()))
    }
}

/// Durable, crash-recoverable graph backed by a WAL file on disk.
impl Graph<storage::DurableBackend> {
    pub async fn open_durable(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::with_backend(storage::DurableBackend::open(path)?))
    }
}

/// Explicit transaction handle. Dropping it without calling `commit` or
/// `rollback` leaves the transaction's changeset undiscarded by this
/// handle; callers that need rollback-on-drop should call `rollback`
/// explicitly before going out of scope.
pub struct ExplicitTx<'g, B: StorageBackend> {
    graph: &'g Graph<B>,
    tx: Option<B::Tx>,
}

impl<'g, B: StorageBackend> ExplicitTx<'g, B> {
    pub async fn execute<P>(&mut self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        let ast = cypher::parse(query)?;
        let params = params.into();
        let logical = planner::plan(&ast, &params)?;
        let optimized = planner::optimize(logical);
        let tx = self.tx.as_mut().expect("transaction already finished");
        execution::execute(&self.graph.backend, tx, &optimized, &params).await
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self.tx.take().expect("transaction already finished");
        self.graph.backend.commit_tx(tx).await
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.tx.take().expect("transaction already finished");
        self.graph.backend.rollback_tx(tx).await
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Crate-wide error taxonomy (spec §7). Parse/semantic/type errors fail
/// before execution starts; runtime/storage errors abort the in-flight
/// query and roll back its transaction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error at position {position}: {message}")]
    ParseError { position: usize, message: String },

    #[error("semantic error: {0}")]
    SemanticError(String),

    #[error("type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("transaction error: {0}")]
    TxError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
