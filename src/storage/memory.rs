//! In-memory storage backend.
//!
//! The reference implementation of `StorageBackend`. Committed state lives
//! behind a single `RwLock`; a `ReadWrite` transaction accumulates its
//! writes in a private overlay and only touches the committed state at
//! `commit_tx`, guarded by a write-permit mutex so at most one writer is
//! ever staging changes at a time (spec §4.2/§5). `ReadOnly` transactions
//! never take the write permit and can run concurrently with each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};

use crate::model::*;
use crate::tx::{Transaction, TxId, TxMode};
use crate::{Error, Result};

use super::{write_guard_error, BackendCapabilities, StorageBackend};

// ============================================================================
// Committed state
// ============================================================================

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    rels: HashMap<RelId, Relationship>,
    label_index: HashMap<String, Vec<NodeId>>,
    type_index: HashMap<String, Vec<RelId>>,
    /// node -> outgoing relationship ids
    out_adj: HashMap<NodeId, Vec<RelId>>,
    /// node -> incoming relationship ids
    in_adj: HashMap<NodeId, Vec<RelId>>,
}

impl GraphState {
    fn link(&mut self, rel: &Relationship) {
        self.out_adj.entry(rel.src).or_default().push(rel.id);
        self.in_adj.entry(rel.dst).or_default().push(rel.id);
        self.type_index.entry(rel.rel_type.clone()).or_default().push(rel.id);
    }

    fn unlink(&mut self, rel: &Relationship) {
        if let Some(v) = self.out_adj.get_mut(&rel.src) {
            v.retain(|id| *id != rel.id);
        }
        if let Some(v) = self.in_adj.get_mut(&rel.dst) {
            v.retain(|id| *id != rel.id);
        }
        if let Some(v) = self.type_index.get_mut(&rel.rel_type) {
            v.retain(|id| *id != rel.id);
        }
    }

    fn index_labels(&mut self, node: &Node) {
        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().push(node.id);
        }
    }

    fn unindex_labels(&mut self, node: &Node) {
        for label in &node.labels {
            if let Some(v) = self.label_index.get_mut(label) {
                v.retain(|id| *id != node.id);
            }
        }
    }
}

// ============================================================================
// MemoryBackend
// ============================================================================

pub struct MemoryBackend {
    state: Arc<RwLock<GraphState>>,
    write_permit: Arc<Mutex<()>>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            write_permit: Arc::new(Mutex::new(())),
            next_node_id: AtomicU64::new(1),
            next_rel_id: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
        }
    }
}

// ============================================================================
// Pending changeset / transaction
// ============================================================================

/// `None` in either overlay map marks a deletion of a previously-committed
/// element; `Some` covers both freshly-created and modified elements.
#[derive(Default)]
struct Overlay {
    nodes: HashMap<NodeId, Option<Node>>,
    rels: HashMap<RelId, Option<Relationship>>,
}

pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    overlay: Overlay,
    _permit: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode {
        self.mode
    }
    fn id(&self) -> TxId {
        self.id
    }
}

impl MemoryTx {
    fn require_write(&self) -> Result<()> {
        if self.mode == TxMode::ReadOnly {
            return Err(write_guard_error());
        }
        Ok(())
    }

    fn has_pending(&self) -> bool {
        !self.overlay.nodes.is_empty() || !self.overlay.rels.is_empty()
    }
}

// ============================================================================
// Effective (committed + overlay) views
// ============================================================================

impl MemoryBackend {
    fn effective_node(&self, state: &GraphState, tx: &MemoryTx, id: NodeId) -> Option<Node> {
        match tx.overlay.nodes.get(&id) {
            Some(v) => v.clone(),
            None => state.nodes.get(&id).cloned(),
        }
    }

    fn effective_rel(&self, state: &GraphState, tx: &MemoryTx, id: RelId) -> Option<Relationship> {
        match tx.overlay.rels.get(&id) {
            Some(v) => v.clone(),
            None => state.rels.get(&id).cloned(),
        }
    }

    fn effective_all_nodes(&self, state: &GraphState, tx: &MemoryTx) -> Vec<Node> {
        let mut out: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| !tx.overlay.nodes.contains_key(&n.id))
            .cloned()
            .collect();
        for v in tx.overlay.nodes.values().flatten() {
            out.push(v.clone());
        }
        out.sort_by_key(|n| n.id.0);
        out
    }

    fn effective_all_rels(&self, state: &GraphState, tx: &MemoryTx) -> Vec<Relationship> {
        let mut out: Vec<Relationship> = state
            .rels
            .values()
            .filter(|r| !tx.overlay.rels.contains_key(&r.id))
            .cloned()
            .collect();
        for v in tx.overlay.rels.values().flatten() {
            out.push(v.clone());
        }
        out.sort_by_key(|r| r.id.0);
        out
    }

    fn incident_rels(&self, state: &GraphState, tx: &MemoryTx, node: NodeId) -> Vec<Relationship> {
        self.effective_all_rels(state, tx)
            .into_iter()
            .filter(|r| r.src == node || r.dst == node)
            .collect()
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { durable: false }
    }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.next_tx_id.fetch_add(1, Ordering::Relaxed));
        let permit = match mode {
            TxMode::ReadWrite => Some(Mutex::lock_arc(&self.write_permit)),
            TxMode::ReadOnly => None,
        };
        Ok(MemoryTx { id, mode, overlay: Overlay::default(), _permit: permit })
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        if !tx.has_pending() {
            return Ok(());
        }
        let mut state = self.state.write();
        for (id, overlay_node) in tx.overlay.nodes {
            match overlay_node {
                Some(node) => {
                    if let Some(old) = state.nodes.get(&id).cloned() {
                        state.unindex_labels(&old);
                    }
                    state.index_labels(&node);
                    state.nodes.insert(id, node);
                }
                None => {
                    if let Some(old) = state.nodes.remove(&id) {
                        state.unindex_labels(&old);
                    }
                    state.out_adj.remove(&id);
                    state.in_adj.remove(&id);
                }
            }
        }
        for (id, overlay_rel) in tx.overlay.rels {
            match overlay_rel {
                Some(rel) => {
                    if let Some(old) = state.rels.get(&id).cloned() {
                        state.unlink(&old);
                    }
                    state.link(&rel);
                    state.rels.insert(id, rel);
                }
                None => {
                    if let Some(old) = state.rels.remove(&id) {
                        state.unlink(&old);
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback_tx(&self, _tx: MemoryTx) -> Result<()> {
        Ok(())
    }

    // ========================================================================
    // Node / relationship CRUD
    // ========================================================================

    async fn create_node(&self, tx: &mut MemoryTx, labels: Vec<String>, props: PropertyMap) -> Result<NodeId> {
        tx.require_write()?;
        let id = NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed));
        let node = Node { id, element_id: None, labels, properties: props };
        tx.overlay.nodes.insert(id, Some(node));
        Ok(id)
    }

    async fn create_rel(
        &self,
        tx: &mut MemoryTx,
        rel_type: &str,
        from: NodeId,
        to: NodeId,
        props: PropertyMap,
    ) -> Result<RelId> {
        tx.require_write()?;
        let state = self.state.read();
        if self.effective_node(&state, tx, from).is_none() {
            return Err(Error::NotFound(format!("node {from}")));
        }
        if self.effective_node(&state, tx, to).is_none() {
            return Err(Error::NotFound(format!("node {to}")));
        }
        drop(state);
        let id = RelId(self.next_rel_id.fetch_add(1, Ordering::Relaxed));
        let rel = Relationship {
            id,
            element_id: None,
            src: from,
            dst: to,
            rel_type: rel_type.to_string(),
            properties: props,
        };
        tx.overlay.rels.insert(id, Some(rel));
        Ok(id)
    }

    async fn get_node(&self, tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.effective_node(&self.state.read(), tx, id))
    }

    async fn get_rel(&self, tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        Ok(self.effective_rel(&self.state.read(), tx, id))
    }

    async fn set_node_prop(&self, tx: &mut MemoryTx, id: NodeId, key: &str, val: Value) -> Result<()> {
        tx.require_write()?;
        let mut node = self
            .effective_node(&self.state.read(), tx, id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        if val.is_null() {
            node.properties.shift_remove(key);
        } else {
            node.properties.insert(key.to_string(), val);
        }
        tx.overlay.nodes.insert(id, Some(node));
        Ok(())
    }

    async fn remove_node_prop(&self, tx: &mut MemoryTx, id: NodeId, key: &str) -> Result<()> {
        tx.require_write()?;
        let mut node = self
            .effective_node(&self.state.read(), tx, id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        node.properties.shift_remove(key);
        tx.overlay.nodes.insert(id, Some(node));
        Ok(())
    }

    async fn set_rel_prop(&self, tx: &mut MemoryTx, id: RelId, key: &str, val: Value) -> Result<()> {
        tx.require_write()?;
        let mut rel = self
            .effective_rel(&self.state.read(), tx, id)
            .ok_or_else(|| Error::NotFound(format!("relationship {id}")))?;
        if val.is_null() {
            rel.properties.shift_remove(key);
        } else {
            rel.properties.insert(key.to_string(), val);
        }
        tx.overlay.rels.insert(id, Some(rel));
        Ok(())
    }

    async fn remove_rel_prop(&self, tx: &mut MemoryTx, id: RelId, key: &str) -> Result<()> {
        tx.require_write()?;
        let mut rel = self
            .effective_rel(&self.state.read(), tx, id)
            .ok_or_else(|| Error::NotFound(format!("relationship {id}")))?;
        rel.properties.shift_remove(key);
        tx.overlay.rels.insert(id, Some(rel));
        Ok(())
    }

    async fn add_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        tx.require_write()?;
        let mut node = self
            .effective_node(&self.state.read(), tx, id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        if !node.has_label(label) {
            node.labels.push(label.to_string());
        }
        tx.overlay.nodes.insert(id, Some(node));
        Ok(())
    }

    async fn remove_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        tx.require_write()?;
        let mut node = self
            .effective_node(&self.state.read(), tx, id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        node.labels.retain(|l| l != label);
        tx.overlay.nodes.insert(id, Some(node));
        Ok(())
    }

    async fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<()> {
        tx.require_write()?;
        let state = self.state.read();
        if self.effective_node(&state, tx, id).is_none() {
            return Err(Error::NotFound(format!("node {id}")));
        }
        let incident = self.incident_rels(&state, tx, id);
        drop(state);
        if !incident.is_empty() {
            return Err(Error::ConstraintViolation(format!(
                "node {id} still has {} relationship(s); use DETACH DELETE",
                incident.len()
            )));
        }
        tx.overlay.nodes.insert(id, None);
        Ok(())
    }

    async fn detach_delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<Vec<RelId>> {
        tx.require_write()?;
        let state = self.state.read();
        if self.effective_node(&state, tx, id).is_none() {
            return Err(Error::NotFound(format!("node {id}")));
        }
        let incident = self.incident_rels(&state, tx, id);
        drop(state);
        let ids: Vec<RelId> = incident.iter().map(|r| r.id).collect();
        for rid in &ids {
            tx.overlay.rels.insert(*rid, None);
        }
        tx.overlay.nodes.insert(id, None);
        Ok(ids)
    }

    async fn delete_rel(&self, tx: &mut MemoryTx, id: RelId) -> Result<()> {
        tx.require_write()?;
        if self.effective_rel(&self.state.read(), tx, id).is_none() {
            return Err(Error::NotFound(format!("relationship {id}")));
        }
        tx.overlay.rels.insert(id, None);
        Ok(())
    }

    // ========================================================================
    // Scans
    // ========================================================================

    async fn scan_all_nodes(&self, tx: &MemoryTx) -> Result<Vec<Node>> {
        Ok(self.effective_all_nodes(&self.state.read(), tx))
    }

    async fn scan_nodes_with_label(&self, tx: &MemoryTx, label: &str) -> Result<Vec<Node>> {
        let state = self.state.read();
        if !tx.has_pending() {
            let ids = state.label_index.get(label).cloned().unwrap_or_default();
            let mut out: Vec<Node> = ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect();
            out.sort_by_key(|n| n.id.0);
            return Ok(out);
        }
        Ok(self
            .effective_all_nodes(&state, tx)
            .into_iter()
            .filter(|n| n.has_label(label))
            .collect())
    }

    async fn scan_all_rels(&self, tx: &MemoryTx) -> Result<Vec<Relationship>> {
        Ok(self.effective_all_rels(&self.state.read(), tx))
    }

    async fn scan_rels_of_type(&self, tx: &MemoryTx, rel_type: &str) -> Result<Vec<Relationship>> {
        let state = self.state.read();
        if !tx.has_pending() {
            let ids = state.type_index.get(rel_type).cloned().unwrap_or_default();
            let mut out: Vec<Relationship> = ids.iter().filter_map(|id| state.rels.get(id).cloned()).collect();
            out.sort_by_key(|r| r.id.0);
            return Ok(out);
        }
        Ok(self
            .effective_all_rels(&state, tx)
            .into_iter()
            .filter(|r| r.rel_type == rel_type)
            .collect())
    }

    // ========================================================================
    // Adjacency
    // ========================================================================

    async fn out_edges(&self, tx: &MemoryTx, node: NodeId, types: &[String]) -> Result<Vec<(RelId, NodeId)>> {
        let state = self.state.read();
        if !tx.has_pending() {
            let ids = state.out_adj.get(&node).cloned().unwrap_or_default();
            return Ok(ids
                .into_iter()
                .filter_map(|id| state.rels.get(&id).cloned())
                .filter(|r| types.is_empty() || types.contains(&r.rel_type))
                .map(|r| (r.id, r.dst))
                .collect());
        }
        Ok(self
            .incident_rels(&state, tx, node)
            .into_iter()
            .filter(|r| r.src == node)
            .filter(|r| types.is_empty() || types.contains(&r.rel_type))
            .map(|r| (r.id, r.dst))
            .collect())
    }

    async fn in_edges(&self, tx: &MemoryTx, node: NodeId, types: &[String]) -> Result<Vec<(RelId, NodeId)>> {
        let state = self.state.read();
        if !tx.has_pending() {
            let ids = state.in_adj.get(&node).cloned().unwrap_or_default();
            return Ok(ids
                .into_iter()
                .filter_map(|id| state.rels.get(&id).cloned())
                .filter(|r| types.is_empty() || types.contains(&r.rel_type))
                .map(|r| (r.id, r.src))
                .collect());
        }
        Ok(self
            .incident_rels(&state, tx, node)
            .into_iter()
            .filter(|r| r.dst == node)
            .filter(|r| types.is_empty() || types.contains(&r.rel_type))
            .map(|r| (r.id, r.src))
            .collect())
    }

    async fn both_edges(
        &self,
        tx: &MemoryTx,
        node: NodeId,
        types: &[String],
    ) -> Result<Vec<(RelId, NodeId, Direction)>> {
        let state = self.state.read();
        let incident = self.incident_rels(&state, tx, node);
        let mut out = Vec::new();
        for r in incident {
            if !types.is_empty() && !types.contains(&r.rel_type) {
                continue;
            }
            if r.src == node {
                out.push((r.id, r.dst, Direction::Outgoing));
            }
            if r.dst == node {
                out.push((r.id, r.src, Direction::Incoming));
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    async fn node_count(&self, tx: &MemoryTx) -> Result<u64> {
        Ok(self.effective_all_nodes(&self.state.read(), tx).len() as u64)
    }

    async fn rel_count(&self, tx: &MemoryTx) -> Result<u64> {
        Ok(self.effective_all_rels(&self.state.read(), tx).len() as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> MemoryBackend {
        MemoryBackend::new()
    }

    #[tokio::test]
    async fn create_and_get_node() {
        let db = backend().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from("Ada"));
        let id = db.create_node(&mut tx, vec!["Person".into()], props).await.unwrap();
        // visible within the same (uncommitted) transaction
        let node = db.get_node(&tx, id).await.unwrap().unwrap();
        assert!(node.has_label("Person"));
        db.commit_tx(tx).await.unwrap();

        let tx2 = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert!(db.get_node(&tx2, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let db = backend().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let id = db.create_node(&mut tx, vec!["Person".into()], PropertyMap::new()).await.unwrap();
        db.rollback_tx(tx).await.unwrap();

        let tx2 = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert!(db.get_node(&tx2, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cannot_delete_connected_node() {
        let db = backend().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_node(&mut tx, vec!["Person".into()], PropertyMap::new()).await.unwrap();
        let b = db.create_node(&mut tx, vec!["Person".into()], PropertyMap::new()).await.unwrap();
        db.create_rel(&mut tx, "KNOWS", a, b, PropertyMap::new()).await.unwrap();
        assert!(db.delete_node(&mut tx, a).await.is_err());
        assert_eq!(db.detach_delete_node(&mut tx, a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn label_scan_matches_full_scan() {
        let db = backend().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.create_node(&mut tx, vec!["Person".into()], PropertyMap::new()).await.unwrap();
        db.create_node(&mut tx, vec!["Company".into()], PropertyMap::new()).await.unwrap();
        db.commit_tx(tx).await.unwrap();

        let tx2 = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.scan_nodes_with_label(&tx2, "Person").await.unwrap().len(), 1);
        assert_eq!(db.scan_all_nodes(&tx2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn adjacency_tracks_direction() {
        let db = backend().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_node(&mut tx, vec![], PropertyMap::new()).await.unwrap();
        let b = db.create_node(&mut tx, vec![], PropertyMap::new()).await.unwrap();
        db.create_rel(&mut tx, "KNOWS", a, b, PropertyMap::new()).await.unwrap();
        db.commit_tx(tx).await.unwrap();

        let tx2 = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.out_edges(&tx2, a, &[]).await.unwrap().len(), 1);
        assert_eq!(db.in_edges(&tx2, a, &[]).await.unwrap().len(), 0);
        assert_eq!(db.in_edges(&tx2, b, &[]).await.unwrap().len(), 1);
    }
}
