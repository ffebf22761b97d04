//! Path — a sequence of alternating nodes and relationships.

use serde::{Deserialize, Serialize};

use super::relationship::Direction;
use super::{Node, Relationship};

/// One hop of a path: the relationship traversed and the direction it was
/// walked in (a relationship may be traversed against its stored
/// src->dst direction, so the path must record both).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub rel: Relationship,
    pub direction: Direction,
}

/// A path in the graph: node -[rel]-> node -[rel]-> node ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Nodes along the path. Always has one more element than `segments`.
    pub nodes: Vec<Node>,
    /// Relationships (with traversal direction) connecting consecutive nodes.
    pub segments: Vec<PathSegment>,
}

impl Path {
    pub fn single(node: Node) -> Self {
        Self { nodes: vec![node], segments: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn start(&self) -> &Node {
        self.nodes.first().expect("Path always has at least one node")
    }

    pub fn end(&self) -> &Node {
        self.nodes.last().expect("Path always has at least one node")
    }

    /// Extend path with a relationship, the direction it was traversed in,
    /// and the node reached.
    pub fn append(&mut self, rel: Relationship, direction: Direction, node: Node) {
        self.segments.push(PathSegment { rel, direction });
        self.nodes.push(node);
    }

    /// Returns an iterator over (node, relationship, node) triples along the path.
    pub fn triples(&self) -> impl Iterator<Item = (&Node, &Relationship, &Node)> {
        self.segments.iter().enumerate().map(move |(i, seg)| (&self.nodes[i], &seg.rel, &self.nodes[i + 1]))
    }

    /// Reverse the path, flipping each segment's recorded traversal direction.
    pub fn reverse(&mut self) {
        self.nodes.reverse();
        self.segments.reverse();
        for seg in &mut self.segments {
            seg.direction = match seg.direction {
                Direction::Outgoing => Direction::Incoming,
                Direction::Incoming => Direction::Outgoing,
                Direction::Both => Direction::Both,
            };
        }
    }

    pub fn contains_node(&self, id: crate::model::NodeId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn contains_relationship(&self, id: crate::model::RelId) -> bool {
        self.segments.iter().any(|seg| seg.rel.id == id)
    }

    pub fn node_at(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn relationship_at(&self, index: usize) -> Option<&Relationship> {
        self.segments.get(index).map(|seg| &seg.rel)
    }

    pub fn node_ids(&self) -> Vec<crate::model::NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    pub fn relationship_ids(&self) -> Vec<crate::model::RelId> {
        self.segments.iter().map(|seg| seg.rel.id).collect()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.segments.iter().map(|seg| &seg.rel)
    }
}
