//! `NodeArena` - dense, identity-addressable storage for AST nodes.
//!
//! Registries keyed by AST node identity use an arena that assigns each
//! node a small dense integer id at parse time, so every per-node
//! registry can be a `NodeIndex`-keyed `FxHashMap` instead of a
//! pointer-identity map. Arrow-function identity (the emitter keys
//! several registries by the specific AST node) falls out of this for
//! free — two syntactically identical arrows still get distinct indices.

use crate::node::Node;
use tsil_common::Span;

/// A dense index into a `NodeArena`. Two `NodeIndex` values are equal
/// iff they name the same arena slot, which is exactly node identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const DUMMY: NodeIndex = NodeIndex(u32::MAX);

    #[inline]
    pub const fn is_dummy(self) -> bool {
        self.0 == u32::MAX
    }
}

/// Owns every node for one compilation unit (a single module, or the
/// merged statement list for single-module `compile`). Nodes are never
/// removed; the arena only grows during construction by the collaborator
/// front end, then is treated as immutable by every phase of the driver.
#[derive(Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning its identity-stable index.
    pub fn push(&mut self, node: Node) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len() as u32);
        self.nodes.push(node);
        idx
    }

    #[inline]
    pub fn get(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.0 as usize]
    }

    #[inline]
    pub fn span(&self, idx: NodeIndex) -> Span {
        self.get(idx).span
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIndex(i as u32), n))
    }
}

#[cfg(test)]
#[path = "tests/arena.rs"]
mod tests;
