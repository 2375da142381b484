//! The optional "dead-code info" collaborator input: declarations known
//! to be unreachable, which the driver skips outright.
//!
//! Classes with static initializers whose side effects are observable
//! are *still emitted* even when flagged dead, pending confirmation from
//! the upstream type-checker owner — see `DESIGN.md`.

use crate::arena::NodeIndex;
use rustc_hash::FxHashSet;

#[derive(Default)]
pub struct DeadCodeInfo {
    unreachable: FxHashSet<NodeIndex>,
}

impl DeadCodeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unreachable(&mut self, node: NodeIndex) {
        self.unreachable.insert(node);
    }

    pub fn is_unreachable(&self, node: NodeIndex) -> bool {
        self.unreachable.contains(&node)
    }
}
