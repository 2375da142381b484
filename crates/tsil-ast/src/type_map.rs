//! The "type map" collaborator input: expression node → inferred type.

use crate::arena::NodeIndex;
use crate::types::InferredType;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct TypeMap {
    types: FxHashMap<NodeIndex, InferredType>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, node: NodeIndex, ty: InferredType) {
        self.types.insert(node, ty);
    }

    pub fn get(&self, node: NodeIndex) -> Option<&InferredType> {
        self.types.get(&node)
    }
}
