//! Multi-module compilation inputs: one `Module` per source file, plus
//! the `ModuleResolver` collaborator trait (§6).

use crate::arena::{NodeArena, NodeIndex};

/// One type-checked source module: its own arena and the list of
/// top-level statement indices into that arena (import/export
/// declarations included).
pub struct Module {
    /// Absolute path, used as the registry key in `tsil-driver`'s
    /// `module_type`/`module_exports`/`module_init` registries.
    pub path: String,
    pub arena: NodeArena,
    pub statements: Vec<NodeIndex>,
}

impl Module {
    pub fn new(path: impl Into<String>, arena: NodeArena, statements: Vec<NodeIndex>) -> Self {
        Module {
            path: path.into(),
            arena,
            statements,
        }
    }
}

/// Resolves an import specifier to an absolute module path, given the
/// importing module's own absolute path. A cycle among module imports
/// is a compile error signalled by this collaborator, not the driver
/// (§3, invariant 5): the driver trusts that `modules_in_dep_order` is
/// already free of cycles by the time `compile_modules` is called.
pub trait ModuleResolver {
    fn resolve(&self, specifier: &str, importing_module: &str) -> Option<String>;
}
