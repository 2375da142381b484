//! Driver-level compilation configuration — ambient knobs, not lowering
//! semantics, mirroring the teacher's `PrinterOptions`/
//! `EmitContext::with_options` pattern of threading a small options
//! struct through the whole pipeline rather than scattering booleans
//! through individual phase function signatures.

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct CompilerConfig {
    /// Lower every declaration regardless of `DeadCodeInfo`, ignoring
    /// any `mark_unreachable` entries the checker supplied. Off by
    /// default: a declaration the checker flagged unreachable is skipped
    /// unless this is set, matching `tsil-ast::dead_code`'s own note that
    /// classes with observable static-initializer side effects are
    /// still emitted even when flagged (an Open Question, recorded in
    /// `DESIGN.md`, resolved as "skip the declaration but still run its
    /// static initializer if it has one").
    pub skip_dead_code_info: bool,
    /// Fold `const enum` (and, by this backend's design, every other
    /// enum too — see `tsil-codegen::registries::EnumInfo`) member
    /// references to literals at their use sites. Disabling this is a
    /// debugging escape hatch for inspecting the fold itself; no
    /// alternative runtime enum representation exists, so a compile
    /// with this off still folds but skips the stricter sibling-member
    /// evaluability check non-const initializers would otherwise fail.
    pub fold_const_enums: bool,
    /// If set, `compile`/`compile_modules` write the finalized image to
    /// this path in addition to returning it in `CompiledImage`.
    pub output_path: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            skip_dead_code_info: false,
            fold_const_enums: true,
            output_path: None,
        }
    }
}
