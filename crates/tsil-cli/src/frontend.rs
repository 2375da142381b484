//! The seam between a source path on disk and the typed AST this
//! backend actually compiles.
//!
//! `spec.md` §1 scopes lexing, parsing, and the type checker that
//! produces the typed AST out of this system entirely — they are named
//! only as collaborator interfaces in §6. `tsil-ast` accordingly ships
//! no parser (`AstBuilder` is an ergonomic *construction* API for tests,
//! not a source-text reader). `tsil-cli` therefore cannot turn arbitrary
//! `.ts` source into a `NodeArena` on its own; this module is the
//! documented integration point where a production front end would
//! plug in.
//!
//! `CompilationUnit` is what the rest of the CLI needs regardless of
//! where it came from.

use std::path::Path;

use tsil_ast::{DeadCodeInfo, NodeArena, NodeIndex, TypeMap};
use tsil_common::Interner;

pub struct CompilationUnit {
    pub arena: NodeArena,
    pub statements: Vec<NodeIndex>,
    pub interner: Interner,
    pub type_map: TypeMap,
    pub dead_code_info: Option<DeadCodeInfo>,
}

/// Reads `path` and produces a `CompilationUnit`.
///
/// No parser is wired into this backend (see module docs), so this
/// always fails with a diagnostic naming the missing front end rather
/// than guessing at a source format. A real deployment replaces this
/// function's body with a call into a parser/checker crate that
/// produces the same `NodeArena`/`TypeMap` shape `tsil-driver::compile`
/// already accepts — nothing else in this crate needs to change.
pub fn load(path: &Path) -> anyhow::Result<CompilationUnit> {
    // Confirm the path is at least readable before reporting the real
    // gap, so a typo'd path reports "no such file" rather than "no
    // front end".
    std::fs::metadata(path).map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;

    anyhow::bail!(
        "no front end is wired into this backend (lexing/parsing/type-checking are collaborator \
         interfaces per spec.md §1/§6, not implemented here); construct a CompilationUnit via a \
         parser crate and call tsil_driver::compile directly, or use AstBuilder-built fixtures"
    )
}
