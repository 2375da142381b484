//! Per-emission symbol resolution: where does loading/storing a given
//! name go right now? A plain function body resolves names to arg/local
//! slots; a capturing arrow's `Invoke` resolves captured names to fields
//! on `this` (the display class instance); an async `MoveNext` resolves
//! hoisted names to fields on `this` (the state machine) and reaches
//! through an `outer` chain for names hoisted by an enclosing machine
//! (§4.4, §4.6).
//!
//! A small stack of scopes pushed on block entry and popped on exit, kept
//! separate from the `Registries` (which are cross-cutting and phase-
//! scoped, not per-method).

use rustc_hash::FxHashMap;
use tsil_common::Atom;
use tsil_image::FieldToken;

#[derive(Clone, Copy, Debug)]
pub enum Binding {
    Local(u16),
    Arg(u16),
    /// A name hoisted onto the machine at `this`, reached after
    /// `hops` traversals of the `outer` field (0 = the current
    /// machine's own field).
    HoistedField { field: FieldToken, hops: u32 },
    /// A name captured onto a display class, reached after `hops`
    /// traversals of the display class's own capture-forwarding chain
    /// (always 0 for a directly-capturing arrow; >0 only if a future
    /// extension nests display classes, which this backend does not
    /// currently synthesize — arrows forward through state-machine
    /// `outer` fields instead, see `DESIGN.md`).
    CapturedField { field: FieldToken, hops: u32 },
    /// A local slot holding a reference to a shared `$Cell` rather than
    /// the value itself — used for any name captured by some arrow
    /// *anywhere* in the compilation unit, so every declaration of that
    /// name (not just the capturing arrow's own copy) reads and writes
    /// through the one cell, and a mutation made through the closure is
    /// observed by the enclosing scope and vice versa (`DESIGN.md`'s
    /// note on cell promotion).
    CellLocal(u16),
    /// Same idea as `CellField`, but the field itself holds the cell
    /// reference rather than the raw value; `hops` works exactly like
    /// `HoistedField`/`CapturedField`.
    CellField { field: FieldToken, hops: u32 },
}

#[derive(Default)]
pub struct Scope {
    names: FxHashMap<Atom, Binding>,
}

/// A stack of nested block scopes for one method body being lowered.
/// Unlike `ClosureAnalyzer`'s scope stack, this one is mutated live
/// during emission (locals are allocated as their declarations are
/// lowered), and names always resolve to exactly one `Binding` — there
/// is no "unresolved, propagate up" step; an unresolved name here is
/// the backend's §7 "Unresolved name" case (compiles to `LoadNull`).
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable { scopes: vec![Scope::default()] }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn bind(&mut self, name: Atom, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("SymbolTable always has at least one scope")
            .names
            .insert(name, binding);
    }

    pub fn resolve(&self, name: Atom) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|s| s.names.get(&name).copied())
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
