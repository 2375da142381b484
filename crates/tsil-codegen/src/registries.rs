//! The driver's registries (§3's registry table): maps from source-level
//! names or AST-node identity to the handles the Image Writer's
//! `MetadataBuilder` returned when each type/method/field stub was
//! defined. Defined here (alongside the components that populate and
//! read them) but *owned* by a single `tsil-driver::CompilerDriver`
//! instance for the lifetime of one `compile`/`compile_modules` run —
//! no process-wide or thread-local state, per §5.
//!
//! AST-node-identity keyed maps (`arrow_method`, `display_class`, ...)
//! use `FxHashMap<NodeIndex, T>` rather than a pointer-identity map,
//! since `NodeIndex` already *is* a dense per-node integer id assigned
//! by the arena at construction time.

use rustc_hash::{FxHashMap, FxHashSet};
use tsil_ast::NodeIndex;
use tsil_common::Atom;
use tsil_image::{FieldToken, MethodToken, TypeToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnumKind {
    Numeric,
    String,
    Heterogeneous,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EnumValue {
    Number(f64),
    String(Atom),
}

#[derive(Clone, Debug, Default)]
pub struct EnumInfo {
    pub kind: Option<EnumKind>,
    pub members: FxHashMap<Atom, EnumValue>,
    /// Numeric-valued members only; string-valued enums have no
    /// meaningful reverse mapping and are never entered here.
    pub reverse: FxHashMap<i64, Atom>,
    /// `true` for a `const enum`: usages fold to literals and no enum
    /// type is emitted at runtime at all (§8 property 8).
    pub is_const: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ClassInfo {
    pub type_token: Option<TypeToken>,
    pub super_class: Option<Atom>,
    pub instance_fields: FxHashMap<Atom, FieldToken>,
    pub static_fields: FxHashMap<Atom, FieldToken>,
    pub static_methods: FxHashMap<Atom, MethodToken>,
    pub instance_methods: FxHashMap<Atom, MethodToken>,
    pub instance_getters: FxHashMap<Atom, MethodToken>,
    pub instance_setters: FxHashMap<Atom, MethodToken>,
    pub ctor: Option<MethodToken>,
    /// Instance method names declared `async` — `movenext`'s static
    /// "is this call already awaiter-shaped" check consults this before
    /// falling back to wrapping a plain value via `$Awaiter.Resolved`
    /// (`DESIGN.md`'s note on `GetAwaiter`).
    pub async_methods: FxHashSet<Atom>,
    /// `true` when `ctor` names a constructor synthesized by the driver
    /// (a subclass with no user-written constructor still needs one to
    /// forward into the base chain) rather than one lowered from a
    /// source `ClassMemberKind::Constructor` member.
    pub synthesized_default_ctor: bool,
    /// Static fields with an initializer expression, in declaration
    /// order, lowered into `cctor`'s body.
    pub static_field_inits: Vec<(FieldToken, NodeIndex)>,
    /// The class's static constructor, present only when at least one
    /// static field has an initializer (§4 "constructors... static
    /// initializers").
    pub cctor: Option<MethodToken>,
}

#[derive(Clone, Copy, Debug)]
pub struct FunctionRest {
    pub rest_param_index: usize,
    pub regular_param_count: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FunctionInfo {
    pub method: Option<MethodToken>,
    pub rest: Option<FunctionRest>,
    /// `true` for a top-level `async function`: `method` names its entry
    /// stub rather than a plain function body, so a call site already
    /// produces an `$Awaiter` result with no extra wrapping needed.
    pub is_async: bool,
    /// `true` for a top-level bare `function*`: lowered by the same
    /// state-machine builder as an async function (see `SPEC_FULL.md`'s
    /// generator supplement), with an iterator builder in place of a
    /// task builder.
    pub is_generator: bool,
}

/// Populated at phase 5 for every arrow, whether or not it captures
/// anything: a non-capturing arrow gets `method` (a private static on
/// `$Program`); a capturing one gets a display class instead.
#[derive(Clone, Debug, Default)]
pub struct ArrowInfo {
    pub method: Option<MethodToken>,
    pub display_class: Option<TypeToken>,
    pub display_fields: FxHashMap<Atom, FieldToken>,
    /// Set only when the arrow's `CaptureSet::captures_this` is true: a
    /// field holding the lexically enclosing `this`, forwarded to the
    /// same way any other captured name is (`DESIGN.md`'s closure note).
    pub this_field: Option<FieldToken>,
    pub display_ctor: Option<MethodToken>,
    /// The `Invoke` method on the display class, for a capturing arrow.
    pub invoke: Option<MethodToken>,
}

/// The state-machine descriptor (§3 "State-machine descriptor").
#[derive(Clone, Debug, Default)]
pub struct AsyncMachine {
    pub type_token: Option<TypeToken>,
    pub state_field: Option<FieldToken>,
    pub builder_field: Option<FieldToken>,
    pub hoisted_params: FxHashMap<Atom, FieldToken>,
    pub hoisted_locals: FxHashMap<Atom, FieldToken>,
    /// Indexed by await point number.
    pub awaiter_fields: Vec<FieldToken>,
    pub this_field: Option<FieldToken>,
    /// Present only for an async arrow's machine: points at the
    /// enclosing function's (or parent arrow's) machine type.
    pub outer_field: Option<FieldToken>,
    /// Present only for an outer function machine that has nested
    /// async arrow children (§4.6 self-boxed trick).
    pub self_boxed_field: Option<FieldToken>,
    pub captured_fields: FxHashMap<Atom, FieldToken>,
    pub move_next: Option<MethodToken>,
    pub set_state_machine: Option<MethodToken>,
    /// The small stub method (on `$Program` or the declaring class) that
    /// allocates, initializes, and starts the machine.
    pub entry_stub: Option<MethodToken>,
    /// `true` for a bare (non-async) generator lowered by this same
    /// builder with an `$IteratorBuilder` in place of `$TaskBuilder`
    /// (see `SPEC_FULL.md`'s generator supplement).
    pub is_generator: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ModuleInfo {
    pub module_type: Option<TypeToken>,
    pub exports: FxHashMap<Atom, FieldToken>,
    pub init: Option<MethodToken>,
}

/// All registries from §3, grouped by owner. `tsil-driver` holds a
/// single instance for the run's duration and hands out `&`/`&mut`
/// borrows to each phase subroutine as it runs.
#[derive(Default)]
pub struct Registries {
    pub classes: FxHashMap<Atom, ClassInfo>,
    pub functions: FxHashMap<Atom, FunctionInfo>,
    pub enums: FxHashMap<Atom, EnumInfo>,
    pub arrows: FxHashMap<NodeIndex, ArrowInfo>,
    pub async_functions: FxHashMap<Atom, AsyncMachine>,
    pub async_arrows: FxHashMap<NodeIndex, AsyncMachine>,
    /// Nested async arrow -> the NodeIndex of its immediate parent
    /// async arrow, if any (distinct from `async_arrow_outer`, which
    /// always names the *outermost* function).
    pub async_arrow_parent: FxHashMap<NodeIndex, NodeIndex>,
    /// Nested async arrow -> the name of the outermost async function
    /// that contains it.
    pub async_arrow_outer: FxHashMap<NodeIndex, Atom>,
    pub modules: FxHashMap<String, ModuleInfo>,
    /// Deterministic publish order, since `FxHashMap` iteration order
    /// is not: phase-4 module processing order, preserved for the
    /// multi-module `Main`'s `$Initialize` call sequence.
    pub module_order: Vec<String>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_mut(&mut self, name: Atom) -> &mut ClassInfo {
        self.classes.entry(name).or_default()
    }

    pub fn function_mut(&mut self, name: Atom) -> &mut FunctionInfo {
        self.functions.entry(name).or_default()
    }

    pub fn enum_mut(&mut self, name: Atom) -> &mut EnumInfo {
        self.enums.entry(name).or_default()
    }

    pub fn arrow_mut(&mut self, node: NodeIndex) -> &mut ArrowInfo {
        self.arrows.entry(node).or_default()
    }

    /// Walks the superclass chain (`classes[c].super_class`) looking for
    /// `method` on an ancestor, for a `super.foo()` call or an
    /// unresolved override lookup. Returns `None` on a missing/cyclic
    /// chain rather than looping forever.
    pub fn resolve_inherited_method(
        &self,
        mut class: Atom,
        lookup: impl Fn(&ClassInfo) -> Option<MethodToken>,
        max_depth: usize,
    ) -> Option<MethodToken> {
        let mut depth = 0;
        loop {
            let info = self.classes.get(&class)?;
            if let Some(m) = lookup(info) {
                return Some(m);
            }
            class = info.super_class?;
            depth += 1;
            if depth > max_depth {
                return None;
            }
        }
    }
}
