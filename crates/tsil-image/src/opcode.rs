//! The opcode stream — the target of the IL Emitter's lowering (§4.5).
//!
//! A stack-machine instruction set, analogous to a managed-bytecode
//! assembly's CIL stream but locally defined: no external bytecode
//! assembly library is available to this pack, so `tsil-image` both
//! defines and serializes its own minimal conforming image format
//! (see `DESIGN.md`).

use crate::token::{FieldToken, MethodToken, StringToken, TypeToken};

/// Tag for the box/unbox helper constructors (§9 design notes: "a small
/// struct of box constructors, one per primitive").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Number,
    Boolean,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exponent,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    UnsignedShiftRight,
    In,
    InstanceOf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    BitNot,
    LogicalNot,
    TypeOf,
    Void,
}

/// A single opcode-stream instruction. Branch targets are resolved
/// instruction indices within the same method body (produced by
/// `OpcodeBuilder::finish`, which backpatches label references the way
/// an `ILGenerator`-style label/mark-label API would).
#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    LoadConstNum(f64),
    LoadConstStr(StringToken),
    LoadNull,
    LoadUndefined,
    LoadBool(bool),
    LoadArg(u16),
    StoreArg(u16),
    /// Pushes a first-class reference to a method — the `ldftn`-style
    /// escape hatch a non-capturing arrow or a named function is loaded
    /// through whenever it is used as a value (assigned, passed as a
    /// callback, returned) rather than called directly by a statically
    /// known callee.
    LoadMethodPtr(MethodToken),
    LoadLocal(u16),
    StoreLocal(u16),
    LoadThis,
    LoadField(FieldToken),
    StoreField(FieldToken),
    LoadStaticField(FieldToken),
    StoreStaticField(FieldToken),
    /// Load the property bag entry for `name` (interned string token) on
    /// the object at the top of the stack — ad-hoc/dynamic property read.
    LoadBagProp(StringToken),
    StoreBagProp(StringToken),
    LoadIndex,
    StoreIndex,
    /// Pushes the number of positional arguments actually passed to the
    /// current call, as a `Number` — the primitive a rest parameter's
    /// gather loop needs since `param_count` is a signature arity, not a
    /// runtime-observed one (§4.5 "rest parameters").
    LoadArgCount,
    /// Pops an array reference, pushes its length as a `Number` — used
    /// by a for-of loop's index-bounds check against its iterated array.
    ArrayLen,
    /// Pops a `Number` index, pushes the argument at that runtime index
    /// (or `undefined` if out of range) — the dynamic counterpart to
    /// `LoadArg`'s static slot, needed by a rest parameter's gather loop
    /// since the tail of the argument list has no fixed slot numbers.
    LoadArgIndexed,
    /// Pops two arrays (`b` then `a`), pushes a fresh array holding `a`'s
    /// elements followed by `b`'s — the primitive a spread-argument call
    /// site folds its argument list through, since no opcode builds an
    /// array of runtime-only-known length directly.
    ArrayConcat,
    Box(Primitive),
    Unbox(Primitive),
    NewObj(TypeToken, u16),
    NewArray(u16),
    /// Direct, non-virtual dispatch — used for base-constructor calls and
    /// (per §4.5) calls inside an async `MoveNext` body where the target
    /// method stub is already defined but its body may not be yet.
    CallDirect(MethodToken, u16),
    CallVirtual(MethodToken, u16),
    CallStatic(MethodToken, u16),
    /// `obj.apply`/`.call`-style dispatch through the boxed `$TSFunction`
    /// wrapper, used for calling a value of unknown callable type.
    CallDynamic(u16),
    /// A call with one or more spread arguments (`f(a, ...xs, b)`):
    /// `fixed_argc` leading values are on the stack as usual, followed
    /// by a single array (built via `ArrayConcat`) covering every
    /// argument from the first spread onward. Covers the same three
    /// dispatch kinds `CallDirect`/`CallVirtual`/`CallStatic` do, which
    /// this reference interpreter already treats identically.
    CallSpread(MethodToken, u16),
    /// `CallDynamic`'s spread-argument counterpart: `fixed_argc` leading
    /// values, then the callee, then a trailing spread array.
    CallDynamicSpread(u16),
    Dup,
    Pop,
    BinOp(BinOp),
    UnOp(UnOp),
    /// Postfix/prefix increment/decrement is lowered to load+BinOp(Add/Sub,
    /// 1)+store by the IL Emitter rather than needing its own opcode.
    Br(usize),
    BrTrue(usize),
    BrFalse(usize),
    /// Switch on an `i32` dispatch value (the async state machine's
    /// `state` field); `default` is the fallthrough target when no case
    /// matches, `cases[k]` is the target for dispatch value `k`.
    Switch {
        cases: Vec<usize>,
        default: usize,
    },
    Ret,
    RetVoid,
    Throw,
    /// Marks entry/exit of a protected (try) region for the image
    /// writer's exception-handling table; `catch_target` is `None` for a
    /// bare `finally`-only region.
    BeginTry,
    EndTry,
    BeginCatch,
    EndCatch,
    BeginFinally,
    EndFinally,
    Leave(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelId(pub u32);

/// Backpatching builder for one method body: emit instructions and
/// label-relative branches without knowing final instruction indices
/// up front, then `finish()` resolves every label reference.
#[derive(Default)]
pub struct OpcodeBuilder {
    instrs: Vec<Instr>,
    pending: Vec<(usize, PendingKind, LabelId)>,
    pending_switch: Vec<(usize, Vec<LabelId>, LabelId)>,
    labels: Vec<Option<usize>>,
}

enum PendingKind {
    Br,
    BrTrue,
    BrFalse,
    Leave,
}

impl OpcodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        id
    }

    pub fn mark_label(&mut self, label: LabelId) {
        self.labels[label.0 as usize] = Some(self.instrs.len());
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    pub fn emit_br(&mut self, label: LabelId) {
        self.pending.push((self.instrs.len(), PendingKind::Br, label));
        self.instrs.push(Instr::Br(usize::MAX));
    }

    pub fn emit_br_true(&mut self, label: LabelId) {
        self.pending
            .push((self.instrs.len(), PendingKind::BrTrue, label));
        self.instrs.push(Instr::BrTrue(usize::MAX));
    }

    pub fn emit_br_false(&mut self, label: LabelId) {
        self.pending
            .push((self.instrs.len(), PendingKind::BrFalse, label));
        self.instrs.push(Instr::BrFalse(usize::MAX));
    }

    pub fn emit_leave(&mut self, label: LabelId) {
        self.pending
            .push((self.instrs.len(), PendingKind::Leave, label));
        self.instrs.push(Instr::Leave(usize::MAX));
    }

    /// Emits a `Switch` whose case/default targets are labels rather
    /// than resolved indices — the async MoveNext dispatcher's entry
    /// switch is built before the resume points it jumps to are marked
    /// (§4.6), so it needs the same label-then-backpatch treatment as
    /// `Br`/`BrTrue`/`BrFalse`/`Leave`.
    pub fn emit_switch(&mut self, cases: Vec<LabelId>, default: LabelId) {
        self.pending_switch.push((self.instrs.len(), cases, default));
        self.instrs.push(Instr::Switch { cases: Vec::new(), default: 0 });
    }

    /// Current position, usable as a jump target for a `Switch` built by
    /// the caller once all case labels are known.
    pub fn position(&self) -> usize {
        self.instrs.len()
    }

    pub fn resolve_label(&self, label: LabelId) -> usize {
        self.labels[label.0 as usize].expect("label referenced before it was marked")
    }

    pub fn finish(mut self) -> Vec<Instr> {
        for (idx, kind, label) in &self.pending {
            let target = self.labels[label.0 as usize]
                .expect("label referenced by emit_br* but never marked");
            self.instrs[*idx] = match kind {
                PendingKind::Br => Instr::Br(target),
                PendingKind::BrTrue => Instr::BrTrue(target),
                PendingKind::BrFalse => Instr::BrFalse(target),
                PendingKind::Leave => Instr::Leave(target),
            };
        }
        for (idx, cases, default) in &self.pending_switch {
            let cases = cases
                .iter()
                .map(|l| self.labels[l.0 as usize].expect("switch case label never marked"))
                .collect();
            let default = self.labels[default.0 as usize].expect("switch default label never marked");
            self.instrs[*idx] = Instr::Switch { cases, default };
        }
        self.instrs
    }
}

#[cfg(test)]
#[path = "tests/opcode.rs"]
mod tests;
