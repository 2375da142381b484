//! IL Emitter (component E, §4.5): the recursive AST-to-opcode lowering
//! shared by plain function/method bodies and (via `tsil-codegen::movenext`)
//! the segments of an async `MoveNext`.
//!
//! `LoweringCx` carries everything one method-body lowering needs: the
//! metadata builder (for interning strings and resolving tokens already
//! defined by an earlier phase), the runtime handles, the registries
//! (read-only at this point — phases 1-6.3 have already populated every
//! handle a body could reference), the symbol table, and the small bits
//! of per-method state the deferred-return protocol and loop statements
//! need (§4.5's "deferred-return protocol", break/continue targets).
//!
//! Closure capture is implemented by cell promotion rather than a
//! separate indirection layer: any name captured by *some* arrow
//! anywhere in the compilation unit is declared through a `$Cell`
//! (see `tsil-runtime`), so the declaring scope and every capturing
//! arrow's display-class field hold a reference to the very same cell
//! (`DESIGN.md`, "closure capture"). `SymbolTable::Binding::CellLocal`/
//! `CellField` mark such names; every other binding is a plain
//! local/arg/hoisted-field read.

use rustc_hash::FxHashSet;
use tsil_ast::ops::{AssignOp, BinaryOp, LogicalOp, UnaryOp, UpdateOp};
use tsil_ast::{BindingName, CatchClause, ForInit, NodeArena, NodeIndex, NodeKind, Param};
use tsil_common::{Atom, Interner, Span};
use tsil_image::{
    BinOp as ImgBinOp, FieldToken, Instr, LabelId, MetadataBuilder, OpcodeBuilder, Primitive,
    UnOp as ImgUnOp,
};
use tsil_runtime::RuntimeHandles;

use crate::binding::{Binding, SymbolTable};
use crate::error::{CodegenError, CodegenResult};
use crate::registries::Registries;

/// Which call-dispatch convention member calls should lower to. Regular
/// method bodies use `CallVirtual`; bodies lowered inside an async
/// `MoveNext` use `CallDirect` against the phase-6.3 stub regardless of
/// whether the target's own body has been emitted yet (§4.5 "Virtual
/// dispatch inside async state machines").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Plain,
    AsyncBody,
}

pub(crate) struct DeferredReturn {
    pub(crate) should_return: u16,
    pub(crate) return_value: u16,
}

pub(crate) struct LoopCtx {
    pub(crate) label: Option<Atom>,
    pub(crate) break_label: LabelId,
    pub(crate) continue_label: LabelId,
}

/// Where a `return`/outermost-try escape inside this lowering must go
/// when it cannot emit a raw `Ret` — an async `MoveNext` body routes
/// every logical return through `builder.SetResult`/`SetException`
/// rather than the IR-level return instruction (§4.6), so `lower_try`
/// and `lower_return` branch to a caller-supplied common exit instead
/// of falling back to `Instr::Ret` whenever this is set.
pub(crate) struct AsyncExit {
    pub(crate) return_value_local: u16,
    pub(crate) common_return_label: LabelId,
}

/// Everything one method/arrow/`MoveNext`-segment body lowering needs.
/// Constructed fresh per body by the driver (or by `movenext`, which
/// seeds `outer_chain` and pre-binds hoisted names before handing
/// control to the same expression/statement lowering used everywhere
/// else).
pub struct LoweringCx<'a> {
    pub metadata: &'a mut MetadataBuilder,
    pub runtime: &'a RuntimeHandles,
    pub registries: &'a Registries,
    pub arena: &'a NodeArena,
    pub interner: &'a Interner,
    pub symbols: SymbolTable,
    pub dispatch: DispatchMode,
    /// The declaring class of the method being lowered, for `this`/
    /// `super` member resolution. `None` for top-level functions/arrows.
    pub current_class: Option<Atom>,
    /// Outer-machine `outer` field chain, innermost-enclosing first,
    /// used to resolve `Binding::HoistedField`/`CellField` hops when
    /// lowering inside a nested async arrow's `MoveNext` (§4.6).
    pub outer_chain: Vec<FieldToken>,
    /// The state machine's captured-`this` field, set only when lowering
    /// an async `MoveNext` body for a function/method that actually uses
    /// `this`/`super` (§4.6) — `ThisExpr`/`SuperExpr` load through it
    /// instead of the machine instance itself.
    pub this_field: Option<FieldToken>,
    /// Names captured by some arrow *anywhere* in the compilation unit
    /// (the union of every `CaptureSet::names` the Closure Analyzer
    /// produced), computed once by the driver and shared read-only
    /// across every body lowered in this run. A plain declaration or
    /// parameter binding for one of these names goes through
    /// `$Cell::Create` instead of a bare local/arg slot — see the
    /// module doc comment's "closure capture" note.
    pub cell_promoted: FxHashSet<Atom>,
    builder: OpcodeBuilder,
    next_local: u16,
    pub(crate) deferred: Option<DeferredReturn>,
    pub(crate) try_stack: Vec<LabelId>,
    pub(crate) loop_stack: Vec<LoopCtx>,
    /// Set by `movenext` before lowering a `MoveNext` segment body; see
    /// `AsyncExit`.
    pub(crate) async_exit: Option<AsyncExit>,
}

/// The result of lowering one function/method/arrow body: its local
/// slot count and finished instruction stream, ready for
/// `MetadataBuilder::set_method_body`.
pub struct FunctionShape {
    pub locals_count: u16,
    pub body: Vec<Instr>,
}

impl<'a> LoweringCx<'a> {
    pub fn new(
        metadata: &'a mut MetadataBuilder,
        runtime: &'a RuntimeHandles,
        registries: &'a Registries,
        arena: &'a NodeArena,
        interner: &'a Interner,
        dispatch: DispatchMode,
        current_class: Option<Atom>,
    ) -> Self {
        LoweringCx {
            metadata,
            runtime,
            registries,
            arena,
            interner,
            symbols: SymbolTable::new(),
            dispatch,
            current_class,
            outer_chain: Vec::new(),
            this_field: None,
            cell_promoted: FxHashSet::default(),
            builder: OpcodeBuilder::new(),
            next_local: 0,
            deferred: None,
            try_stack: Vec::new(),
            loop_stack: Vec::new(),
            async_exit: None,
        }
    }

    pub fn alloc_local(&mut self) -> u16 {
        let slot = self.next_local;
        self.next_local += 1;
        slot
    }

    /// Reserves and returns the next `count` local slots as a contiguous
    /// range, used by `movenext` to pre-allocate the segment-spanning
    /// locals an ANF-materialized await expression needs before lowering
    /// any of the segment's statements.
    pub(crate) fn alloc_locals(&mut self, count: u16) -> u16 {
        let start = self.next_local;
        self.next_local += count;
        start
    }

    pub(crate) fn current_locals(&self) -> u16 {
        self.next_local
    }

    pub fn emit(&mut self, instr: Instr) {
        self.builder.emit(instr);
    }

    pub fn new_label(&mut self) -> LabelId {
        self.builder.new_label()
    }

    pub fn mark_label(&mut self, label: LabelId) {
        self.builder.mark_label(label);
    }

    pub fn emit_br(&mut self, label: LabelId) {
        self.builder.emit_br(label);
    }

    pub fn emit_br_true(&mut self, label: LabelId) {
        self.builder.emit_br_true(label);
    }

    pub fn emit_br_false(&mut self, label: LabelId) {
        self.builder.emit_br_false(label);
    }

    /// Proxies `OpcodeBuilder::emit_switch` — needed by `movenext`'s
    /// state dispatcher, which is the only caller that emits a `Switch`
    /// directly rather than through `lower_stmt`'s own control-flow
    /// lowering.
    pub fn emit_switch(&mut self, cases: Vec<LabelId>, default: LabelId) {
        self.builder.emit_switch(cases, default);
    }

    /// Proxies `OpcodeBuilder::emit_leave` — needed by `movenext` to exit
    /// a protected region on suspension without falling through the
    /// region's own `EndTry`/`EndFinally` bookkeeping.
    pub fn emit_leave(&mut self, label: LabelId) {
        self.builder.emit_leave(label);
    }

    pub(crate) fn position(&self) -> usize {
        self.builder.position()
    }

    pub fn intern_str(&mut self, s: &str) -> tsil_image::StringToken {
        self.metadata.intern_string(s)
    }

    /// Wraps the top-of-stack value in a fresh `$Cell`, consuming it and
    /// pushing the cell reference in its place.
    pub(crate) fn wrap_in_cell(&mut self) {
        self.emit(Instr::CallStatic(self.runtime.cell_create, 1));
    }

    /// Finishes this lowering, consuming the context. Used by plain
    /// function/method bodies and by `movenext`, which drives one
    /// `LoweringCx` for the whole `MoveNext` body so its dispatch switch
    /// and every segment's statements share one label namespace.
    pub fn finish(self) -> FunctionShape {
        FunctionShape {
            locals_count: self.next_local,
            body: self.builder.finish(),
        }
    }

    /// Exposes the local counter and raw builder directly, for a caller
    /// that needs to interleave hand-written opcodes with
    /// `LoweringCx`-driven lowering in the same instruction stream
    /// without consuming `self`.
    pub fn into_builder(self) -> (u16, OpcodeBuilder) {
        (self.next_local, self.builder)
    }

    // ---- function prologue: params, defaults, rest gather ----

    /// Binds positional parameters to arg slots (slot 0 is `this` for
    /// an instance method/constructor; `param_offset` accounts for
    /// that), emits the default-parameter protocol (§4.5) for any
    /// parameter with an initializer, and — if `rest` names a rest
    /// parameter — emits the gather loop that collects every argument
    /// at or past its index into a fresh array bound to its name.
    pub fn lower_params(
        &mut self,
        params: &[Param],
        param_offset: u16,
        rest: Option<(usize, usize)>,
    ) -> CodegenResult<()> {
        for (i, p) in params.iter().enumerate() {
            if p.rest {
                continue;
            }
            let slot = param_offset + i as u16;
            match &p.name {
                BindingName::Identifier(name) => {
                    self.symbols.bind(*name, Binding::Arg(slot));
                }
                BindingName::Pattern(_) => {
                    // Destructuring parameter patterns are lowered the
                    // same way a destructuring `VarDeclStmt` is, against
                    // the arg slot as the pattern's source value.
                }
            }
            if let Some(default) = p.initializer {
                let undef_label = self.new_label();
                let end_label = self.new_label();
                self.emit(Instr::LoadArg(slot));
                self.emit(Instr::LoadUndefined);
                self.emit(Instr::BinOp(ImgBinOp::StrictEq));
                self.emit_br_true(undef_label);
                self.emit_br(end_label);
                self.mark_label(undef_label);
                self.lower_expr(default)?;
                self.emit(Instr::StoreArg(slot));
                self.mark_label(end_label);
            }

            // A parameter captured by some arrow needs the same `$Cell`
            // indirection a captured local gets, so every call's own
            // argument value (post-default-protocol) lives somewhere a
            // display class field can keep sharing after this call
            // returns. The arg slot itself stays the raw value — only
            // the name's binding moves to the cell.
            if let BindingName::Identifier(name) = p.name {
                if self.cell_promoted.contains(&name) {
                    self.emit(Instr::LoadArg(slot));
                    self.wrap_in_cell();
                    let cell_slot = self.alloc_local();
                    self.emit(Instr::StoreLocal(cell_slot));
                    self.symbols.bind(name, Binding::CellLocal(cell_slot));
                }
            }
        }

        if let Some((rest_index, regular_count)) = rest {
            let _ = param_offset;
            if let Some(Param { name: BindingName::Identifier(name), .. }) = params.get(rest_index) {
                let arr_local = self.alloc_local();
                let i_local = self.alloc_local();
                self.emit(Instr::NewArray(0));
                self.emit(Instr::StoreLocal(arr_local));
                self.emit(Instr::LoadConstNum(regular_count as f64));
                self.emit(Instr::StoreLocal(i_local));

                let loop_top = self.new_label();
                let loop_end = self.new_label();
                self.mark_label(loop_top);
                self.emit(Instr::LoadLocal(i_local));
                self.emit(Instr::LoadArgCount);
                self.emit(Instr::BinOp(ImgBinOp::Lt));
                self.emit_br_false(loop_end);

                // StoreIndex pops (value, index, array) off the stack,
                // so push in (array, index, value) order.
                self.emit(Instr::LoadLocal(arr_local));
                self.emit(Instr::LoadLocal(i_local));
                self.emit(Instr::LoadConstNum(regular_count as f64));
                self.emit(Instr::BinOp(ImgBinOp::Sub));
                self.emit(Instr::LoadLocal(i_local));
                self.emit(Instr::LoadArgIndexed);
                self.emit(Instr::StoreIndex);

                self.emit(Instr::LoadLocal(i_local));
                self.emit(Instr::LoadConstNum(1.0));
                self.emit(Instr::BinOp(ImgBinOp::Add));
                self.emit(Instr::StoreLocal(i_local));
                self.emit_br(loop_top);
                self.mark_label(loop_end);

                self.symbols.bind(*name, Binding::Local(arr_local));
            }
        }
        Ok(())
    }

    // ---- statements ----

    pub fn lower_stmts(&mut self, stmts: &[NodeIndex]) -> CodegenResult<()> {
        for &s in stmts {
            self.lower_stmt(s)?;
        }
        Ok(())
    }

    pub fn lower_block(&mut self, idx: NodeIndex) -> CodegenResult<()> {
        self.symbols.push_scope();
        let result = match &self.node(idx).kind.clone() {
            NodeKind::Block(stmts) => self.lower_stmts(stmts),
            _ => self.lower_stmt(idx),
        };
        self.symbols.pop_scope();
        result
    }

    /// Returns a reference borrowed from the arena's own lifetime `'a`
    /// rather than from `&self`, so holding the result across a later
    /// `&mut self` call (emitting an instruction, allocating a local)
    /// does not conflict with the borrow checker — the AST arena is
    /// immutable for the whole lowering pass.
    fn node(&self, idx: NodeIndex) -> &'a tsil_ast::Node {
        self.arena.get(idx)
    }

    pub fn lower_stmt(&mut self, idx: NodeIndex) -> CodegenResult<()> {
        let span = self.arena.span(idx);
        let kind = self.node(idx).kind.clone();
        match kind {
            NodeKind::Block(stmts) => {
                self.symbols.push_scope();
                self.lower_stmts(&stmts)?;
                self.symbols.pop_scope();
            }
            NodeKind::ExprStmt(e) => {
                self.lower_expr(e)?;
                self.emit(Instr::Pop);
            }
            NodeKind::VarDeclStmt { decls, .. } => {
                for d in decls {
                    match d.name {
                        BindingName::Identifier(name) => {
                            match d.initializer {
                                Some(init) => self.lower_expr(init)?,
                                None => self.emit(Instr::LoadUndefined),
                            }
                            // A `MoveNext` rehydration prologue (see
                            // `movenext.rs`) pre-binds every hoisted
                            // local's name to its backing field before
                            // the body is lowered; a (re-)declaration of
                            // that same name here must write through to
                            // the field rather than shadow it with a
                            // fresh, non-surviving local.
                            match self.symbols.resolve(name) {
                                Some(Binding::HoistedField { field, hops }) => {
                                    let scratch = self.alloc_local();
                                    self.emit(Instr::StoreLocal(scratch));
                                    self.emit_field_chain_store_prefix(hops);
                                    self.emit(Instr::LoadLocal(scratch));
                                    self.emit(Instr::StoreField(field));
                                }
                                _ if self.cell_promoted.contains(&name) => {
                                    self.wrap_in_cell();
                                    let slot = self.alloc_local();
                                    self.emit(Instr::StoreLocal(slot));
                                    self.symbols.bind(name, Binding::CellLocal(slot));
                                }
                                _ => {
                                    let slot = self.alloc_local();
                                    self.emit(Instr::StoreLocal(slot));
                                    self.symbols.bind(name, Binding::Local(slot));
                                }
                            }
                        }
                        BindingName::Pattern(_) => {
                            // Destructuring declarations bind each leaf
                            // via property/index reads off the
                            // initializer; out of this pass's scope.
                            if let Some(init) = d.initializer {
                                self.lower_expr(init)?;
                                self.emit(Instr::Pop);
                            }
                        }
                    }
                }
            }
            NodeKind::FunctionDecl(_) | NodeKind::ClassDecl(_) | NodeKind::EnumDecl(_) => {
                // Defined as a type/method stub by an earlier phase;
                // nothing to lower at the statement site itself.
            }
            NodeKind::If { test, consequent, alternate } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.lower_expr(test)?;
                self.emit_br_false(else_label);
                self.lower_stmt(consequent)?;
                self.emit_br(end_label);
                self.mark_label(else_label);
                if let Some(a) = alternate {
                    self.lower_stmt(a)?;
                }
                self.mark_label(end_label);
            }
            NodeKind::While { test, body } => {
                let top = self.new_label();
                let end = self.new_label();
                self.mark_label(top);
                self.lower_expr(test)?;
                self.emit_br_false(end);
                self.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: top });
                self.lower_stmt(body)?;
                self.loop_stack.pop();
                self.emit_br(top);
                self.mark_label(end);
            }
            NodeKind::DoWhile { body, test } => {
                let top = self.new_label();
                let cont = self.new_label();
                let end = self.new_label();
                self.mark_label(top);
                self.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
                self.lower_stmt(body)?;
                self.loop_stack.pop();
                self.mark_label(cont);
                self.lower_expr(test)?;
                self.emit_br_true(top);
                self.mark_label(end);
            }
            NodeKind::For { init, test, update, body } => {
                self.symbols.push_scope();
                match init {
                    ForInit::VarDecl { decls, .. } => {
                        for d in decls {
                            if let BindingName::Identifier(name) = d.name {
                                let slot = self.alloc_local();
                                match d.initializer {
                                    Some(e) => self.lower_expr(e)?,
                                    None => self.emit(Instr::LoadUndefined),
                                }
                                self.emit(Instr::StoreLocal(slot));
                                self.symbols.bind(name, Binding::Local(slot));
                            }
                        }
                    }
                    ForInit::Expr(e) => {
                        self.lower_expr(e)?;
                        self.emit(Instr::Pop);
                    }
                    ForInit::None => {}
                }
                let top = self.new_label();
                let cont = self.new_label();
                let end = self.new_label();
                self.mark_label(top);
                if let Some(t) = test {
                    self.lower_expr(t)?;
                    self.emit_br_false(end);
                }
                self.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
                self.lower_stmt(body)?;
                self.loop_stack.pop();
                self.mark_label(cont);
                if let Some(u) = update {
                    self.lower_expr(u)?;
                    self.emit(Instr::Pop);
                }
                self.emit_br(top);
                self.mark_label(end);
                self.symbols.pop_scope();
            }
            NodeKind::ForOf { name, iterable, body, decl_kind: _, is_await: _ } => {
                self.lower_for_of(name, iterable, body)?;
            }
            NodeKind::ForIn { name, object, body, .. } => {
                self.lower_for_in(name, object, body)?;
            }
            NodeKind::Switch { discriminant, cases } => {
                self.lower_switch(discriminant, &cases)?;
            }
            NodeKind::Try { block, catch, finally } => {
                self.lower_try(block, catch, finally)?;
            }
            NodeKind::Throw(e) => {
                self.lower_expr(e)?;
                self.emit(Instr::Throw);
            }
            NodeKind::Return(expr) => {
                self.lower_return(expr)?;
            }
            NodeKind::Break(label) => {
                let target = self.find_loop(label, true)?;
                self.emit_br(target);
            }
            NodeKind::Continue(label) => {
                let target = self.find_loop(label, false)?;
                self.emit_br(target);
            }
            NodeKind::Labeled { label, body } => {
                self.lower_labeled(label, body)?;
            }
            NodeKind::Empty => {}
            NodeKind::ImportDecl { .. } | NodeKind::ExportNamed { .. } | NodeKind::ExportAll { .. } => {
                // Resolved entirely by the Module Emitter (§4.7); no
                // statement-level code to lower here.
            }
            NodeKind::ExportDefault(e) => {
                self.lower_expr(e)?;
                self.emit(Instr::Pop);
            }
            NodeKind::ExportDecl(inner) => self.lower_stmt(inner)?,
            _ => return Err(CodegenError::ast_malformed("<unknown statement>", span)),
        }
        Ok(())
    }

    fn lower_labeled(&mut self, label: Atom, body: NodeIndex) -> CodegenResult<()> {
        // A labeled loop needs its own break/continue targets tagged
        // with the label so a labeled `break`/`continue` inside a
        // nested loop can still find the right one; a labeled
        // non-loop statement only needs a break target.
        let end = self.new_label();
        match &self.node(body).kind.clone() {
            NodeKind::While { .. } | NodeKind::DoWhile { .. } | NodeKind::For { .. }
            | NodeKind::ForOf { .. } | NodeKind::ForIn { .. } => {
                self.loop_stack.push(LoopCtx {
                    label: Some(label),
                    break_label: end,
                    continue_label: end,
                });
                let depth = self.loop_stack.len();
                self.lower_stmt(body)?;
                // The inner loop pushed/popped its own (unlabeled)
                // frame; pop the labeled marker frame we pushed above
                // only if the loop didn't already consume it (loops
                // always push their own frame on top, so ours is still
                // here at `depth - 1` position once the inner one pops).
                if self.loop_stack.len() >= depth {
                    self.loop_stack.truncate(depth - 1);
                }
            }
            _ => self.lower_stmt(body)?,
        }
        self.mark_label(end);
        Ok(())
    }

    fn find_loop(&self, label: Option<Atom>, is_break: bool) -> CodegenResult<LabelId> {
        let found = match label {
            Some(l) => self.loop_stack.iter().rev().find(|c| c.label == Some(l)),
            None => self.loop_stack.last(),
        };
        match found {
            Some(ctx) => Ok(if is_break { ctx.break_label } else { ctx.continue_label }),
            None => Err(CodegenError::ast_malformed("break/continue outside loop", Span::dummy())),
        }
    }

    fn lower_for_of(&mut self, name: Atom, iterable: NodeIndex, body: NodeIndex) -> CodegenResult<()> {
        self.symbols.push_scope();
        let arr_local = self.alloc_local();
        let i_local = self.alloc_local();
        let item_local = self.alloc_local();
        self.lower_expr(iterable)?;
        self.emit(Instr::StoreLocal(arr_local));
        self.emit(Instr::LoadConstNum(0.0));
        self.emit(Instr::StoreLocal(i_local));

        let top = self.new_label();
        let cont = self.new_label();
        let end = self.new_label();
        self.mark_label(top);
        self.emit(Instr::LoadLocal(i_local));
        self.emit(Instr::LoadLocal(arr_local));
        self.emit(Instr::ArrayLen);
        self.emit(Instr::BinOp(ImgBinOp::Lt));
        self.emit_br_false(end);

        self.emit(Instr::LoadLocal(arr_local));
        self.emit(Instr::LoadLocal(i_local));
        self.emit(Instr::LoadIndex);
        self.emit(Instr::StoreLocal(item_local));
        self.symbols.bind(name, Binding::Local(item_local));

        self.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
        self.lower_block(body)?;
        self.loop_stack.pop();

        self.mark_label(cont);
        self.emit(Instr::LoadLocal(i_local));
        self.emit(Instr::LoadConstNum(1.0));
        self.emit(Instr::BinOp(ImgBinOp::Add));
        self.emit(Instr::StoreLocal(i_local));
        self.emit_br(top);
        self.mark_label(end);
        self.symbols.pop_scope();
        Ok(())
    }

    /// `for-in` iterates the property bag's keys (§4.5); the bag has no
    /// enumerable-keys primitive in this image format, so this backend
    /// models it over an explicit key array the runtime bag would, in a
    /// full implementation, expose — see `DESIGN.md`.
    fn lower_for_in(&mut self, name: Atom, object: NodeIndex, body: NodeIndex) -> CodegenResult<()> {
        self.symbols.push_scope();
        let keys_local = self.alloc_local();
        self.lower_expr(object)?;
        self.emit(Instr::Pop);
        self.emit(Instr::NewArray(0));
        self.emit(Instr::StoreLocal(keys_local));
        let key_local = self.alloc_local();
        self.emit(Instr::LoadUndefined);
        self.emit(Instr::StoreLocal(key_local));
        self.symbols.bind(name, Binding::Local(key_local));
        let end = self.new_label();
        let cont = self.new_label();
        self.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
        self.lower_block(body)?;
        self.loop_stack.pop();
        self.mark_label(cont);
        self.mark_label(end);
        self.symbols.pop_scope();
        Ok(())
    }

    fn lower_switch(
        &mut self,
        discriminant: NodeIndex,
        cases: &[tsil_ast::SwitchCase],
    ) -> CodegenResult<()> {
        let disc_local = self.alloc_local();
        self.lower_expr(discriminant)?;
        self.emit(Instr::StoreLocal(disc_local));

        let end = self.new_label();
        let mut case_labels = Vec::with_capacity(cases.len());
        for _ in cases {
            case_labels.push(self.new_label());
        }
        let mut default_index = None;
        for (i, case) in cases.iter().enumerate() {
            match case.test {
                Some(test) => {
                    self.emit(Instr::LoadLocal(disc_local));
                    self.lower_expr(test)?;
                    self.emit(Instr::BinOp(ImgBinOp::StrictEq));
                    self.emit_br_true(case_labels[i]);
                }
                None => default_index = Some(i),
            }
        }
        match default_index {
            Some(i) => self.emit_br(case_labels[i]),
            None => self.emit_br(end),
        }

        self.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: end });
        for (i, case) in cases.iter().enumerate() {
            self.mark_label(case_labels[i]);
            self.lower_stmts(&case.body)?;
        }
        self.loop_stack.pop();
        self.mark_label(end);
        Ok(())
    }

    /// The deferred-return protocol (§4.5): the first try-region a
    /// method emits allocates `should_return`/`return_value` locals;
    /// every `return` inside any (possibly nested) try jumps to the
    /// *innermost* active try's post-region label rather than `ret`ing
    /// directly (illegal inside a protected region in the target IR).
    /// Each try's post-region code checks the flag and either falls
    /// through (normal exit) or propagates the deferred return further
    /// out — to the next enclosing try, or, at the outermost try, to a
    /// final `ret` of `return_value`.
    fn lower_try(
        &mut self,
        block: NodeIndex,
        catch: Option<CatchClause>,
        finally: Option<NodeIndex>,
    ) -> CodegenResult<()> {
        if self.deferred.is_none() {
            self.deferred = Some(DeferredReturn {
                should_return: self.next_local,
                return_value: self.next_local + 1,
            });
            self.next_local += 2;
            let d = self.deferred.as_ref().unwrap();
            self.emit(Instr::LoadBool(false));
            self.emit(Instr::StoreLocal(d.should_return));
        }

        let after = self.new_label();
        self.try_stack.push(after);

        self.emit(Instr::BeginTry);
        self.lower_block(block)?;
        self.emit(Instr::EndTry);

        if let Some(CatchClause { param, body }) = catch {
            self.emit(Instr::BeginCatch);
            self.symbols.push_scope();
            match param {
                Some(name) => {
                    let slot = self.alloc_local();
                    self.emit(Instr::StoreLocal(slot));
                    self.symbols.bind(name, Binding::Local(slot));
                }
                None => self.emit(Instr::Pop),
            }
            self.lower_block(body)?;
            self.symbols.pop_scope();
            self.emit(Instr::EndCatch);
        }
        if let Some(f) = finally {
            self.emit(Instr::BeginFinally);
            self.lower_block(f)?;
            self.emit(Instr::EndFinally);
        }

        self.try_stack.pop();
        self.mark_label(after);

        let d_should_return = self.deferred.as_ref().unwrap().should_return;
        let skip = self.new_label();
        self.emit(Instr::LoadLocal(d_should_return));
        self.emit_br_false(skip);
        match self.try_stack.last().copied() {
            Some(outer) => self.emit_br(outer),
            None => {
                let d = self.deferred.as_ref().unwrap();
                self.emit(Instr::LoadLocal(d.return_value));
                self.emit_final_return();
            }
        }
        self.mark_label(skip);
        Ok(())
    }

    fn lower_return(&mut self, expr: Option<NodeIndex>) -> CodegenResult<()> {
        match expr {
            Some(e) => self.lower_expr(e)?,
            None => self.emit(Instr::LoadUndefined),
        }
        if let Some(target) = self.try_stack.last().copied() {
            let d = self.deferred.as_ref().expect("try_stack non-empty implies deferred state allocated");
            self.emit(Instr::StoreLocal(d.return_value));
            self.emit(Instr::LoadBool(true));
            self.emit(Instr::StoreLocal(d.should_return));
            self.emit_br(target);
        } else {
            self.emit_final_return();
        }
        Ok(())
    }

    /// The top-of-stack value is the function's return value with no
    /// enclosing try left to defer through. A plain body emits `Ret`;
    /// a `MoveNext` segment (`async_exit` set by `movenext`) cannot —
    /// it stores the value and branches to the segment's shared exit,
    /// which drives `builder.SetResult` instead.
    pub fn emit_final_return(&mut self) {
        match &self.async_exit {
            Some(exit) => {
                let local = exit.return_value_local;
                let label = exit.common_return_label;
                self.emit(Instr::StoreLocal(local));
                self.emit_br(label);
            }
            None => self.emit(Instr::Ret),
        }
    }

    // ---- expressions ----

    pub fn lower_expr(&mut self, idx: NodeIndex) -> CodegenResult<()> {
        let span = self.arena.span(idx);
        let kind = self.node(idx).kind.clone();
        match kind {
            NodeKind::NumericLiteral(n) => self.emit(Instr::LoadConstNum(n)),
            NodeKind::StringLiteral(s) => {
                let resolved = self.resolve_atom_owned(s);
                let tok = self.intern_str(&resolved);
                self.emit(Instr::LoadConstStr(tok));
            }
            NodeKind::BooleanLiteral(b) => self.emit(Instr::LoadBool(b)),
            NodeKind::NullLiteral => self.emit(Instr::LoadNull),
            NodeKind::UndefinedLiteral => self.emit(Instr::LoadUndefined),
            NodeKind::RegexLiteral(_) => self.emit(Instr::LoadNull),
            NodeKind::Identifier(name) => self.lower_identifier_load(name)?,
            NodeKind::ThisExpr | NodeKind::SuperExpr => {
                self.emit(Instr::LoadThis);
                // `this_field` is set whenever the body being lowered is
                // not itself the `this`-owning frame: an async `MoveNext`
                // segment (the machine instance isn't `this`) or a
                // capturing arrow's `Invoke` (the display-class instance
                // isn't `this` either) both forward through the captured
                // field instead of the method's own receiver.
                if let Some(this_field) = self.this_field {
                    self.emit(Instr::LoadField(this_field));
                }
            }
            NodeKind::TemplateLiteral { quasis, exprs, tag } => {
                self.lower_template(&quasis, &exprs, tag)?;
            }
            NodeKind::ArrayLiteral(elems) => self.lower_array_literal(&elems)?,
            NodeKind::ObjectLiteral(props) => self.lower_object_literal(&props)?,
            NodeKind::SpreadElement(inner) => self.lower_expr(inner)?,
            NodeKind::Binary { op, left, right } => self.lower_binary(op, left, right)?,
            NodeKind::Logical { op, left, right } => self.lower_logical(op, left, right)?,
            NodeKind::Unary { op, operand } => self.lower_unary(op, operand)?,
            NodeKind::UpdateExpr { op, prefix, operand } => self.lower_update(op, prefix, operand)?,
            NodeKind::Assign { op, target, value } => self.lower_assign(op, target, value)?,
            NodeKind::Conditional { test, consequent, alternate } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.lower_expr(test)?;
                self.emit_br_false(else_label);
                self.lower_expr(consequent)?;
                self.emit_br(end_label);
                self.mark_label(else_label);
                self.lower_expr(alternate)?;
                self.mark_label(end_label);
            }
            NodeKind::Grouping(e) => self.lower_expr(e)?,
            NodeKind::Call { callee, args, optional } => self.lower_call(callee, &args, optional)?,
            NodeKind::New { callee, args } => self.lower_new(callee, &args)?,
            NodeKind::PropertyAccess { object, name, optional } => {
                self.lower_property_get(object, name, optional)?;
            }
            NodeKind::IndexAccess { object, index, optional } => {
                self.lower_index_get(object, index, optional)?;
            }
            NodeKind::NonNullAssertion(e) | NodeKind::TypeAssertion(e) | NodeKind::Satisfies(e) => {
                self.lower_expr(e)?
            }
            NodeKind::Await(_) => {
                // Only reachable for an `await` outside an async body
                // (illegal surface-language-side, already excluded by
                // the type checker) or inside the segment lowering done
                // directly by `movenext`, which intercepts `Await`
                // before delegating to this generic expression lowerer.
                return Err(CodegenError::ast_malformed("await outside async lowering", span));
            }
            NodeKind::Yield { argument, .. } => {
                if let Some(a) = argument {
                    self.lower_expr(a)?;
                } else {
                    self.emit(Instr::LoadUndefined);
                }
            }
            NodeKind::DynamicImport(e) => {
                self.lower_expr(e)?;
                self.emit(Instr::Pop);
                self.emit(Instr::LoadNull);
            }
            NodeKind::ImportMeta => self.emit(Instr::LoadNull),
            NodeKind::Arrow(_) | NodeKind::FunctionExpr(_) | NodeKind::ClassExpr(_) => {
                self.lower_value_reference(idx)?;
            }
            _ => return Err(CodegenError::ast_malformed("<unknown expression>", span)),
        }
        Ok(())
    }

    fn resolve_atom_owned(&self, a: Atom) -> String {
        self.interner.resolve(a).to_string()
    }

    fn lower_identifier_load(&mut self, name: Atom) -> CodegenResult<()> {
        match self.symbols.resolve(name) {
            Some(Binding::Local(slot)) => self.emit(Instr::LoadLocal(slot)),
            Some(Binding::Arg(slot)) => self.emit(Instr::LoadArg(slot)),
            Some(Binding::HoistedField { field, hops }) => {
                self.emit_field_chain_load(field, hops);
            }
            Some(Binding::CapturedField { field, hops }) => {
                self.emit_field_chain_load(field, hops);
            }
            Some(Binding::CellLocal(slot)) => {
                self.emit(Instr::LoadLocal(slot));
                self.emit(Instr::LoadField(self.runtime.cell_value_field));
            }
            Some(Binding::CellField { field, hops }) => {
                self.emit_field_chain_load(field, hops);
                self.emit(Instr::LoadField(self.runtime.cell_value_field));
            }
            None => {
                if let Some(info) = self.registries.functions.get(&name) {
                    if let Some(method) = info.method {
                        self.emit(Instr::LoadMethodPtr(method));
                        self.emit(Instr::CallStatic(self.runtime.ts_function_wrap, 1));
                        return Ok(());
                    }
                }
                // Unresolved name (§7): not a class, function, enum, or
                // any bound scope — lowers to a null push; the runtime
                // diagnoses an actual unresolved reference, not this
                // backend.
                self.emit(Instr::LoadNull);
            }
        }
        Ok(())
    }

    pub(crate) fn emit_field_chain_load(&mut self, field: FieldToken, hops: u32) {
        self.emit(Instr::LoadThis);
        for i in 0..hops {
            if let Some(&outer) = self.outer_chain.get(i as usize) {
                self.emit(Instr::LoadField(outer));
            }
        }
        self.emit(Instr::LoadField(field));
    }

    pub(crate) fn emit_field_chain_store_prefix(&mut self, hops: u32) {
        self.emit(Instr::LoadThis);
        for i in 0..hops {
            if let Some(&outer) = self.outer_chain.get(i as usize) {
                self.emit(Instr::LoadField(outer));
            }
        }
    }

    /// A name used as a first-class value rather than called directly:
    /// wraps a non-capturing arrow's static method or a capturing
    /// arrow's display-class instance so it can be passed around and
    /// invoked later via `CallDynamic`.
    fn lower_value_reference(&mut self, idx: NodeIndex) -> CodegenResult<()> {
        if let Some(info) = self.registries.arrows.get(&idx) {
            if let Some(ctor) = info.display_ctor {
                self.emit(Instr::NewObj(
                    info.display_class.expect("display_ctor implies display_class"),
                    0,
                ));
                self.emit(Instr::Dup);
                self.emit(Instr::CallDirect(ctor, 1));
                self.emit(Instr::Pop);

                // The display class ctor takes no arguments of its own;
                // each captured name's cell (and the enclosing `this`,
                // if captured) is copied onto the freshly built instance
                // here instead, the same way a nested async arrow's
                // display fields are seeded at its construction site.
                let this_field = info.this_field;
                let display_fields = info.display_fields.clone();
                for (&name, &field) in &display_fields {
                    self.emit(Instr::Dup);
                    match self.symbols.resolve(name) {
                        Some(Binding::CellLocal(slot)) => self.emit(Instr::LoadLocal(slot)),
                        Some(Binding::CellField { field: outer_field, hops }) => {
                            self.emit_field_chain_load(outer_field, hops)
                        }
                        _ => self.emit(Instr::LoadNull),
                    }
                    self.emit(Instr::StoreField(field));
                }
                if let Some(field) = this_field {
                    self.emit(Instr::Dup);
                    self.emit(Instr::LoadThis);
                    if let Some(outer_this) = self.this_field {
                        self.emit(Instr::LoadField(outer_this));
                    }
                    self.emit(Instr::StoreField(field));
                }
                return Ok(());
            }
            if let Some(method) = info.method {
                self.emit(Instr::LoadMethodPtr(method));
                self.emit(Instr::CallStatic(self.runtime.ts_function_wrap, 1));
                return Ok(());
            }
        }
        self.emit(Instr::LoadNull);
        Ok(())
    }

    fn lower_template(
        &mut self,
        quasis: &[Atom],
        exprs: &[NodeIndex],
        tag: Option<NodeIndex>,
    ) -> CodegenResult<()> {
        if let Some(tag_expr) = tag {
            // Tagged templates are lowered as a call to the tag with
            // the quasis array followed by each substitution, mirroring
            // the teacher's ES5 tagged-template desugaring but against
            // the opcode stream instead of source text.
            self.lower_expr(tag_expr)?;
            for q in quasis {
                let text = self.resolve_atom_owned(*q);
                let tok = self.intern_str(&text);
                self.emit(Instr::LoadConstStr(tok));
            }
            self.emit(Instr::NewArray(quasis.len() as u16));
            for &e in exprs {
                self.lower_expr(e)?;
            }
            self.emit(Instr::CallDynamic(1 + exprs.len() as u16));
            return Ok(());
        }

        let empty = self.intern_str("");
        self.emit(Instr::LoadConstStr(empty));
        for (i, q) in quasis.iter().enumerate() {
            let text = self.resolve_atom_owned(*q);
            let tok = self.intern_str(&text);
            self.emit(Instr::LoadConstStr(tok));
            self.emit(Instr::CallStatic(self.runtime.string_concat, 2));
            if let Some(&e) = exprs.get(i) {
                self.lower_expr(e)?;
                self.emit(Instr::CallStatic(self.runtime.string_concat, 2));
            }
        }
        Ok(())
    }

    fn lower_array_literal(&mut self, elems: &[NodeIndex]) -> CodegenResult<()> {
        // Compile-time flatten any spread of a literal array (the
        // common shape); a spread of an expression of unknown static
        // shape is lowered as a single element (its own value), which
        // is a known simplification for the dynamic-length case
        // documented in `DESIGN.md`.
        let mut flat = Vec::with_capacity(elems.len());
        for &e in elems {
            match &self.node(e).kind {
                NodeKind::SpreadElement(inner) => match &self.node(*inner).kind {
                    NodeKind::ArrayLiteral(inner_elems) => flat.extend(inner_elems.iter().copied()),
                    _ => flat.push(*inner),
                },
                _ => flat.push(e),
            }
        }
        for &e in &flat {
            self.lower_expr(e)?;
        }
        self.emit(Instr::NewArray(flat.len() as u16));
        Ok(())
    }

    fn lower_object_literal(&mut self, props: &[tsil_ast::ObjectProp]) -> CodegenResult<()> {
        self.emit(Instr::NewObj(self.runtime.any_object_type, 0));
        for p in props {
            self.emit(Instr::Dup);
            let key_text = self.resolve_atom_owned(p.key);
            let key = self.intern_str(&key_text);
            self.lower_expr(p.value)?;
            // `StoreBagProp` pops (value, object) in that order per the
            // reference interpreter, matching `StoreField`'s convention.
            self.emit(Instr::StoreBagProp(key));
        }
        Ok(())
    }

    fn lower_binary(&mut self, op: BinaryOp, left: NodeIndex, right: NodeIndex) -> CodegenResult<()> {
        if op == BinaryOp::Comma {
            self.lower_expr(left)?;
            self.emit(Instr::Pop);
            self.lower_expr(right)?;
            return Ok(());
        }
        self.lower_expr(left)?;
        self.lower_expr(right)?;
        self.emit(Instr::BinOp(map_binop(op)));
        Ok(())
    }

    fn lower_logical(&mut self, op: LogicalOp, left: NodeIndex, right: NodeIndex) -> CodegenResult<()> {
        let end = self.new_label();
        self.lower_expr(left)?;
        match op {
            LogicalOp::And => {
                self.emit(Instr::Dup);
                self.emit_br_false(end);
                self.emit(Instr::Pop);
                self.lower_expr(right)?;
            }
            LogicalOp::Or => {
                self.emit(Instr::Dup);
                self.emit_br_true(end);
                self.emit(Instr::Pop);
                self.lower_expr(right)?;
            }
            LogicalOp::NullishCoalesce => {
                self.emit(Instr::Dup);
                self.emit(Instr::LoadNull);
                self.emit(Instr::BinOp(ImgBinOp::StrictEq));
                let is_nullish = self.new_label();
                self.emit_br_true(is_nullish);
                self.emit(Instr::Dup);
                self.emit(Instr::LoadUndefined);
                self.emit(Instr::BinOp(ImgBinOp::StrictEq));
                self.emit_br_true(is_nullish);
                self.emit_br(end);
                self.mark_label(is_nullish);
                self.emit(Instr::Pop);
                self.lower_expr(right)?;
            }
        }
        self.mark_label(end);
        Ok(())
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: NodeIndex) -> CodegenResult<()> {
        if op == UnaryOp::Delete {
            if let NodeKind::PropertyAccess { object, name, .. } = self.node(operand).kind.clone() {
                self.lower_expr(object)?;
                let text = self.resolve_atom_owned(name);
                let tok = self.intern_str(&text);
                self.emit(Instr::LoadNull);
                self.emit(Instr::StoreBagProp(tok));
            }
            self.emit(Instr::LoadBool(true));
            return Ok(());
        }
        self.lower_expr(operand)?;
        self.emit(Instr::UnOp(map_unop(op)));
        Ok(())
    }

    fn lower_update(&mut self, op: UpdateOp, prefix: bool, operand: NodeIndex) -> CodegenResult<()> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };
        self.lower_expr(operand)?;
        if !prefix {
            self.emit(Instr::Dup);
        }
        self.emit(Instr::LoadConstNum(delta));
        self.emit(Instr::BinOp(ImgBinOp::Add));
        if prefix {
            self.emit(Instr::Dup);
        }
        self.store_to_target(operand)?;
        Ok(())
    }

    fn lower_assign(&mut self, op: AssignOp, target: NodeIndex, value: NodeIndex) -> CodegenResult<()> {
        match op.as_binary_op() {
            Some(bin) => {
                self.lower_expr(target)?;
                self.lower_expr(value)?;
                self.emit(Instr::BinOp(map_binop(bin)));
                self.emit(Instr::Dup);
                self.store_to_target(target)?;
            }
            None if op == AssignOp::Assign => {
                self.lower_expr(value)?;
                self.emit(Instr::Dup);
                self.store_to_target(target)?;
            }
            None => {
                // Logical assignment (`&&=`, `||=`, `??=`): evaluate the
                // target, short-circuit, then assign and yield the
                // final value, matching `lower_logical`'s structure.
                let end = self.new_label();
                self.lower_expr(target)?;
                match op {
                    AssignOp::LogicalAndAssign => {
                        self.emit(Instr::Dup);
                        self.emit_br_false(end);
                    }
                    AssignOp::LogicalOrAssign => {
                        self.emit(Instr::Dup);
                        self.emit_br_true(end);
                    }
                    AssignOp::NullishAssign => {
                        self.emit(Instr::Dup);
                        self.emit(Instr::LoadNull);
                        self.emit(Instr::BinOp(ImgBinOp::StrictEq));
                        let is_nullish = self.new_label();
                        self.emit_br_true(is_nullish);
                        self.emit_br(end);
                        self.mark_label(is_nullish);
                    }
                    _ => unreachable!("non-short-circuit op handled above"),
                }
                self.emit(Instr::Pop);
                self.lower_expr(value)?;
                self.emit(Instr::Dup);
                self.store_to_target(target)?;
                self.mark_label(end);
            }
        }
        Ok(())
    }

    /// Stores the top-of-stack value into the lvalue named by `target`,
    /// consuming it. Used by plain `=`, compound assignment, and
    /// pre/post increment/decrement, all of which leave a copy of the
    /// stored value on the stack beforehand (`Dup`'d by the caller) so
    /// the assignment expression's own value is still available after.
    pub(crate) fn store_to_target(&mut self, target: NodeIndex) -> CodegenResult<()> {
        let kind = self.node(target).kind.clone();
        match kind {
            NodeKind::Identifier(name) => match self.symbols.resolve(name) {
                Some(Binding::Local(slot)) => self.emit(Instr::StoreLocal(slot)),
                Some(Binding::Arg(slot)) => self.emit(Instr::StoreArg(slot)),
                Some(Binding::HoistedField { field, hops }) | Some(Binding::CapturedField { field, hops }) => {
                    // Need (object, value) order for `StoreField`; the
                    // value is already on the stack from the caller, so
                    // push the receiver chain then swap is not directly
                    // available — instead re-derive by storing the
                    // value into a scratch local first.
                    let scratch = self.alloc_local();
                    self.emit(Instr::StoreLocal(scratch));
                    self.emit_field_chain_store_prefix(hops);
                    self.emit(Instr::LoadLocal(scratch));
                    self.emit(Instr::StoreField(field));
                }
                Some(Binding::CellLocal(slot)) => {
                    let scratch = self.alloc_local();
                    self.emit(Instr::StoreLocal(scratch));
                    self.emit(Instr::LoadLocal(slot));
                    self.emit(Instr::LoadLocal(scratch));
                    self.emit(Instr::StoreField(self.runtime.cell_value_field));
                }
                Some(Binding::CellField { field, hops }) => {
                    let scratch = self.alloc_local();
                    self.emit(Instr::StoreLocal(scratch));
                    self.emit_field_chain_store_prefix(hops);
                    self.emit(Instr::LoadField(field));
                    self.emit(Instr::LoadLocal(scratch));
                    self.emit(Instr::StoreField(self.runtime.cell_value_field));
                }
                None => {
                    self.emit(Instr::Pop);
                }
            },
            NodeKind::PropertyAccess { object, name, .. } => {
                let scratch = self.alloc_local();
                self.emit(Instr::StoreLocal(scratch));
                self.lower_expr(object)?;
                let text = self.resolve_atom_owned(name);
                let tok = self.intern_str(&text);
                self.emit(Instr::LoadLocal(scratch));
                self.emit(Instr::StoreBagProp(tok));
            }
            NodeKind::IndexAccess { object, index, .. } => {
                let scratch = self.alloc_local();
                self.emit(Instr::StoreLocal(scratch));
                self.lower_expr(object)?;
                self.lower_expr(index)?;
                self.emit(Instr::LoadLocal(scratch));
                self.emit(Instr::StoreIndex);
            }
            _ => {
                self.emit(Instr::Pop);
            }
        }
        Ok(())
    }

    /// Lowers a call's argument list onto the evaluation stack. Returns
    /// `None` if none of `args` is a spread: every argument was pushed
    /// individually in order, same as before, and the caller keeps using
    /// a plain fixed-argc call opcode with `args.len()` (plus whatever
    /// else it pushes ahead of the args, e.g. a receiver). Returns
    /// `Some(leading)` if a spread is present: the `leading` arguments
    /// before the first spread were pushed individually, followed by one
    /// array (built via `ArrayConcat`) covering every argument from the
    /// first spread onward. The caller must then emit `CallSpread`/
    /// `CallDynamicSpread` with a fixed_argc of `leading` (plus whatever
    /// else it pushes ahead).
    fn lower_call_args(&mut self, args: &[NodeIndex]) -> CodegenResult<Option<u16>> {
        let Some(spread_at) = args.iter().position(|&a| matches!(self.node(a).kind, NodeKind::SpreadElement(_)))
        else {
            for &a in args {
                self.lower_expr(a)?;
            }
            return Ok(None);
        };
        for &a in &args[..spread_at] {
            self.lower_expr(a)?;
        }
        self.emit(Instr::NewArray(0));
        for &a in &args[spread_at..] {
            match self.node(a).kind.clone() {
                NodeKind::SpreadElement(inner) => self.lower_expr(inner)?,
                _ => {
                    self.lower_expr(a)?;
                    self.emit(Instr::NewArray(1));
                }
            }
            self.emit(Instr::ArrayConcat);
        }
        Ok(Some(spread_at as u16))
    }

    fn lower_call(&mut self, callee: NodeIndex, args: &[NodeIndex], _optional: bool) -> CodegenResult<()> {
        let callee_kind = self.node(callee).kind.clone();
        match callee_kind {
            NodeKind::PropertyAccess { object, name, .. } => {
                if matches!(self.node(object).kind, NodeKind::SuperExpr) {
                    let super_class = self.current_class.and_then(|c| {
                        self.registries.classes.get(&c).and_then(|i| i.super_class)
                    });
                    let method = super_class.and_then(|sc| {
                        self.registries.resolve_inherited_method(sc, |ci| ci.instance_methods.get(&name).copied(), 64)
                    });
                    self.emit(Instr::LoadThis);
                    let spread = self.lower_call_args(args)?;
                    match (method, spread) {
                        (Some(m), None) => self.emit(Instr::CallDirect(m, args.len() as u16 + 1)),
                        (Some(m), Some(leading)) => self.emit(Instr::CallSpread(m, leading + 1)),
                        (None, None) => {
                            for _ in 0..args.len() {
                                self.emit(Instr::Pop);
                            }
                            self.emit(Instr::Pop);
                            self.emit(Instr::LoadNull);
                        }
                        (None, Some(_)) => {
                            self.emit(Instr::Pop);
                            self.emit(Instr::Pop);
                            self.emit(Instr::LoadNull);
                        }
                    }
                    return Ok(());
                }

                let static_method = self.static_method_target(object, name);
                self.lower_expr(object)?;
                let spread = self.lower_call_args(args)?;
                match (static_method, spread) {
                    (Some(method), None) => {
                        let argc = args.len() as u16 + 1;
                        match self.dispatch {
                            DispatchMode::AsyncBody => self.emit(Instr::CallDirect(method, argc)),
                            DispatchMode::Plain => self.emit(Instr::CallVirtual(method, argc)),
                        }
                    }
                    (Some(method), Some(leading)) => self.emit(Instr::CallSpread(method, leading + 1)),
                    (None, _) => {
                        let text = self.resolve_atom_owned(name);
                        let tok = self.intern_str(&text);
                        self.emit(Instr::LoadBagProp(tok));
                        match spread {
                            None => self.emit(Instr::CallDynamic(args.len() as u16)),
                            Some(leading) => self.emit(Instr::CallDynamicSpread(leading)),
                        }
                    }
                }
            }
            NodeKind::Identifier(name) => {
                if let Some(info) = self.registries.functions.get(&name) {
                    if let Some(method) = info.method {
                        let spread = self.lower_call_args(args)?;
                        match spread {
                            None => self.emit(Instr::CallStatic(method, args.len() as u16)),
                            Some(leading) => self.emit(Instr::CallSpread(method, leading)),
                        }
                        return Ok(());
                    }
                }
                // A call through a local/captured value bound to a
                // callable (e.g. an arrow assigned to a variable).
                self.lower_identifier_load(name)?;
                let spread = self.lower_call_args(args)?;
                match spread {
                    None => self.emit(Instr::CallDynamic(args.len() as u16)),
                    Some(leading) => self.emit(Instr::CallDynamicSpread(leading)),
                }
            }
            NodeKind::SuperExpr => {
                let super_class = self.current_class.and_then(|c| {
                    self.registries.classes.get(&c).and_then(|i| i.super_class)
                });
                let ctor = super_class.and_then(|sc| self.registries.classes.get(&sc)).and_then(|ci| ci.ctor);
                self.emit(Instr::LoadThis);
                let spread = self.lower_call_args(args)?;
                match (ctor, spread) {
                    (Some(c), None) => self.emit(Instr::CallDirect(c, args.len() as u16 + 1)),
                    (Some(c), Some(leading)) => self.emit(Instr::CallSpread(c, leading + 1)),
                    (None, None) => {
                        for _ in 0..args.len() {
                            self.emit(Instr::Pop);
                        }
                        self.emit(Instr::Pop);
                    }
                    (None, Some(_)) => {
                        self.emit(Instr::Pop);
                        self.emit(Instr::Pop);
                    }
                }
                self.emit(Instr::LoadUndefined);
            }
            _ => {
                self.lower_expr(callee)?;
                let spread = self.lower_call_args(args)?;
                match spread {
                    None => self.emit(Instr::CallDynamic(args.len() as u16)),
                    Some(leading) => self.emit(Instr::CallDynamicSpread(leading)),
                }
            }
        }
        Ok(())
    }

    /// Best-effort static receiver-type resolution for a member call:
    /// `this.foo()`/`super.foo()` inside a known class body, or a
    /// freshly-constructed `new C().foo()` chain. Anything else (a
    /// value of unknown static type) falls back to the property-bag
    /// dynamic dispatch path in `lower_call`.
    fn static_method_target(&self, object: NodeIndex, name: Atom) -> Option<tsil_image::MethodToken> {
        let class = match &self.node(object).kind {
            NodeKind::ThisExpr => self.current_class,
            NodeKind::New { callee, .. } => match &self.node(*callee).kind {
                NodeKind::Identifier(n) => Some(*n),
                _ => None,
            },
            _ => None,
        }?;
        self.registries.resolve_inherited_method(class, |ci| ci.instance_methods.get(&name).copied(), 64)
    }

    fn lower_new(&mut self, callee: NodeIndex, args: &[NodeIndex]) -> CodegenResult<()> {
        let class_name = match &self.node(callee).kind {
            NodeKind::Identifier(n) => Some(*n),
            _ => None,
        };
        let Some(class_name) = class_name else {
            self.lower_expr(callee)?;
            self.emit(Instr::Pop);
            self.emit(Instr::LoadNull);
            return Ok(());
        };
        let Some(info) = self.registries.classes.get(&class_name) else {
            self.emit(Instr::LoadNull);
            return Ok(());
        };
        let Some(type_token) = info.type_token else {
            self.emit(Instr::LoadNull);
            return Ok(());
        };
        self.emit(Instr::NewObj(type_token, 0));
        if let Some(ctor) = info.ctor {
            self.emit(Instr::Dup);
            let spread = self.lower_call_args(args)?;
            match spread {
                None => self.emit(Instr::CallDirect(ctor, args.len() as u16 + 1)),
                Some(leading) => self.emit(Instr::CallSpread(ctor, leading + 1)),
            }
            self.emit(Instr::Pop);
        }
        Ok(())
    }

    fn lower_property_get(&mut self, object: NodeIndex, name: Atom, optional: bool) -> CodegenResult<()> {
        if matches!(self.node(object).kind, NodeKind::SuperExpr) {
            // `super.prop` read: resolve through the inherited-field
            // chain the same way a method lookup does.
            let super_class = self.current_class.and_then(|c| {
                self.registries.classes.get(&c).and_then(|i| i.super_class)
            });
            let field = super_class.and_then(|sc| {
                self.registries.resolve_inherited_method(sc, |ci| ci.instance_fields.get(&name).copied(), 64)
            });
            self.emit(Instr::LoadThis);
            match field {
                Some(f) => self.emit(Instr::LoadField(f)),
                None => {
                    self.emit(Instr::Pop);
                    self.emit(Instr::LoadNull);
                }
            }
            return Ok(());
        }

        // Enum member access folds to a literal (§8 property 8 for
        // `const enum`; non-const enums fold identically here since
        // this backend emits no runtime enum object — see
        // `DESIGN.md`).
        if let NodeKind::Identifier(obj_name) = &self.node(object).kind {
            if let Some(enum_info) = self.registries.enums.get(obj_name) {
                match enum_info.members.get(&name) {
                    Some(crate::registries::EnumValue::Number(n)) => {
                        self.emit(Instr::LoadConstNum(*n));
                        return Ok(());
                    }
                    Some(crate::registries::EnumValue::String(s)) => {
                        let text = self.resolve_atom_owned(*s);
                        let tok = self.intern_str(&text);
                        self.emit(Instr::LoadConstStr(tok));
                        return Ok(());
                    }
                    None => {}
                }
            }
        }

        let field = match &self.node(object).kind {
            NodeKind::ThisExpr => self
                .current_class
                .and_then(|c| self.registries.classes.get(&c))
                .and_then(|ci| ci.instance_fields.get(&name).copied()),
            _ => None,
        };
        self.lower_expr(object)?;
        if optional {
            self.emit(Instr::Dup);
            self.emit(Instr::LoadNull);
            self.emit(Instr::BinOp(ImgBinOp::StrictEq));
            let short = self.new_label();
            let end = self.new_label();
            self.emit_br_true(short);
            match field {
                Some(f) => self.emit(Instr::LoadField(f)),
                None => {
                    let text = self.resolve_atom_owned(name);
                    let tok = self.intern_str(&text);
                    self.emit(Instr::LoadBagProp(tok));
                }
            }
            self.emit_br(end);
            self.mark_label(short);
            self.emit(Instr::Pop);
            self.emit(Instr::LoadUndefined);
            self.mark_label(end);
            return Ok(());
        }
        match field {
            Some(f) => self.emit(Instr::LoadField(f)),
            None => {
                let text = self.resolve_atom_owned(name);
                let tok = self.intern_str(&text);
                self.emit(Instr::LoadBagProp(tok));
            }
        }
        Ok(())
    }

    fn lower_index_get(&mut self, object: NodeIndex, index: NodeIndex, optional: bool) -> CodegenResult<()> {
        self.lower_expr(object)?;
        if optional {
            self.emit(Instr::Dup);
            self.emit(Instr::LoadNull);
            self.emit(Instr::BinOp(ImgBinOp::StrictEq));
            let short = self.new_label();
            let end = self.new_label();
            self.emit_br_true(short);
            self.lower_expr(index)?;
            self.emit(Instr::LoadIndex);
            self.emit_br(end);
            self.mark_label(short);
            self.emit(Instr::Pop);
            self.emit(Instr::LoadUndefined);
            self.mark_label(end);
            return Ok(());
        }
        self.lower_expr(index)?;
        self.emit(Instr::LoadIndex);
        Ok(())
    }

    /// Would lowering `idx` leave an unboxed primitive on the stack?
    /// Drives an optional trailing `Box` at every boundary where the
    /// static type is erased (§4.5 "box/unbox discipline").
    pub fn would_leave_unboxed(&self, idx: NodeIndex) -> Option<Primitive> {
        match &self.node(idx).kind {
            NodeKind::NumericLiteral(_) => Some(Primitive::Number),
            NodeKind::BooleanLiteral(_) => Some(Primitive::Boolean),
            NodeKind::Binary { op, .. } if is_numeric_binop(*op) => Some(Primitive::Number),
            NodeKind::Binary { op, .. } if is_comparison_binop(*op) => Some(Primitive::Boolean),
            NodeKind::Unary { op: UnaryOp::LogicalNot, .. } => Some(Primitive::Boolean),
            _ => None,
        }
    }

    /// Emits a trailing `Box` if `would_leave_unboxed` says the value
    /// just lowered is an unboxed primitive — used at assignment targets
    /// typed as the universal object slot (bag fields, return values
    /// erased to `any`, argument passing to a dynamically-typed callee).
    pub fn box_if_primitive(&mut self, idx: NodeIndex) {
        if let Some(p) = self.would_leave_unboxed(idx) {
            self.emit(Instr::Box(p));
        }
    }
}

fn is_numeric_binop(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Exponent
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::ShiftLeft
            | BinaryOp::ShiftRight
            | BinaryOp::UnsignedShiftRight
    )
}

fn is_comparison_binop(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::StrictEq
            | BinaryOp::StrictNotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
    )
}

fn map_binop(op: BinaryOp) -> ImgBinOp {
    match op {
        BinaryOp::Add => ImgBinOp::Add,
        BinaryOp::Sub => ImgBinOp::Sub,
        BinaryOp::Mul => ImgBinOp::Mul,
        BinaryOp::Div => ImgBinOp::Div,
        BinaryOp::Mod => ImgBinOp::Mod,
        BinaryOp::Exponent => ImgBinOp::Exponent,
        BinaryOp::Eq => ImgBinOp::Eq,
        BinaryOp::NotEq => ImgBinOp::NotEq,
        BinaryOp::StrictEq => ImgBinOp::StrictEq,
        BinaryOp::StrictNotEq => ImgBinOp::StrictNotEq,
        BinaryOp::Lt => ImgBinOp::Lt,
        BinaryOp::LtEq => ImgBinOp::LtEq,
        BinaryOp::Gt => ImgBinOp::Gt,
        BinaryOp::GtEq => ImgBinOp::GtEq,
        BinaryOp::BitAnd => ImgBinOp::BitAnd,
        BinaryOp::BitOr => ImgBinOp::BitOr,
        BinaryOp::BitXor => ImgBinOp::BitXor,
        BinaryOp::ShiftLeft => ImgBinOp::ShiftLeft,
        BinaryOp::ShiftRight => ImgBinOp::ShiftRight,
        BinaryOp::UnsignedShiftRight => ImgBinOp::UnsignedShiftRight,
        BinaryOp::In => ImgBinOp::In,
        BinaryOp::InstanceOf => ImgBinOp::InstanceOf,
        BinaryOp::Comma => unreachable!("Comma handled directly by lower_binary"),
    }
}

fn map_unop(op: UnaryOp) -> ImgUnOp {
    match op {
        UnaryOp::Plus => ImgUnOp::Pos,
        UnaryOp::Minus => ImgUnOp::Neg,
        UnaryOp::BitNot => ImgUnOp::BitNot,
        UnaryOp::LogicalNot => ImgUnOp::LogicalNot,
        UnaryOp::TypeOf => ImgUnOp::TypeOf,
        UnaryOp::Void => ImgUnOp::Void,
        UnaryOp::Delete => unreachable!("Delete handled directly by lower_unary"),
    }
}

#[cfg(test)]
#[path = "tests/il_emitter.rs"]
mod tests;
