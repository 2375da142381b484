//! Async MoveNext Emitter (component F, §4.6): lowers one async
//! function's, method's, or arrow's body into its state machine's
//! `MoveNext`, reconciling normal control-flow lowering
//! (`il_emitter::LoweringCx`) with a body that can suspend mid-expression.
//!
//! Two ideas carry the module:
//!
//! - **Segment dispatch.** `state` selects which straight-line segment
//!   (delimited by await points) to resume into: a leading switch jumps
//!   to a label marking each segment's first instruction, and every
//!   await point either falls straight through (its awaiter is already
//!   complete) or stores `state = k` and returns, letting a later call
//!   land back on the same label via the switch.
//! - **Forced materialization.** The reference interpreter gives every
//!   `MoveNext` invocation a fresh operand stack (`DESIGN.md`); nothing
//!   can be left on it across a suspension. Any subexpression that
//!   contains an await is lowered in A-normal form — every operand is
//!   evaluated into a local *before* the await that might follow it —
//!   so a resume only ever reloads locals, never a stack value that no
//!   longer exists.
//!
//! A statement with no await anywhere inside it is handed straight to
//! `LoweringCx::lower_stmt`, unmodified and no more expensive than in a
//! plain function body; this module only takes over for the statements
//! and expressions an await actually touches.
//!
//! The whole body runs inside one outer `try`/`catch` that routes every
//! exception to `builder.SetException`, matching a plain function's
//! single deferred-return escape hatch: `return` anywhere (including
//! inside a user `try`) reuses `il_emitter`'s own deferred-return
//! protocol, seeded here with a synthetic outermost frame whose "after"
//! label drives `builder.SetResult` instead of a raw `Ret` (illegal
//! inside this outer region).

use rustc_hash::{FxHashMap, FxHashSet};
use tsil_ast::{BindingName, CatchClause, ForInit, NodeArena, NodeIndex, NodeKind};
use tsil_common::{Atom, Interner};
use tsil_image::{BinOp as ImgBinOp, FieldToken, Instr, LabelId, MetadataBuilder};
use tsil_runtime::RuntimeHandles;

use crate::binding::Binding;
use crate::error::CodegenResult;
use crate::il_emitter::{AsyncExit, DeferredReturn, DispatchMode, LoopCtx, LoweringCx};
use crate::registries::{AsyncMachine, Registries};

/// Extra, MoveNext-only bookkeeping threaded alongside the shared
/// `LoweringCx` for the duration of one body's lowering.
struct AsyncCx<'a, 'b> {
    cx: &'b mut LoweringCx<'a>,
    machine: &'b AsyncMachine,
    next_await: usize,
    resume_labels: Vec<LabelId>,
    /// Local variables whose initializer was a call statically known to
    /// already be awaiter-shaped — so `await thatLocal` later skips the
    /// `$Awaiter.Resolved` wrap (§4.6, "GetAwaiter").
    awaiter_typed: FxHashSet<Atom>,
    /// Locals bound to a freshly constructed nested async arrow's own
    /// machine instance, keyed by the arrow's `NodeIndex` — so a later
    /// `name(...)` call is recognized as driving that machine's
    /// `MoveNext` rather than a normal dynamic dispatch.
    async_arrow_locals: FxHashMap<Atom, NodeIndex>,
}

#[allow(clippy::too_many_arguments)]
pub fn emit_move_next(
    metadata: &mut MetadataBuilder,
    runtime: &RuntimeHandles,
    registries: &Registries,
    arena: &NodeArena,
    interner: &Interner,
    machine: &AsyncMachine,
    body_stmts: &[NodeIndex],
    current_class: Option<Atom>,
    outer_chain: Vec<FieldToken>,
    cell_promoted: &FxHashSet<Atom>,
) -> CodegenResult<()> {
    let move_next = machine.move_next.expect("move_next reserved by build_async_machine");
    let state_field = machine.state_field.expect("state field reserved by build_async_machine");
    let builder_field = machine.builder_field.expect("builder field reserved by build_async_machine");

    let mut cx = LoweringCx::new(metadata, runtime, registries, arena, interner, DispatchMode::AsyncBody, current_class);
    cx.outer_chain = outer_chain;
    cx.this_field = machine.this_field;
    cx.cell_promoted = cell_promoted.clone();

    bind_rehydrated_names(&mut cx, machine, cell_promoted);

    let await_count = machine.awaiter_fields.len();
    let resume_labels: Vec<LabelId> = (0..await_count).map(|_| cx.new_label()).collect();
    let initial_label = cx.new_label();

    // ---- dispatch prologue: state == -1 means "first entry"; 0..K-1
    // resumes directly into the middle of the body at the matching
    // await point's resume label.
    cx.emit(Instr::LoadThis);
    cx.emit(Instr::LoadField(state_field));
    let state_scratch = cx.alloc_local();
    cx.emit(Instr::StoreLocal(state_scratch));
    cx.emit(Instr::LoadLocal(state_scratch));
    cx.emit(Instr::LoadConstNum(-1.0));
    cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
    cx.emit_br_true(initial_label);
    cx.emit(Instr::LoadLocal(state_scratch));
    cx.emit_switch(resume_labels.clone(), initial_label);
    cx.mark_label(initial_label);

    // §4.6 self-boxed trick: a machine with nested async-arrow children
    // stashes a durable handle to itself once, on first entry, so a
    // child arrow's `outer` field always dereferences the same `this`
    // across this machine's own suspensions (`DESIGN.md`).
    if let Some(self_boxed) = machine.self_boxed_field {
        cx.emit(Instr::LoadThis);
        cx.emit(Instr::LoadThis);
        cx.emit(Instr::StoreField(self_boxed));
    }

    let should_return = cx.alloc_local();
    let return_value = cx.alloc_local();
    let common_return_label = cx.new_label();
    cx.deferred = Some(DeferredReturn { should_return, return_value });
    cx.emit(Instr::LoadBool(false));
    cx.emit(Instr::StoreLocal(should_return));
    cx.try_stack.push(common_return_label);
    cx.async_exit = Some(AsyncExit { return_value_local: return_value, common_return_label });

    cx.emit(Instr::BeginTry);

    let mut actx = AsyncCx {
        cx: &mut cx,
        machine,
        next_await: 0,
        resume_labels,
        awaiter_typed: FxHashSet::default(),
        async_arrow_locals: FxHashMap::default(),
    };
    lower_segment_stmts(&mut actx, body_stmts)?;

    // Falling off the end is an implicit `return undefined`.
    cx.emit(Instr::LoadUndefined);
    cx.emit(Instr::StoreLocal(return_value));
    cx.emit(Instr::LoadBool(true));
    cx.emit(Instr::StoreLocal(should_return));
    cx.emit(Instr::EndTry);

    cx.emit(Instr::BeginCatch);
    let exc_local = cx.alloc_local();
    cx.emit(Instr::StoreLocal(exc_local));
    cx.emit(Instr::LoadThis);
    cx.emit(Instr::LoadField(builder_field));
    cx.emit(Instr::LoadLocal(exc_local));
    cx.emit(Instr::CallVirtual(runtime.task_builder_set_exception, 2));
    cx.emit(Instr::RetVoid);
    cx.emit(Instr::EndCatch);

    cx.mark_label(common_return_label);
    let skip = cx.new_label();
    cx.emit(Instr::LoadLocal(should_return));
    cx.emit_br_false(skip);
    cx.emit(Instr::LoadThis);
    cx.emit(Instr::LoadField(builder_field));
    cx.emit(Instr::LoadLocal(return_value));
    cx.emit(Instr::CallVirtual(runtime.task_builder_set_result, 2));
    cx.emit(Instr::RetVoid);
    cx.mark_label(skip);
    cx.emit(Instr::RetVoid);

    let shape = cx.finish();
    metadata.set_method_body(move_next, shape.locals_count, shape.body);
    Ok(())
}

fn bind_rehydrated_names(cx: &mut LoweringCx, machine: &AsyncMachine, cell_promoted: &FxHashSet<Atom>) {
    for (&name, &field) in &machine.hoisted_params {
        let binding = if cell_promoted.contains(&name) {
            Binding::CellField { field, hops: 0 }
        } else {
            Binding::HoistedField { field, hops: 0 }
        };
        cx.symbols.bind(name, binding);
    }
    for (&name, &field) in &machine.hoisted_locals {
        let binding = if cell_promoted.contains(&name) {
            Binding::CellField { field, hops: 0 }
        } else {
            Binding::HoistedField { field, hops: 0 }
        };
        cx.symbols.bind(name, binding);
    }
    for (&name, &field) in &machine.captured_fields {
        cx.symbols.bind(name, Binding::CellField { field, hops: 0 });
    }
}

// ---- await containment scan ----
//
// Under-approximating (missing a deeply nested await) is safe: the
// mis-scanned subtree falls through to `LoweringCx::lower_stmt`/
// `lower_expr`, which itself errors cleanly on a bare `Await` node
// rather than mis-lowering it. Over-approximating just costs a few
// wasted locals. Nested function/arrow bodies are their own lowering
// unit and never searched into.
fn contains_await(arena: &NodeArena, idx: NodeIndex) -> bool {
    match &arena.get(idx).kind {
        NodeKind::Await(_) => true,
        NodeKind::Block(stmts) => stmts.iter().any(|&s| contains_await(arena, s)),
        NodeKind::ExprStmt(e) => contains_await(arena, *e),
        NodeKind::VarDeclStmt { decls, .. } => {
            decls.iter().any(|d| d.initializer.is_some_and(|i| contains_await(arena, i)))
        }
        NodeKind::If { test, consequent, alternate } => {
            contains_await(arena, *test)
                || contains_await(arena, *consequent)
                || alternate.is_some_and(|a| contains_await(arena, a))
        }
        NodeKind::While { test, body } | NodeKind::DoWhile { body, test } => {
            contains_await(arena, *test) || contains_await(arena, *body)
        }
        NodeKind::For { init, test, update, body } => {
            let init_has = match init {
                ForInit::VarDecl { decls, .. } => {
                    decls.iter().any(|d| d.initializer.is_some_and(|i| contains_await(arena, i)))
                }
                ForInit::Expr(e) => contains_await(arena, *e),
                ForInit::None => false,
            };
            init_has
                || test.is_some_and(|t| contains_await(arena, t))
                || update.is_some_and(|u| contains_await(arena, u))
                || contains_await(arena, *body)
        }
        NodeKind::ForOf { iterable, body, .. } => {
            contains_await(arena, *iterable) || contains_await(arena, *body)
        }
        NodeKind::ForIn { object, body, .. } => {
            contains_await(arena, *object) || contains_await(arena, *body)
        }
        NodeKind::Switch { discriminant, cases } => {
            contains_await(arena, *discriminant)
                || cases.iter().any(|c| {
                    c.test.is_some_and(|t| contains_await(arena, t))
                        || c.body.iter().any(|&s| contains_await(arena, s))
                })
        }
        NodeKind::Try { block, catch, finally } => {
            contains_await(arena, *block)
                || catch.as_ref().is_some_and(|c| contains_await(arena, c.body))
                || finally.is_some_and(|f| contains_await(arena, f))
        }
        NodeKind::Throw(e) => contains_await(arena, *e),
        NodeKind::Return(Some(e)) => contains_await(arena, *e),
        NodeKind::Labeled { body, .. } => contains_await(arena, *body),
        NodeKind::ExportDefault(e) => contains_await(arena, *e),
        NodeKind::ExportDecl(inner) => contains_await(arena, *inner),
        NodeKind::TemplateLiteral { exprs, tag, .. } => {
            exprs.iter().any(|&e| contains_await(arena, e)) || tag.is_some_and(|t| contains_await(arena, t))
        }
        NodeKind::ArrayLiteral(elems) => elems.iter().any(|&e| contains_await(arena, e)),
        NodeKind::ObjectLiteral(props) => props.iter().any(|p| contains_await(arena, p.value)),
        NodeKind::SpreadElement(inner)
        | NodeKind::Grouping(inner)
        | NodeKind::NonNullAssertion(inner)
        | NodeKind::TypeAssertion(inner)
        | NodeKind::Satisfies(inner) => contains_await(arena, *inner),
        NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
            contains_await(arena, *left) || contains_await(arena, *right)
        }
        NodeKind::Unary { operand, .. } | NodeKind::UpdateExpr { operand, .. } => contains_await(arena, *operand),
        NodeKind::Assign { target, value, .. } => contains_await(arena, *target) || contains_await(arena, *value),
        NodeKind::Conditional { test, consequent, alternate } => {
            contains_await(arena, *test) || contains_await(arena, *consequent) || contains_await(arena, *alternate)
        }
        NodeKind::Call { callee, args, .. } | NodeKind::New { callee, args } => {
            contains_await(arena, *callee) || args.iter().any(|&a| contains_await(arena, a))
        }
        NodeKind::PropertyAccess { object, .. } => contains_await(arena, *object),
        NodeKind::IndexAccess { object, index, .. } => contains_await(arena, *object) || contains_await(arena, *index),
        NodeKind::Yield { argument, .. } => argument.is_some_and(|a| contains_await(arena, a)),
        NodeKind::DynamicImport(e) => contains_await(arena, *e),
        _ => false,
    }
}

// ---- statement lowering ----

fn lower_segment_stmts(actx: &mut AsyncCx, stmts: &[NodeIndex]) -> CodegenResult<()> {
    for &s in stmts {
        if contains_await(actx.cx.arena, s) {
            lower_one_stmt_async(actx, s)?;
        } else {
            actx.cx.lower_stmt(s)?;
        }
    }
    Ok(())
}

fn lower_block_async(actx: &mut AsyncCx, idx: NodeIndex) -> CodegenResult<()> {
    actx.cx.symbols.push_scope();
    let result = match actx.cx.arena.get(idx).kind.clone() {
        NodeKind::Block(stmts) => lower_segment_stmts(actx, &stmts),
        _ if contains_await(actx.cx.arena, idx) => lower_one_stmt_async(actx, idx),
        _ => actx.cx.lower_stmt(idx),
    };
    actx.cx.symbols.pop_scope();
    result
}

fn lower_one_stmt_async(actx: &mut AsyncCx, idx: NodeIndex) -> CodegenResult<()> {
    let kind = actx.cx.arena.get(idx).kind.clone();
    match kind {
        NodeKind::Block(stmts) => {
            actx.cx.symbols.push_scope();
            lower_segment_stmts(actx, &stmts)?;
            actx.cx.symbols.pop_scope();
        }
        NodeKind::ExprStmt(e) => {
            lower_async_expr(actx, e)?;
            actx.cx.emit(Instr::Pop);
        }
        NodeKind::VarDeclStmt { decls, .. } => {
            for d in decls {
                lower_async_var_declarator(actx, d.name, d.initializer)?;
            }
        }
        NodeKind::If { test, consequent, alternate } => {
            let else_label = actx.cx.new_label();
            let end_label = actx.cx.new_label();
            lower_async_expr(actx, test)?;
            actx.cx.emit_br_false(else_label);
            lower_block_async(actx, consequent)?;
            actx.cx.emit_br(end_label);
            actx.cx.mark_label(else_label);
            if let Some(a) = alternate {
                lower_block_async(actx, a)?;
            }
            actx.cx.mark_label(end_label);
        }
        NodeKind::While { test, body } => {
            let top = actx.cx.new_label();
            let end = actx.cx.new_label();
            actx.cx.mark_label(top);
            lower_async_expr(actx, test)?;
            actx.cx.emit_br_false(end);
            actx.cx.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: top });
            lower_block_async(actx, body)?;
            actx.cx.loop_stack.pop();
            actx.cx.emit_br(top);
            actx.cx.mark_label(end);
        }
        NodeKind::DoWhile { body, test } => {
            let top = actx.cx.new_label();
            let cont = actx.cx.new_label();
            let end = actx.cx.new_label();
            actx.cx.mark_label(top);
            actx.cx.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
            lower_block_async(actx, body)?;
            actx.cx.loop_stack.pop();
            actx.cx.mark_label(cont);
            lower_async_expr(actx, test)?;
            actx.cx.emit_br_true(top);
            actx.cx.mark_label(end);
        }
        NodeKind::For { init, test, update, body } => {
            actx.cx.symbols.push_scope();
            match init {
                ForInit::VarDecl { decls, .. } => {
                    for d in decls {
                        lower_async_var_declarator(actx, d.name, d.initializer)?;
                    }
                }
                ForInit::Expr(e) => {
                    lower_async_expr(actx, e)?;
                    actx.cx.emit(Instr::Pop);
                }
                ForInit::None => {}
            }
            let top = actx.cx.new_label();
            let cont = actx.cx.new_label();
            let end = actx.cx.new_label();
            actx.cx.mark_label(top);
            if let Some(t) = test {
                lower_async_expr(actx, t)?;
                actx.cx.emit_br_false(end);
            }
            actx.cx.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
            lower_block_async(actx, body)?;
            actx.cx.loop_stack.pop();
            actx.cx.mark_label(cont);
            if let Some(u) = update {
                lower_async_expr(actx, u)?;
                actx.cx.emit(Instr::Pop);
            }
            actx.cx.emit_br(top);
            actx.cx.mark_label(end);
            actx.cx.symbols.pop_scope();
        }
        NodeKind::ForOf { name, iterable, body, .. } => lower_for_of_async(actx, name, iterable, body)?,
        NodeKind::ForIn { name, object, body, .. } => lower_for_in_async(actx, name, object, body)?,
        NodeKind::Switch { discriminant, cases } => lower_switch_async(actx, discriminant, &cases)?,
        NodeKind::Try { block, catch, finally } => lower_try_async(actx, block, catch, finally)?,
        NodeKind::Throw(e) => {
            lower_async_expr(actx, e)?;
            actx.cx.emit(Instr::Throw);
        }
        NodeKind::Return(expr) => {
            match expr {
                Some(e) => lower_async_expr(actx, e)?,
                None => actx.cx.emit(Instr::LoadUndefined),
            }
            let d = actx.cx.deferred.as_ref().expect("deferred state seeded by emit_move_next");
            let return_value = d.return_value;
            let should_return = d.should_return;
            actx.cx.emit(Instr::StoreLocal(return_value));
            actx.cx.emit(Instr::LoadBool(true));
            actx.cx.emit(Instr::StoreLocal(should_return));
            let target = *actx.cx.try_stack.last().expect("synthetic outer frame always present");
            actx.cx.emit_br(target);
        }
        NodeKind::Labeled { label, body } => {
            let end = actx.cx.new_label();
            match actx.cx.arena.get(body).kind.clone() {
                NodeKind::While { .. } | NodeKind::DoWhile { .. } | NodeKind::For { .. }
                | NodeKind::ForOf { .. } | NodeKind::ForIn { .. } => {
                    actx.cx.loop_stack.push(LoopCtx { label: Some(label), break_label: end, continue_label: end });
                    let depth = actx.cx.loop_stack.len();
                    lower_one_stmt_async(actx, body)?;
                    if actx.cx.loop_stack.len() >= depth {
                        actx.cx.loop_stack.truncate(depth - 1);
                    }
                }
                _ => lower_one_stmt_async(actx, body)?,
            }
            actx.cx.mark_label(end);
        }
        NodeKind::ExportDefault(e) => {
            lower_async_expr(actx, e)?;
            actx.cx.emit(Instr::Pop);
        }
        NodeKind::ExportDecl(inner) => lower_one_stmt_async(actx, inner)?,
        // Break/Continue/Empty/declarations never carry an await
        // themselves; they only ever appear here because a sibling in
        // the same segment does, so plain lowering is always safe.
        _ => actx.cx.lower_stmt(idx)?,
    }
    Ok(())
}

fn lower_async_var_declarator(
    actx: &mut AsyncCx,
    name: BindingName,
    initializer: Option<NodeIndex>,
) -> CodegenResult<()> {
    let BindingName::Identifier(name) = name else {
        // Destructuring declarations: out of scope for await-aware
        // lowering too, mirroring `LoweringCx::lower_stmt`'s own
        // simplification.
        if let Some(init) = initializer {
            lower_async_expr(actx, init)?;
            actx.cx.emit(Instr::Pop);
        }
        return Ok(());
    };

    if let Some(init) = initializer {
        if let NodeKind::Arrow(_) = &actx.cx.arena.get(init).kind {
            if actx.cx.registries.async_arrows.contains_key(&init) {
                let slot = construct_nested_async_arrow(actx, init)?;
                actx.cx.symbols.bind(name, Binding::Local(slot));
                actx.async_arrow_locals.insert(name, init);
                return Ok(());
            }
        }
        let is_awaiter_shaped = is_known_awaiter_shaped(actx, init);
        lower_async_expr(actx, init)?;
        match actx.cx.symbols.resolve(name) {
            Some(Binding::HoistedField { field, hops }) => {
                let scratch = actx.cx.alloc_local();
                actx.cx.emit(Instr::StoreLocal(scratch));
                actx.cx.emit_field_chain_store_prefix(hops);
                actx.cx.emit(Instr::LoadLocal(scratch));
                actx.cx.emit(Instr::StoreField(field));
            }
            Some(Binding::CellField { field, hops }) => {
                let scratch = actx.cx.alloc_local();
                actx.cx.emit(Instr::StoreLocal(scratch));
                actx.cx.emit_field_chain_store_prefix(hops);
                actx.cx.emit(Instr::LoadField(field));
                actx.cx.emit(Instr::LoadLocal(scratch));
                actx.cx.emit(Instr::StoreField(actx.cx.runtime.cell_value_field));
            }
            _ => {
                let slot = actx.cx.alloc_local();
                actx.cx.emit(Instr::StoreLocal(slot));
                actx.cx.symbols.bind(name, Binding::Local(slot));
            }
        }
        if is_awaiter_shaped {
            actx.awaiter_typed.insert(name);
        }
    } else {
        actx.cx.emit(Instr::LoadUndefined);
        let slot = actx.cx.alloc_local();
        actx.cx.emit(Instr::StoreLocal(slot));
        actx.cx.symbols.bind(name, Binding::Local(slot));
    }
    Ok(())
}

fn lower_for_of_async(actx: &mut AsyncCx, name: Atom, iterable: NodeIndex, body: NodeIndex) -> CodegenResult<()> {
    actx.cx.symbols.push_scope();
    let arr_local = lower_async_expr_to_local(actx, iterable)?;
    let i_local = actx.cx.alloc_local();
    actx.cx.emit(Instr::LoadConstNum(0.0));
    actx.cx.emit(Instr::StoreLocal(i_local));

    let top = actx.cx.new_label();
    let cont = actx.cx.new_label();
    let end = actx.cx.new_label();
    actx.cx.mark_label(top);
    actx.cx.emit(Instr::LoadLocal(i_local));
    actx.cx.emit(Instr::LoadLocal(arr_local));
    actx.cx.emit(Instr::ArrayLen);
    actx.cx.emit(Instr::BinOp(ImgBinOp::Lt));
    actx.cx.emit_br_false(end);

    actx.cx.emit(Instr::LoadLocal(arr_local));
    actx.cx.emit(Instr::LoadLocal(i_local));
    actx.cx.emit(Instr::LoadIndex);
    let item_local = actx.cx.alloc_local();
    actx.cx.emit(Instr::StoreLocal(item_local));

    // A loop variable hoisted because this body contains an await (the
    // analysis's `forced_hoist`) writes through the existing field
    // binding seeded by `bind_rehydrated_names` rather than shadowing
    // it with a fresh, non-surviving local.
    match actx.cx.symbols.resolve(name) {
        Some(Binding::HoistedField { field, hops }) => {
            actx.cx.emit_field_chain_store_prefix(hops);
            actx.cx.emit(Instr::LoadLocal(item_local));
            actx.cx.emit(Instr::StoreField(field));
        }
        Some(Binding::CellField { field, hops }) => {
            actx.cx.emit_field_chain_load(field, hops);
            actx.cx.emit(Instr::LoadLocal(item_local));
            actx.cx.emit(Instr::StoreField(actx.cx.runtime.cell_value_field));
        }
        _ => actx.cx.symbols.bind(name, Binding::Local(item_local)),
    }

    actx.cx.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
    lower_block_async(actx, body)?;
    actx.cx.loop_stack.pop();

    actx.cx.mark_label(cont);
    actx.cx.emit(Instr::LoadLocal(i_local));
    actx.cx.emit(Instr::LoadConstNum(1.0));
    actx.cx.emit(Instr::BinOp(ImgBinOp::Add));
    actx.cx.emit(Instr::StoreLocal(i_local));
    actx.cx.emit_br(top);
    actx.cx.mark_label(end);
    actx.cx.symbols.pop_scope();
    Ok(())
}

fn lower_for_in_async(actx: &mut AsyncCx, name: Atom, object: NodeIndex, body: NodeIndex) -> CodegenResult<()> {
    actx.cx.symbols.push_scope();
    lower_async_expr(actx, object)?;
    actx.cx.emit(Instr::Pop);
    let key_local = actx.cx.alloc_local();
    actx.cx.emit(Instr::LoadUndefined);
    actx.cx.emit(Instr::StoreLocal(key_local));
    actx.cx.symbols.bind(name, Binding::Local(key_local));
    let end = actx.cx.new_label();
    let cont = actx.cx.new_label();
    actx.cx.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: cont });
    lower_block_async(actx, body)?;
    actx.cx.loop_stack.pop();
    actx.cx.mark_label(cont);
    actx.cx.mark_label(end);
    actx.cx.symbols.pop_scope();
    Ok(())
}

fn lower_switch_async(actx: &mut AsyncCx, discriminant: NodeIndex, cases: &[tsil_ast::SwitchCase]) -> CodegenResult<()> {
    let disc_local = lower_async_expr_to_local(actx, discriminant)?;

    let end = actx.cx.new_label();
    let mut case_labels = Vec::with_capacity(cases.len());
    for _ in cases {
        case_labels.push(actx.cx.new_label());
    }
    let mut default_index = None;
    for (i, case) in cases.iter().enumerate() {
        match case.test {
            Some(test) => {
                actx.cx.emit(Instr::LoadLocal(disc_local));
                lower_async_expr(actx, test)?;
                actx.cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
                actx.cx.emit_br_true(case_labels[i]);
            }
            None => default_index = Some(i),
        }
    }
    match default_index {
        Some(i) => actx.cx.emit_br(case_labels[i]),
        None => actx.cx.emit_br(end),
    }

    actx.cx.loop_stack.push(LoopCtx { label: None, break_label: end, continue_label: end });
    for (i, case) in cases.iter().enumerate() {
        actx.cx.mark_label(case_labels[i]);
        lower_segment_stmts(actx, &case.body)?;
    }
    actx.cx.loop_stack.pop();
    actx.cx.mark_label(end);
    Ok(())
}

fn lower_try_async(
    actx: &mut AsyncCx,
    block: NodeIndex,
    catch: Option<CatchClause>,
    finally: Option<NodeIndex>,
) -> CodegenResult<()> {
    let after = actx.cx.new_label();
    actx.cx.try_stack.push(after);

    actx.cx.emit(Instr::BeginTry);
    lower_block_async(actx, block)?;
    actx.cx.emit(Instr::EndTry);

    if let Some(CatchClause { param, body }) = catch {
        actx.cx.emit(Instr::BeginCatch);
        actx.cx.symbols.push_scope();
        match param {
            Some(name) => {
                let slot = actx.cx.alloc_local();
                actx.cx.emit(Instr::StoreLocal(slot));
                actx.cx.symbols.bind(name, Binding::Local(slot));
            }
            None => actx.cx.emit(Instr::Pop),
        }
        lower_block_async(actx, body)?;
        actx.cx.symbols.pop_scope();
        actx.cx.emit(Instr::EndCatch);
    }
    if let Some(f) = finally {
        actx.cx.emit(Instr::BeginFinally);
        lower_block_async(actx, f)?;
        actx.cx.emit(Instr::EndFinally);
    }

    actx.cx.try_stack.pop();
    actx.cx.mark_label(after);

    let d_should_return = actx.cx.deferred.as_ref().unwrap().should_return;
    let skip = actx.cx.new_label();
    actx.cx.emit(Instr::LoadLocal(d_should_return));
    actx.cx.emit_br_false(skip);
    let outer = *actx.cx.try_stack.last().expect("synthetic outer frame always present");
    actx.cx.emit_br(outer);
    actx.cx.mark_label(skip);
    Ok(())
}

// ---- expression lowering ----

/// Lowers `idx`, leaving exactly one value on the stack — the
/// await-aware counterpart of `LoweringCx::lower_expr`. Delegates
/// wholesale to the plain lowerer for any subtree with no await inside.
fn lower_async_expr(actx: &mut AsyncCx, idx: NodeIndex) -> CodegenResult<()> {
    if !contains_await(actx.cx.arena, idx) {
        return actx.cx.lower_expr(idx);
    }

    let kind = actx.cx.arena.get(idx).kind.clone();
    match kind {
        NodeKind::Await(inner) => lower_await(actx, inner),
        NodeKind::Grouping(inner)
        | NodeKind::NonNullAssertion(inner)
        | NodeKind::TypeAssertion(inner)
        | NodeKind::Satisfies(inner)
        | NodeKind::SpreadElement(inner) => lower_async_expr(actx, inner),
        NodeKind::Binary { op, left, right } if op != tsil_ast::ops::BinaryOp::Comma => {
            let l = lower_async_expr_to_local(actx, left)?;
            let r = lower_async_expr_to_local(actx, right)?;
            actx.cx.emit(Instr::LoadLocal(l));
            actx.cx.emit(Instr::LoadLocal(r));
            actx.cx.emit(Instr::BinOp(map_binop(op)));
            Ok(())
        }
        NodeKind::Binary { left, right, .. } => {
            lower_async_expr(actx, left)?;
            actx.cx.emit(Instr::Pop);
            lower_async_expr(actx, right)
        }
        NodeKind::Logical { op, left, right } => {
            // Locals rather than stack `Dup`/`Pop` tricks for the
            // short-circuit value: simpler to get right once every
            // operand already has to be ANF-materialized anyway.
            let end = actx.cx.new_label();
            let l = lower_async_expr_to_local(actx, left)?;
            let result = actx.cx.alloc_local();
            actx.cx.emit(Instr::LoadLocal(l));
            actx.cx.emit(Instr::StoreLocal(result));
            match op {
                tsil_ast::ops::LogicalOp::And => {
                    actx.cx.emit(Instr::LoadLocal(l));
                    actx.cx.emit_br_false(end);
                }
                tsil_ast::ops::LogicalOp::Or => {
                    actx.cx.emit(Instr::LoadLocal(l));
                    actx.cx.emit_br_true(end);
                }
                tsil_ast::ops::LogicalOp::NullishCoalesce => {
                    actx.cx.emit(Instr::LoadLocal(l));
                    actx.cx.emit(Instr::LoadNull);
                    actx.cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
                    let is_nullish = actx.cx.new_label();
                    actx.cx.emit_br_true(is_nullish);
                    actx.cx.emit(Instr::LoadLocal(l));
                    actx.cx.emit(Instr::LoadUndefined);
                    actx.cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
                    actx.cx.emit_br_true(is_nullish);
                    actx.cx.emit_br(end);
                    actx.cx.mark_label(is_nullish);
                }
            }
            let r = lower_async_expr_to_local(actx, right)?;
            actx.cx.emit(Instr::LoadLocal(r));
            actx.cx.emit(Instr::StoreLocal(result));
            actx.cx.mark_label(end);
            actx.cx.emit(Instr::LoadLocal(result));
            Ok(())
        }
        NodeKind::Conditional { test, consequent, alternate } => {
            let else_label = actx.cx.new_label();
            let end_label = actx.cx.new_label();
            lower_async_expr(actx, test)?;
            actx.cx.emit_br_false(else_label);
            lower_async_expr(actx, consequent)?;
            actx.cx.emit_br(end_label);
            actx.cx.mark_label(else_label);
            lower_async_expr(actx, alternate)?;
            actx.cx.mark_label(end_label);
            Ok(())
        }
        NodeKind::Unary { op: tsil_ast::ops::UnaryOp::Delete, operand } => {
            if let NodeKind::PropertyAccess { object, name, .. } = actx.cx.arena.get(operand).kind.clone() {
                let obj_local = lower_async_expr_to_local(actx, object)?;
                let text = actx.cx.interner.resolve(name).to_string();
                let tok = actx.cx.intern_str(&text);
                actx.cx.emit(Instr::LoadLocal(obj_local));
                actx.cx.emit(Instr::LoadNull);
                actx.cx.emit(Instr::StoreBagProp(tok));
            }
            actx.cx.emit(Instr::LoadBool(true));
            Ok(())
        }
        NodeKind::Unary { op, operand } => {
            let slot = lower_async_expr_to_local(actx, operand)?;
            actx.cx.emit(Instr::LoadLocal(slot));
            actx.cx.emit(Instr::UnOp(map_unop(op)));
            Ok(())
        }
        NodeKind::Assign { op, target, value } if op == tsil_ast::ops::AssignOp::Assign => {
            let slot = lower_async_expr_to_local(actx, value)?;
            actx.cx.emit(Instr::LoadLocal(slot));
            actx.cx.store_to_target(target)?;
            actx.cx.emit(Instr::LoadLocal(slot));
            Ok(())
        }
        NodeKind::Assign { op, target, value } => {
            // Compound assignment (`+=`, `&&=`, ...) with an await on
            // either side: materialize both operands first (ANF), then
            // replay the same combine-and-store shape
            // `LoweringCx::lower_assign` uses for the non-async case.
            match op.as_binary_op() {
                Some(bin) => {
                    let t = lower_async_expr_to_local(actx, target)?;
                    let v = lower_async_expr_to_local(actx, value)?;
                    actx.cx.emit(Instr::LoadLocal(t));
                    actx.cx.emit(Instr::LoadLocal(v));
                    actx.cx.emit(Instr::BinOp(map_binop(bin)));
                    let result = actx.cx.alloc_local();
                    actx.cx.emit(Instr::StoreLocal(result));
                    actx.cx.emit(Instr::LoadLocal(result));
                    actx.cx.store_to_target(target)?;
                    actx.cx.emit(Instr::LoadLocal(result));
                }
                None => {
                    // Logical assignment: short-circuits, so the value
                    // side must only be evaluated (and only then
                    // possibly await) when the target doesn't already
                    // decide the outcome.
                    let end = actx.cx.new_label();
                    let t = lower_async_expr_to_local(actx, target)?;
                    let result = actx.cx.alloc_local();
                    actx.cx.emit(Instr::LoadLocal(t));
                    actx.cx.emit(Instr::StoreLocal(result));
                    match op {
                        tsil_ast::ops::AssignOp::LogicalAndAssign => {
                            actx.cx.emit(Instr::LoadLocal(t));
                            actx.cx.emit_br_false(end);
                        }
                        tsil_ast::ops::AssignOp::LogicalOrAssign => {
                            actx.cx.emit(Instr::LoadLocal(t));
                            actx.cx.emit_br_true(end);
                        }
                        tsil_ast::ops::AssignOp::NullishAssign => {
                            actx.cx.emit(Instr::LoadLocal(t));
                            actx.cx.emit(Instr::LoadNull);
                            actx.cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
                            let is_nullish = actx.cx.new_label();
                            actx.cx.emit_br_true(is_nullish);
                            actx.cx.emit(Instr::LoadLocal(t));
                            actx.cx.emit(Instr::LoadUndefined);
                            actx.cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
                            actx.cx.emit_br_true(is_nullish);
                            actx.cx.emit_br(end);
                            actx.cx.mark_label(is_nullish);
                        }
                        _ => unreachable!("non-short-circuit op handled above"),
                    }
                    let v = lower_async_expr_to_local(actx, value)?;
                    actx.cx.emit(Instr::LoadLocal(v));
                    actx.cx.emit(Instr::StoreLocal(result));
                    actx.cx.emit(Instr::LoadLocal(result));
                    actx.cx.store_to_target(target)?;
                    actx.cx.mark_label(end);
                    actx.cx.emit(Instr::LoadLocal(result));
                }
            }
            Ok(())
        }
        NodeKind::Call { callee, args, optional } => lower_async_call(actx, callee, &args, optional),
        NodeKind::New { callee, args } => {
            let (arg_locals, spread) = lower_async_call_args(actx, &args)?;
            lower_new_with_locals(actx, callee, &arg_locals, spread)
        }
        NodeKind::PropertyAccess { object, name, optional } => {
            let obj_local = lower_async_expr_to_local(actx, object)?;
            actx.cx.emit(Instr::LoadLocal(obj_local));
            let text = actx.cx.interner.resolve(name).to_string();
            let tok = actx.cx.intern_str(&text);
            if optional {
                actx.cx.emit(Instr::Dup);
                actx.cx.emit(Instr::LoadNull);
                actx.cx.emit(Instr::BinOp(ImgBinOp::StrictEq));
                let short = actx.cx.new_label();
                let end = actx.cx.new_label();
                actx.cx.emit_br_true(short);
                actx.cx.emit(Instr::LoadBagProp(tok));
                actx.cx.emit_br(end);
                actx.cx.mark_label(short);
                actx.cx.emit(Instr::Pop);
                actx.cx.emit(Instr::LoadUndefined);
                actx.cx.mark_label(end);
            } else {
                actx.cx.emit(Instr::LoadBagProp(tok));
            }
            Ok(())
        }
        NodeKind::IndexAccess { object, index, .. } => {
            let obj_local = lower_async_expr_to_local(actx, object)?;
            let idx_local = lower_async_expr_to_local(actx, index)?;
            actx.cx.emit(Instr::LoadLocal(obj_local));
            actx.cx.emit(Instr::LoadLocal(idx_local));
            actx.cx.emit(Instr::LoadIndex);
            Ok(())
        }
        NodeKind::ArrayLiteral(elems) => {
            let locals: Vec<u16> =
                elems.iter().map(|&e| lower_async_expr_to_local(actx, e)).collect::<CodegenResult<_>>()?;
            for l in &locals {
                actx.cx.emit(Instr::LoadLocal(*l));
            }
            actx.cx.emit(Instr::NewArray(locals.len() as u16));
            Ok(())
        }
        NodeKind::TemplateLiteral { quasis, exprs, tag: None } => {
            let locals: Vec<u16> =
                exprs.iter().map(|&e| lower_async_expr_to_local(actx, e)).collect::<CodegenResult<_>>()?;
            let empty = actx.cx.intern_str("");
            actx.cx.emit(Instr::LoadConstStr(empty));
            for (i, q) in quasis.iter().enumerate() {
                let text = actx.cx.interner.resolve(*q).to_string();
                let tok = actx.cx.intern_str(&text);
                actx.cx.emit(Instr::LoadConstStr(tok));
                actx.cx.emit(Instr::CallStatic(actx.cx.runtime.string_concat, 2));
                if let Some(&l) = locals.get(i) {
                    actx.cx.emit(Instr::LoadLocal(l));
                    actx.cx.emit(Instr::CallStatic(actx.cx.runtime.string_concat, 2));
                }
            }
            Ok(())
        }
        // Anything else that was conservatively flagged as containing an
        // await (tagged templates, object literals, destructuring
        // assignment targets, update-expression operands, delete) but
        // isn't specially handled above: fall back to the plain lowerer,
        // which surfaces a clean diagnostic if an `Await` is genuinely
        // reachable from here rather than silently mis-compiling it.
        _ => actx.cx.lower_expr(idx),
    }
}

/// Materializes each of `args` into a local the same way the call sites
/// in this module already do, except a spread argument materializes its
/// inner expression (assumed array-shaped) rather than the spread node
/// itself. Returns each local paired with whether it holds a spread
/// source, plus the index of the first spread argument if any —
/// mirroring `LoweringCx::lower_call_args`'s `Option<leading>` contract
/// so a caller can choose between a plain fixed-argc call opcode and
/// `CallSpread`/`CallDynamicSpread`.
fn lower_async_call_args(actx: &mut AsyncCx, args: &[NodeIndex]) -> CodegenResult<(Vec<(u16, bool)>, Option<u16>)> {
    let spread_at = args
        .iter()
        .position(|&a| matches!(actx.cx.arena.get(a).kind, NodeKind::SpreadElement(_)))
        .map(|p| p as u16);
    let mut locals = Vec::with_capacity(args.len());
    for &a in args {
        match actx.cx.arena.get(a).kind.clone() {
            NodeKind::SpreadElement(inner) => locals.push((lower_async_expr_to_local(actx, inner)?, true)),
            _ => locals.push((lower_async_expr_to_local(actx, a)?, false)),
        }
    }
    Ok((locals, spread_at))
}

/// Pushes the locals `lower_async_call_args` materialized onto the
/// evaluation stack, in the layout a fixed-argc or spread call opcode
/// expects: every local as-is if `spread` is `None`, or the leading
/// locals individually followed by one array (built via `ArrayConcat`,
/// folding each remaining local in, wrapping a non-spread one in a
/// fresh single-element array first) if `spread` is `Some(leading)`.
fn push_async_call_args(actx: &mut AsyncCx, locals: &[(u16, bool)], spread: Option<u16>) {
    let Some(leading) = spread else {
        for &(l, _) in locals {
            actx.cx.emit(Instr::LoadLocal(l));
        }
        return;
    };
    for &(l, _) in &locals[..leading as usize] {
        actx.cx.emit(Instr::LoadLocal(l));
    }
    actx.cx.emit(Instr::NewArray(0));
    for &(l, is_spread) in &locals[leading as usize..] {
        actx.cx.emit(Instr::LoadLocal(l));
        if !is_spread {
            actx.cx.emit(Instr::NewArray(1));
        }
        actx.cx.emit(Instr::ArrayConcat);
    }
}

fn lower_new_with_locals(
    actx: &mut AsyncCx,
    callee: NodeIndex,
    arg_locals: &[(u16, bool)],
    spread: Option<u16>,
) -> CodegenResult<()> {
    let class_name = match &actx.cx.arena.get(callee).kind {
        NodeKind::Identifier(n) => Some(*n),
        _ => None,
    };
    let Some(class_name) = class_name else {
        actx.cx.emit(Instr::LoadNull);
        return Ok(());
    };
    let Some(info) = actx.cx.registries.classes.get(&class_name) else {
        actx.cx.emit(Instr::LoadNull);
        return Ok(());
    };
    let Some(type_token) = info.type_token else {
        actx.cx.emit(Instr::LoadNull);
        return Ok(());
    };
    actx.cx.emit(Instr::NewObj(type_token, 0));
    if let Some(ctor) = info.ctor {
        actx.cx.emit(Instr::Dup);
        push_async_call_args(actx, arg_locals, spread);
        match spread {
            None => actx.cx.emit(Instr::CallDirect(ctor, arg_locals.len() as u16 + 1)),
            Some(leading) => actx.cx.emit(Instr::CallSpread(ctor, leading + 1)),
        }
        actx.cx.emit(Instr::Pop);
    }
    Ok(())
}

/// Materializes `idx` into a fresh local via `lower_async_expr`,
/// returning the slot. The ANF workhorse: every operand of a composite
/// expression that straddles an await goes through this before the
/// operands are recombined, so nothing is ever left on the evaluation
/// stack across a suspension.
fn lower_async_expr_to_local(actx: &mut AsyncCx, idx: NodeIndex) -> CodegenResult<u16> {
    lower_async_expr(actx, idx)?;
    let slot = actx.cx.alloc_local();
    actx.cx.emit(Instr::StoreLocal(slot));
    Ok(slot)
}

fn lower_await(actx: &mut AsyncCx, inner: NodeIndex) -> CodegenResult<()> {
    let already_awaiter = is_known_awaiter_shaped(actx, inner);
    lower_async_expr(actx, inner)?;
    if !already_awaiter {
        actx.cx.box_if_primitive(inner);
    }
    let value_local = actx.cx.alloc_local();
    actx.cx.emit(Instr::StoreLocal(value_local));

    let awaiter_local = actx.cx.alloc_local();
    if already_awaiter {
        actx.cx.emit(Instr::LoadLocal(value_local));
        actx.cx.emit(Instr::StoreLocal(awaiter_local));
    } else {
        actx.cx.emit(Instr::LoadLocal(value_local));
        actx.cx.emit(Instr::CallStatic(actx.cx.runtime.awaiter_resolved, 1));
        actx.cx.emit(Instr::StoreLocal(awaiter_local));
    }

    let k = actx.next_await;
    actx.next_await += 1;
    let field = actx.machine.awaiter_fields[k];
    let state_field = actx.machine.state_field.unwrap();
    let builder_field = actx.machine.builder_field.unwrap();
    let resume_label = actx.resume_labels[k];

    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::LoadLocal(awaiter_local));
    actx.cx.emit(Instr::StoreField(field));

    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::LoadField(field));
    actx.cx.emit(Instr::CallVirtual(actx.cx.runtime.awaiter_get_is_completed, 1));
    actx.cx.emit_br_true(resume_label);

    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::LoadConstNum(k as f64));
    actx.cx.emit(Instr::StoreField(state_field));
    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::LoadField(builder_field));
    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::LoadField(field));
    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::CallVirtual(actx.cx.runtime.task_builder_await_unsafe_on_completed, 3));
    actx.cx.emit(Instr::RetVoid);

    actx.cx.mark_label(resume_label);
    actx.cx.emit(Instr::LoadThis);
    actx.cx.emit(Instr::LoadField(field));
    actx.cx.emit(Instr::CallVirtual(actx.cx.runtime.awaiter_get_result, 1));
    Ok(())
}

/// Best-effort static check for whether `idx` already evaluates to an
/// `$Awaiter` (an async function/method call, or a local previously
/// bound to one) rather than a plain value that still needs
/// `$Awaiter.Resolved` wrapping (`DESIGN.md`'s note on `GetAwaiter`).
fn is_known_awaiter_shaped(actx: &AsyncCx, idx: NodeIndex) -> bool {
    match &actx.cx.arena.get(idx).kind {
        NodeKind::Identifier(name) => actx.awaiter_typed.contains(name) || actx.async_arrow_locals.contains_key(name),
        NodeKind::Call { callee, .. } => match &actx.cx.arena.get(*callee).kind {
            NodeKind::Identifier(name) => {
                actx.async_arrow_locals.contains_key(name)
                    || actx.cx.registries.functions.get(name).is_some_and(|f| f.is_async)
            }
            NodeKind::PropertyAccess { object, name, .. } => {
                let class = match &actx.cx.arena.get(*object).kind {
                    NodeKind::ThisExpr => actx.cx.current_class,
                    NodeKind::New { callee, .. } => match &actx.cx.arena.get(*callee).kind {
                        NodeKind::Identifier(n) => Some(*n),
                        _ => None,
                    },
                    _ => None,
                };
                class.is_some_and(|c| {
                    actx.cx.registries.classes.get(&c).is_some_and(|ci| ci.async_methods.contains(name))
                })
            }
            _ => false,
        },
        _ => false,
    }
}

/// Constructs and wires a nested async arrow's machine instance inline
/// (no separate entry-stub method — unlike a top-level async function,
/// which the driver gives a real entry stub, a nested arrow's machine
/// is only ever driven from right here), returning the local slot
/// holding it.
fn construct_nested_async_arrow(actx: &mut AsyncCx, arrow: NodeIndex) -> CodegenResult<u16> {
    let inner_machine = actx
        .cx
        .registries
        .async_arrows
        .get(&arrow)
        .expect("caller already checked registries.async_arrows contains this arrow");
    let type_token = inner_machine.type_token.expect("async arrow machine type always defined");
    let state_field = inner_machine.state_field.expect("async arrow machine state field always defined");
    let builder_field = inner_machine.builder_field.expect("async arrow machine builder field always defined");
    let outer_field = inner_machine.outer_field.expect("nested async arrow machine always has an outer field");
    let captured_fields = inner_machine.captured_fields.clone();
    let is_generator = inner_machine.is_generator;
    let iterator_current = actx.cx.runtime.iterator_current_field;
    let iterator_done = actx.cx.runtime.iterator_done_field;
    let task_builder_create = actx.cx.runtime.task_builder_create;
    let iterator_builder_type = actx.cx.runtime.iterator_builder_type;

    actx.cx.emit(Instr::NewObj(type_token, 0));

    actx.cx.emit(Instr::Dup);
    actx.cx.emit(Instr::LoadConstNum(-1.0));
    actx.cx.emit(Instr::StoreField(state_field));

    actx.cx.emit(Instr::Dup);
    actx.cx.emit(Instr::LoadThis);
    if let Some(self_boxed) = actx.machine.self_boxed_field {
        actx.cx.emit(Instr::LoadField(self_boxed));
    }
    actx.cx.emit(Instr::StoreField(outer_field));

    for (&name, &field) in &captured_fields {
        actx.cx.emit(Instr::Dup);
        match actx.cx.symbols.resolve(name) {
            Some(Binding::CellLocal(slot)) => actx.cx.emit(Instr::LoadLocal(slot)),
            Some(Binding::CellField { field: outer_field_tok, hops }) => {
                actx.cx.emit_field_chain_load(outer_field_tok, hops)
            }
            _ => actx.cx.emit(Instr::LoadNull),
        }
        actx.cx.emit(Instr::StoreField(field));
    }

    actx.cx.emit(Instr::Dup);
    if is_generator {
        actx.cx.emit(Instr::NewObj(iterator_builder_type, 0));
        actx.cx.emit(Instr::Dup);
        actx.cx.emit(Instr::LoadUndefined);
        actx.cx.emit(Instr::StoreField(iterator_current));
        actx.cx.emit(Instr::Dup);
        actx.cx.emit(Instr::LoadBool(false));
        actx.cx.emit(Instr::StoreField(iterator_done));
    } else {
        actx.cx.emit(Instr::CallStatic(task_builder_create, 0));
    }
    actx.cx.emit(Instr::StoreField(builder_field));

    let slot = actx.cx.alloc_local();
    actx.cx.emit(Instr::StoreLocal(slot));
    Ok(slot)
}

fn run_nested_async_arrow(actx: &mut AsyncCx, arrow: NodeIndex, slot: u16) -> CodegenResult<()> {
    let inner_machine = actx.cx.registries.async_arrows.get(&arrow).expect("checked by caller");
    let move_next = inner_machine.move_next.expect("async arrow MoveNext always reserved");
    let builder_field = inner_machine.builder_field.expect("async arrow builder field always defined");
    actx.cx.emit(Instr::LoadLocal(slot));
    actx.cx.emit(Instr::CallDirect(move_next, 1));
    actx.cx.emit(Instr::LoadLocal(slot));
    actx.cx.emit(Instr::LoadField(builder_field));
    actx.cx.emit(Instr::CallVirtual(actx.cx.runtime.task_builder_get_task, 1));
    Ok(())
}

fn lower_async_call(
    actx: &mut AsyncCx,
    callee: NodeIndex,
    args: &[NodeIndex],
    _optional: bool,
) -> CodegenResult<()> {
    if let NodeKind::Identifier(name) = &actx.cx.arena.get(callee).kind {
        let name = *name;
        if let Some(&arrow) = actx.async_arrow_locals.get(&name) {
            if let Some(Binding::Local(slot)) = actx.cx.symbols.resolve(name) {
                return run_nested_async_arrow(actx, arrow, slot);
            }
        }
        if actx.cx.registries.functions.contains_key(&name) {
            let method = actx.cx.registries.functions.get(&name).and_then(|f| f.method);
            if let Some(method) = method {
                let (arg_locals, spread) = lower_async_call_args(actx, args)?;
                push_async_call_args(actx, &arg_locals, spread);
                match spread {
                    None => actx.cx.emit(Instr::CallStatic(method, args.len() as u16)),
                    Some(leading) => actx.cx.emit(Instr::CallSpread(method, leading)),
                }
                return Ok(());
            }
        }
    }
    if let NodeKind::Arrow(_) = &actx.cx.arena.get(callee).kind {
        if actx.cx.registries.async_arrows.contains_key(&callee) {
            let slot = construct_nested_async_arrow(actx, callee)?;
            // Immediately-invoked: args to an async IIFE are never
            // referenced by this backend's arrow bodies (captures carry
            // everything they need), so they're evaluated for side
            // effects and discarded.
            for &a in args {
                lower_async_expr(actx, a)?;
                actx.cx.emit(Instr::Pop);
            }
            return run_nested_async_arrow(actx, callee, slot);
        }
    }

    if let NodeKind::PropertyAccess { object, name, .. } = actx.cx.arena.get(callee).kind.clone() {
        let obj_local = lower_async_expr_to_local(actx, object)?;
        let (arg_locals, spread) = lower_async_call_args(actx, args)?;
        actx.cx.emit(Instr::LoadLocal(obj_local));
        push_async_call_args(actx, &arg_locals, spread);
        let text = actx.cx.interner.resolve(name).to_string();
        let tok = actx.cx.intern_str(&text);
        actx.cx.emit(Instr::LoadLocal(obj_local));
        actx.cx.emit(Instr::LoadBagProp(tok));
        match spread {
            None => actx.cx.emit(Instr::CallDynamic(arg_locals.len() as u16)),
            Some(leading) => actx.cx.emit(Instr::CallDynamicSpread(leading)),
        }
        return Ok(());
    }

    let callee_local = lower_async_expr_to_local(actx, callee)?;
    let (arg_locals, spread) = lower_async_call_args(actx, args)?;
    actx.cx.emit(Instr::LoadLocal(callee_local));
    push_async_call_args(actx, &arg_locals, spread);
    match spread {
        None => actx.cx.emit(Instr::CallDynamic(args.len() as u16)),
        Some(leading) => actx.cx.emit(Instr::CallDynamicSpread(leading)),
    }
    Ok(())
}

fn map_binop(op: tsil_ast::ops::BinaryOp) -> ImgBinOp {
    use tsil_ast::ops::BinaryOp;
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
        BinaryOp::Comma => unreachable!("Comma handled directly by lower_async_expr"),
    }
}

fn map_unop(op: tsil_ast::ops::UnaryOp) -> tsil_image::UnOp {
    use tsil_ast::ops::UnaryOp;
    match op {
        UnaryOp::Plus => tsil_image::UnOp::Pos,
        UnaryOp::Minus => tsil_image::UnOp::Neg,
        UnaryOp::BitNot => tsil_image::UnOp::BitNot,
        UnaryOp::LogicalNot => tsil_image::UnOp::LogicalNot,
        UnaryOp::TypeOf => tsil_image::UnOp::TypeOf,
        UnaryOp::Void => tsil_image::UnOp::Void,
        UnaryOp::Delete => unreachable!("Delete never reaches an await-aware lowering path"),
    }
}

#[cfg(test)]
#[path = "tests/movenext.rs"]
mod tests;
