use super::*;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use tsil_analysis::async_analysis::analyze_async_function;
use tsil_analysis::closure::CaptureSet;
use tsil_ast::ops::BinaryOp;
use tsil_ast::{AstBuilder, VarKind};
use tsil_common::Interner;
use tsil_image::{Instr, MetadataBuilder};

use crate::async_machine::{build_async_machine, AsyncMachineKind};
use crate::registries::Registries;

fn no_captures() -> FxHashMap<tsil_ast::NodeIndex, CaptureSet> {
    FxHashMap::default()
}

#[test]
fn a_single_await_body_dispatches_on_state_and_sets_the_result() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let body = vec![await_stmt, b.return_stmt(None)];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);
    assert_eq!(analysis.await_count, 1);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_main", &[], &analysis, AsyncMachineKind::TopLevel, false, false);
    let registries = Registries::new();

    emit_move_next(&mut metadata, &runtime, &registries, &b.arena, &interner, &machine, &body, None, Vec::new(), &FxHashSet::default())
        .expect("emit_move_next should succeed on a single-await body");

    let move_next = machine.move_next.expect("move_next reserved");
    let def = metadata.method_def(move_next);
    let instrs = def.body.as_ref().expect("move_next should have a body");

    assert!(instrs.iter().any(|i| matches!(i, Instr::Switch { .. })), "dispatch prologue should emit a Switch");
    assert!(
        instrs.iter().any(|i| matches!(i, Instr::CallVirtual(m, 2) if *m == runtime.task_builder_set_result)),
        "falling off the end should call SetResult"
    );
    assert!(
        instrs.iter().any(|i| matches!(i, Instr::CallVirtual(m, 2) if *m == runtime.task_builder_set_exception)),
        "the outer catch should call SetException"
    );
    assert!(instrs.iter().any(|i| matches!(i, Instr::BeginTry)));
    assert!(instrs.iter().any(|i| matches!(i, Instr::BeginCatch)));
}

#[test]
fn a_body_with_no_await_still_wraps_in_the_outer_try_catch() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let one = b.num(1.0);
    let body = vec![b.return_stmt(Some(one))];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);
    assert_eq!(analysis.await_count, 0);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_noawait", &[], &analysis, AsyncMachineKind::TopLevel, false, false);
    let registries = Registries::new();

    emit_move_next(&mut metadata, &runtime, &registries, &b.arena, &interner, &machine, &body, None, Vec::new(), &FxHashSet::default())
        .expect("emit_move_next should succeed on a no-await body");

    let move_next = machine.move_next.expect("move_next reserved");
    let def = metadata.method_def(move_next);
    let instrs = def.body.as_ref().expect("move_next should have a body");

    // No suspension points, so the switch's case list is empty but the
    // dispatch prologue (state == -1 check) is still emitted.
    assert!(matches!(instrs.first(), Some(Instr::LoadThis)));
    assert!(instrs.iter().any(|i| matches!(i, Instr::Switch { cases, .. } if cases.is_empty())));
}

#[test]
fn a_local_hoisted_across_an_await_is_read_back_from_its_field() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let x_decl = b.var_decl(VarKind::Let, "x", Some(b.num(1.0)));
    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let x_ref = b.ident("x");
    let one = b.num(1.0);
    let sum = b.binary(BinaryOp::Add, x_ref, one);
    let ret = b.return_stmt(Some(sum));
    let body = vec![x_decl, await_stmt, ret];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);
    let x_atom = b.atom("x");

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_hoist", &[], &analysis, AsyncMachineKind::TopLevel, false, false);
    let registries = Registries::new();
    let x_field = *machine.hoisted_locals.get(&x_atom).expect("x should be hoisted");

    emit_move_next(&mut metadata, &runtime, &registries, &b.arena, &interner, &machine, &body, None, Vec::new(), &FxHashSet::default())
        .expect("emit_move_next should succeed");

    let move_next = machine.move_next.expect("move_next reserved");
    let def = metadata.method_def(move_next);
    let instrs = def.body.as_ref().expect("move_next should have a body");

    assert!(
        instrs.iter().any(|i| matches!(i, Instr::StoreField(f) if *f == x_field)),
        "x's initializer should be stored into its hoisted field before the await"
    );
    assert!(
        instrs.iter().any(|i| matches!(i, Instr::LoadField(f) if *f == x_field)),
        "x should be reloaded from its hoisted field after resuming"
    );
}

#[test]
fn a_spread_argument_to_an_awaited_call_folds_through_array_concat() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let xs = b.ident("xs");
    let spread_xs = b.spread(xs);
    let tick = b.call(b.ident("tick"), vec![spread_xs]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let body = vec![await_stmt, b.return_stmt(None)];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_spread", &[], &analysis, AsyncMachineKind::TopLevel, false, false);
    let registries = Registries::new();

    emit_move_next(&mut metadata, &runtime, &registries, &b.arena, &interner, &machine, &body, None, Vec::new(), &FxHashSet::default())
        .expect("emit_move_next should succeed on a spread-argument call");

    let move_next = machine.move_next.expect("move_next reserved");
    let def = metadata.method_def(move_next);
    let instrs = def.body.as_ref().expect("move_next should have a body");

    assert!(instrs.iter().any(|i| matches!(i, Instr::ArrayConcat)), "the spread source should be folded in via ArrayConcat");
    assert!(
        instrs.iter().any(|i| matches!(i, Instr::CallDynamicSpread(0))),
        "a spread call with no leading fixed args should use CallDynamicSpread(0)"
    );
}
