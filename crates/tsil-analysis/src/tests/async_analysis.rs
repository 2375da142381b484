use super::*;
use rustc_hash::FxHashMap;
use tsil_ast::ops::{AssignOp, BinaryOp};
use tsil_ast::{AstBuilder, Param, VarKind};
use tsil_common::Interner;

fn no_captures() -> FxHashMap<NodeIndex, CaptureSet> {
    FxHashMap::default()
}

#[test]
fn local_declared_before_and_used_after_await_hoists() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // let x = 1; await tick(); x = x + 1; await tick(); return x;
    let x_decl = b.var_decl(VarKind::Let, "x", Some(b.num(1.0)));
    let tick1 = b.call(b.ident("tick"), vec![]);
    let await1 = b.expr_stmt(b.await_expr(tick1));
    let x_ref1 = b.ident("x");
    let one = b.num(1.0);
    let sum = b.binary(BinaryOp::Add, x_ref1, one);
    let x_ref2 = b.ident("x");
    let assign = b.expr_stmt(b.assign(AssignOp::Assign, x_ref2, sum));
    let tick2 = b.call(b.ident("tick"), vec![]);
    let await2 = b.expr_stmt(b.await_expr(tick2));
    let x_ref3 = b.ident("x");
    let ret = b.return_stmt(Some(x_ref3));

    let body = vec![x_decl, await1, assign, await2, ret];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let x_atom = b.atom("x");
    assert_eq!(analysis.await_count, 2);
    assert!(analysis.hoisted_locals.contains(&x_atom));
}

#[test]
fn for_of_loop_variable_hoists_when_body_contains_await() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // let sum = 0; for (const item of list) { await tick(); sum = sum + item; } return sum;
    let sum_decl = b.var_decl(VarKind::Let, "sum", Some(b.num(0.0)));
    let list_ref = b.ident("list");
    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let sum_ref1 = b.ident("sum");
    let item_ref = b.ident("item");
    let added = b.binary(BinaryOp::Add, sum_ref1, item_ref);
    let sum_ref2 = b.ident("sum");
    let assign = b.expr_stmt(b.assign(AssignOp::Assign, sum_ref2, added));
    let loop_body = b.block(vec![await_stmt, assign]);
    let for_of = b.for_of(VarKind::Const, "item", list_ref, loop_body, false);
    let sum_ref3 = b.ident("sum");
    let ret = b.return_stmt(Some(sum_ref3));

    let body = vec![sum_decl, for_of, ret];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let item_atom = b.atom("item");
    assert!(analysis.hoisted_locals.contains(&item_atom));
    assert_eq!(analysis.await_count, 1);
}

#[test]
fn catch_parameter_hoists_when_try_contains_a_later_await() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // try { await risky(); } catch (e) { await tick(); use(e); }
    let risky = b.call(b.ident("risky"), vec![]);
    let try_block = b.block(vec![b.expr_stmt(b.await_expr(risky))]);
    let tick = b.call(b.ident("tick"), vec![]);
    let tick_await = b.expr_stmt(b.await_expr(tick));
    let e_ref = b.ident("e");
    let use_call = b.expr_stmt(b.call(b.ident("use"), vec![e_ref]));
    let catch_body = b.block(vec![tick_await, use_call]);
    let try_stmt = b.try_stmt(try_block, Some("e"), Some(catch_body), None);

    let body = vec![try_stmt];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let e_atom = b.atom("e");
    assert!(analysis.hoisted_locals.contains(&e_atom));
    assert!(analysis.has_try_catch);
    assert_eq!(analysis.await_count, 2);
}

#[test]
fn try_without_await_does_not_set_has_try_catch() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // try { return 1; } finally { sideEffect(); }
    let try_block = b.block(vec![b.return_stmt(Some(b.num(1.0)))]);
    let side_effect = b.expr_stmt(b.call(b.ident("sideEffect"), vec![]));
    let finally_block = b.block(vec![side_effect]);
    let try_stmt = b.try_stmt(try_block, None, None, Some(finally_block));

    let body = vec![try_stmt];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    assert!(!analysis.has_try_catch);
    assert_eq!(analysis.await_count, 0);
}

#[test]
fn reassigned_parameter_used_after_await_hoists() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // async function f(n) { await tick(); n = n + 1; return n; }
    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let n_ref1 = b.ident("n");
    let one = b.num(1.0);
    let sum = b.binary(BinaryOp::Add, n_ref1, one);
    let n_ref2 = b.ident("n");
    let assign = b.expr_stmt(b.assign(AssignOp::Assign, n_ref2, sum));
    let n_ref3 = b.ident("n");
    let ret = b.return_stmt(Some(n_ref3));

    let body = vec![await_stmt, assign, ret];
    let n_atom = b.atom("n");
    let params = vec![Param {
        name: tsil_ast::BindingName::Identifier(n_atom),
        initializer: None,
        rest: false,
    }];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &params, &body);

    assert!(analysis.hoisted_parameters.contains(&n_atom));
}

#[test]
fn this_use_is_detected_regardless_of_await() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let this_prop = b.prop(b.this_expr(), "x");
    let ret = b.return_stmt(Some(this_prop));

    let body = vec![await_stmt, ret];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    assert!(analysis.uses_this);
}

#[test]
fn nested_async_arrow_is_discovered_with_correct_nesting_level() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // await tick(); const g = async () => { await tick(); }; await g();
    let tick1 = b.call(b.ident("tick"), vec![]);
    let outer_await = b.expr_stmt(b.await_expr(tick1));

    let tick2 = b.call(b.ident("tick"), vec![]);
    let inner_await = b.expr_stmt(b.await_expr(tick2));
    let inner_body = b.block(vec![inner_await]);
    let inner_arrow = b.arrow(vec![], inner_body, true);

    let g_decl = b.var_decl(VarKind::Const, "g", Some(inner_arrow));
    let g_call = b.call(b.ident("g"), vec![]);
    let g_await = b.expr_stmt(b.await_expr(g_call));

    let body = vec![outer_await, g_decl, g_await];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    assert_eq!(analysis.async_arrows.len(), 1);
    let info = &analysis.async_arrows[0];
    assert_eq!(info.node, inner_arrow);
    assert_eq!(info.nesting_level, 0);
    assert!(info.parent_arrow.is_none());
    // The outer function's own await_count excludes the nested arrow's
    // internal await — only the two awaits in the outer body count.
    assert_eq!(analysis.await_count, 2);
}
