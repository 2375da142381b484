use super::*;
use tsil_ast::ops::BinaryOp;
use tsil_ast::{AstBuilder, BindingName, Param, VarKind};
use tsil_common::Interner;
use tsil_image::{Instr, MetadataBuilder};

use crate::registries::Registries;

#[test]
fn a_required_param_is_read_from_its_arg_slot() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);
    let x_atom = b.atom("x");

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    let params = vec![Param { name: BindingName::Identifier(x_atom), initializer: None, rest: false }];
    cx.lower_params(&params, 0, None).expect("plain required param should lower");

    let x_ref = b.ident("x");
    cx.lower_expr(x_ref).expect("x should resolve to the bound arg slot");
    let shape = cx.finish();

    assert!(shape.body.iter().any(|i| matches!(i, Instr::LoadArg(_))), "reading x should load its arg slot");
}

#[test]
fn an_if_statement_lowers_to_a_conditional_branch() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let cond = b.bool_lit(true);
    let then_branch = b.block(vec![b.expr_stmt(b.num(1.0))]);
    let else_branch = b.block(vec![b.expr_stmt(b.num(2.0))]);
    let if_node = b.if_stmt(cond, then_branch, Some(else_branch));

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    cx.lower_stmt(if_node).expect("if/else should lower");
    let shape = cx.finish();

    assert!(shape.body.iter().any(|i| matches!(i, Instr::BrFalse(_))), "an if with both branches needs a conditional branch");
}

#[test]
fn a_while_loop_lowers_to_a_backward_branch() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let cond = b.bool_lit(true);
    let body = b.block(vec![b.break_stmt(None)]);
    let while_node = b.while_stmt(cond, body);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    cx.lower_stmt(while_node).expect("while should lower");
    let shape = cx.finish();

    assert!(shape.body.iter().any(|i| matches!(i, Instr::Br(_))), "a while loop re-tests its condition via a branch");
}

#[test]
fn a_let_declaration_binds_its_initializer_to_a_fresh_local() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let decl = b.var_decl(VarKind::Let, "total", Some(b.num(0.0)));
    let total_ref = b.ident("total");
    let use_stmt = b.expr_stmt(total_ref);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    cx.lower_stmt(decl).expect("let decl should lower");
    cx.lower_stmt(use_stmt).expect("later read of total should resolve");
    let shape = cx.finish();

    assert!(shape.body.iter().any(|i| matches!(i, Instr::StoreLocal(_))));
    assert!(shape.body.iter().any(|i| matches!(i, Instr::LoadLocal(_))));
    assert!(shape.locals_count >= 1);
}

#[test]
fn a_comparison_binary_expression_lowers_to_the_matching_binop() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let left = b.num(1.0);
    let right = b.num(2.0);
    let lt = b.binary(BinaryOp::Lt, left, right);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    cx.lower_expr(lt).expect("comparison should lower");
    let shape = cx.finish();

    assert!(shape.body.iter().any(|i| matches!(i, Instr::BinOp(tsil_image::BinOp::Lt))));
}

#[test]
fn a_spread_call_argument_folds_the_source_array_in_via_array_concat() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let xs = b.ident("xs");
    let spread_xs = b.spread(xs);
    let call = b.call(b.ident("foo"), vec![spread_xs]);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    cx.lower_expr(call).expect("a spread-only call should lower");
    let shape = cx.finish();

    assert!(shape.body.iter().any(|i| matches!(i, Instr::NewArray(0))), "an accumulator array should be seeded");
    assert!(shape.body.iter().any(|i| matches!(i, Instr::ArrayConcat)), "the spread source should be folded in via ArrayConcat");
    assert!(
        shape.body.iter().any(|i| matches!(i, Instr::CallDynamicSpread(0))),
        "a spread call through an unresolved callee should use CallDynamicSpread with no leading fixed args"
    );
    assert!(
        !shape.body.iter().any(|i| matches!(i, Instr::CallDynamic(_))),
        "a spread call must not fall back to the fixed-argc CallDynamic"
    );
}

#[test]
fn a_leading_fixed_argument_before_a_spread_is_pushed_individually() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let first = b.num(1.0);
    let xs = b.ident("xs");
    let spread_xs = b.spread(xs);
    let call = b.call(b.ident("foo"), vec![first, spread_xs]);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();
    let mut cx = LoweringCx::new(&mut metadata, &runtime, &registries, &b.arena, &interner, DispatchMode::Plain, None);

    cx.lower_expr(call).expect("a call with a leading fixed arg and a spread should lower");
    let shape = cx.finish();

    assert!(
        shape.body.iter().any(|i| matches!(i, Instr::CallDynamicSpread(1))),
        "the one leading fixed argument should be counted in CallDynamicSpread's fixed_argc"
    );
}
