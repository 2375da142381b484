use super::*;
use rustc_hash::FxHashMap;
use tsil_analysis::async_analysis::analyze_async_function;
use tsil_analysis::closure::CaptureSet;
use tsil_ast::ops::BinaryOp;
use tsil_ast::{AstBuilder, VarKind};
use tsil_common::Interner;
use tsil_image::{FieldType, MetadataBuilder, TypeKind};

fn no_captures() -> FxHashMap<tsil_ast::NodeIndex, CaptureSet> {
    FxHashMap::default()
}

#[test]
fn top_level_machine_reserves_state_and_builder_fields() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let body = vec![await_stmt];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);

    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_main", &[], &analysis, AsyncMachineKind::TopLevel, false, false);

    let state_field = machine.state_field.expect("state field reserved");
    let builder_field = machine.builder_field.expect("builder field reserved");
    let type_token = machine.type_token.expect("type reserved");

    assert_eq!(metadata.field_def(state_field).field_type, FieldType::Int32);
    assert_eq!(metadata.field_def(builder_field).field_type, FieldType::Typed(runtime.task_builder_type));
    assert_eq!(metadata.type_def(type_token).kind, TypeKind::ValueType);
    assert!(machine.outer_field.is_none());
    assert!(machine.self_boxed_field.is_none());
}

#[test]
fn generator_machine_uses_the_iterator_builder_type() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);
    let body = vec![b.return_stmt(None)];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);

    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$Gen_main", &[], &analysis, AsyncMachineKind::TopLevel, true, false);

    let builder_field = machine.builder_field.unwrap();
    assert_eq!(metadata.field_def(builder_field).field_type, FieldType::Typed(runtime.iterator_builder_type));
    assert!(machine.is_generator);
}

#[test]
fn a_local_hoisted_across_an_await_gets_its_own_field() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let x_decl = b.var_decl(VarKind::Let, "x", Some(b.num(1.0)));
    let tick = b.call(b.ident("tick"), vec![]);
    let await_stmt = b.expr_stmt(b.await_expr(tick));
    let x_ref1 = b.ident("x");
    let one = b.num(1.0);
    let sum = b.binary(BinaryOp::Add, x_ref1, one);
    let ret = b.return_stmt(Some(sum));
    let body = vec![x_decl, await_stmt, ret];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);
    let x_atom = b.atom("x");
    assert!(analysis.hoisted_locals.contains(&x_atom));

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_f", &[], &analysis, AsyncMachineKind::TopLevel, false, false);

    let field = machine.hoisted_locals.get(&x_atom).expect("x should have a hoisted field");
    assert_eq!(metadata.field_def(*field).field_type, FieldType::Object);
}

#[test]
fn await_count_determines_awaiter_field_count() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);
    let tick1 = b.call(b.ident("tick"), vec![]);
    let await1 = b.expr_stmt(b.await_expr(tick1));
    let tick2 = b.call(b.ident("tick"), vec![]);
    let await2 = b.expr_stmt(b.await_expr(tick2));
    let body = vec![await1, await2];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);
    assert_eq!(analysis.await_count, 2);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_g", &[], &analysis, AsyncMachineKind::TopLevel, false, false);

    assert_eq!(machine.awaiter_fields.len(), 2);
    for f in &machine.awaiter_fields {
        assert_eq!(metadata.field_def(*f).field_type, FieldType::Typed(runtime.awaiter_type));
    }
}

#[test]
fn a_machine_with_nested_async_children_gets_a_self_boxed_field() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);
    let body = vec![b.return_stmt(None)];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let machine = build_async_machine(&mut metadata, &runtime, &interner, "$AsyncFn_h", &[], &analysis, AsyncMachineKind::TopLevel, false, true);

    let field = machine.self_boxed_field.expect("self-boxed field expected");
    assert_eq!(metadata.field_def(field).field_type, FieldType::Object);
}

#[test]
fn an_arrow_machine_gets_an_outer_field_typed_to_the_parent() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);
    let body = vec![b.return_stmt(None)];
    let captures = no_captures();
    let analysis = analyze_async_function(&b.arena, &captures, &[], &body);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let outer_type = metadata.define_type("$AsyncFn_outer", None, TypeKind::ValueType, true);
    let capture_set = CaptureSet::default();

    let machine = build_async_machine(
        &mut metadata,
        &runtime,
        &interner,
        "$AsyncArrow_inner",
        &[],
        &analysis,
        AsyncMachineKind::Arrow { outer: outer_type, captures: &capture_set },
        false,
        false,
    );

    let outer_field = machine.outer_field.expect("nested arrow machine needs an outer field");
    assert_eq!(metadata.field_def(outer_field).field_type, FieldType::Typed(outer_type));
}
