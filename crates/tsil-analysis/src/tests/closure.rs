use super::*;
use tsil_ast::ops::{AssignOp, BinaryOp};
use tsil_ast::{AstBuilder, VarKind};
use tsil_common::Interner;

#[test]
fn arrow_captures_a_mutated_outer_let() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let n_ref1 = b.ident("n");
    let n_ref2 = b.ident("n");
    let one = b.num(1.0);
    let sum = b.binary(BinaryOp::Add, n_ref1, one);
    let assign = b.assign(AssignOp::Assign, n_ref2, sum);
    let body = b.block(vec![b.expr_stmt(assign)]);
    let arrow = b.arrow(vec![], body, false);

    let n_decl = b.var_decl(VarKind::Let, "n", Some(b.num(0.0)));
    let top = vec![n_decl, b.expr_stmt(arrow)];

    let captures = ClosureAnalyzer::new(&b.arena).analyze(&top);
    let n_atom = b.atom("n");
    let set = captures.get(&arrow).expect("arrow should have a capture entry");
    assert!(set.names.contains(&n_atom));
    assert!(!set.captures_this);
}

#[test]
fn arrow_does_not_capture_its_own_parameter() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let x_ref = b.ident("x");
    let body = b.block(vec![b.return_stmt(Some(x_ref))]);
    let arrow = b.arrow(vec!["x"], body, false);
    let top = vec![b.expr_stmt(arrow)];

    let captures = ClosureAnalyzer::new(&b.arena).analyze(&top);
    let set = captures.get(&arrow).unwrap();
    assert!(set.names.is_empty());
}

#[test]
fn capture_propagates_through_a_nested_arrow_chain() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    // let v = 0;
    // const outer = () => { const inner = () => { v = v + 1; }; inner(); };
    let v_ref1 = b.ident("v");
    let v_ref2 = b.ident("v");
    let one = b.num(1.0);
    let sum = b.binary(BinaryOp::Add, v_ref1, one);
    let assign = b.assign(AssignOp::Assign, v_ref2, sum);
    let inner_body = b.block(vec![b.expr_stmt(assign)]);
    let inner = b.arrow(vec![], inner_body, false);

    let inner_decl = b.var_decl(VarKind::Const, "inner", Some(inner));
    let inner_call = b.call(b.ident("inner"), vec![]);
    let outer_body = b.block(vec![inner_decl, b.expr_stmt(inner_call)]);
    let outer = b.arrow(vec![], outer_body, false);

    let v_decl = b.var_decl(VarKind::Let, "v", Some(b.num(0.0)));
    let top = vec![v_decl, b.expr_stmt(outer)];

    let captures = ClosureAnalyzer::new(&b.arena).analyze(&top);
    let v_atom = b.atom("v");
    assert!(captures.get(&inner).unwrap().names.contains(&v_atom));
    assert!(captures.get(&outer).unwrap().names.contains(&v_atom));
}

#[test]
fn arrow_referencing_a_top_level_function_does_not_capture_it() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let helper_body = b.block(vec![]);
    let helper_decl = b.function_decl("helper", vec![], helper_body, false, false);

    let call = b.call(b.ident("helper"), vec![]);
    let arrow_body = b.block(vec![b.expr_stmt(call)]);
    let arrow = b.arrow(vec![], arrow_body, false);

    let top = vec![helper_decl, b.expr_stmt(arrow)];
    let captures = ClosureAnalyzer::new(&b.arena).analyze(&top);
    assert!(captures.get(&arrow).unwrap().names.is_empty());
}

#[test]
fn arrow_captures_this_from_an_enclosing_method() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let this_expr = b.this_expr();
    let arrow_body = b.block(vec![b.expr_stmt(this_expr)]);
    let arrow = b.arrow(vec![], arrow_body, false);

    let method_body = b.block(vec![b.expr_stmt(arrow)]);
    let method = b.method("run", vec![], method_body, false);
    let class_decl = b.class_decl("Widget", None, vec![method]);

    let top = vec![class_decl];
    let captures = ClosureAnalyzer::new(&b.arena).analyze(&top);
    assert!(captures.get(&arrow).unwrap().captures_this);
}
