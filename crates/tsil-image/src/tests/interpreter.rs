use super::*;
use crate::metadata::{MetadataBuilder, TypeKind};

fn build_arithmetic_program() -> (MetadataBuilder, crate::token::MethodToken) {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let main = mb.define_method(ty, "Main", true, false, 0);
    mb.set_method_body(
        main,
        0,
        vec![
            Instr::LoadConstNum(2.0),
            Instr::LoadConstNum(3.0),
            Instr::BinOp(BinOp::Add),
            Instr::Ret,
        ],
    );
    mb.set_entry_point(main);
    mb.finalize_type(ty);
    (mb, main)
}

#[test]
fn runs_a_straight_line_arithmetic_program() {
    let (mb, main) = build_arithmetic_program();
    let mut interp = Interpreter::new(&mb);
    let result = interp.run(main, vec![]).unwrap();
    match result {
        Value::Number(n) => assert_eq!(n, 5.0),
        other => panic!("expected number, got {other:?}"),
    }
}

#[test]
fn loop_via_branch_accumulates_into_a_local() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let main = mb.define_method(ty, "Main", true, false, 0);
    // local0 = 0; local1 = 0
    // loop (ip 4): if local1 >= 3 goto end (ip 17)
    //   local0 += local1; local1 += 1; goto loop
    // end: return local0
    let body = vec![
        Instr::LoadConstNum(0.0),
        Instr::StoreLocal(0),
        Instr::LoadConstNum(0.0),
        Instr::StoreLocal(1),
        Instr::LoadLocal(1),
        Instr::LoadConstNum(3.0),
        Instr::BinOp(BinOp::GtEq),
        Instr::BrTrue(17),
        Instr::LoadLocal(0),
        Instr::LoadLocal(1),
        Instr::BinOp(BinOp::Add),
        Instr::StoreLocal(0),
        Instr::LoadLocal(1),
        Instr::LoadConstNum(1.0),
        Instr::BinOp(BinOp::Add),
        Instr::StoreLocal(1),
        Instr::Br(4),
        Instr::LoadLocal(0),
        Instr::Ret,
    ];
    mb.set_method_body(main, 2, body);
    mb.set_entry_point(main);
    mb.finalize_type(ty);

    let mut interp = Interpreter::new(&mb);
    let result = interp.run(main, vec![]).unwrap();
    match result {
        Value::Number(n) => assert_eq!(n, 3.0), // 0 + 1 + 2
        other => panic!("expected number, got {other:?}"),
    }
}

#[test]
fn thrown_value_is_caught_and_observed() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let main = mb.define_method(ty, "Main", true, false, 0);
    mb.set_method_body(
        main,
        0,
        vec![
            Instr::BeginTry,        // 0
            Instr::LoadConstNum(7.0), // 1
            Instr::Throw,            // 2
            Instr::EndTry,           // 3
            Instr::BeginCatch,       // 4: exception value is pushed here
            Instr::Ret,              // 5: return the caught value
            Instr::EndCatch,         // 6
        ],
    );
    mb.set_entry_point(main);
    mb.finalize_type(ty);

    let mut interp = Interpreter::new(&mb);
    let result = interp.run(main, vec![]).unwrap();
    match result {
        Value::Number(n) => assert_eq!(n, 7.0),
        other => panic!("expected number, got {other:?}"),
    }
}

#[test]
fn call_spread_concatenates_fixed_and_spread_arguments_before_dispatch() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let sum3 = mb.define_method(ty, "sum3", true, false, 3);
    mb.set_method_body(
        sum3,
        0,
        vec![
            Instr::LoadArg(0),
            Instr::LoadArg(1),
            Instr::BinOp(BinOp::Add),
            Instr::LoadArg(2),
            Instr::BinOp(BinOp::Add),
            Instr::Ret,
        ],
    );
    let main = mb.define_method(ty, "Main", true, false, 0);
    mb.set_method_body(
        main,
        0,
        vec![
            Instr::LoadConstNum(5.0),
            Instr::NewArray(0),
            Instr::LoadConstNum(10.0),
            Instr::LoadConstNum(20.0),
            Instr::NewArray(2),
            Instr::ArrayConcat,
            Instr::CallSpread(sum3, 1),
            Instr::Ret,
        ],
    );
    mb.set_entry_point(main);
    mb.finalize_type(ty);

    let mut interp = Interpreter::new(&mb);
    let result = interp.run(main, vec![]).unwrap();
    match result {
        Value::Number(n) => assert_eq!(n, 35.0), // 5 + 10 + 20
        other => panic!("expected number, got {other:?}"),
    }
}

#[test]
fn switch_dispatches_to_the_matching_case() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let main = mb.define_method(ty, "Main", true, false, 0);
    mb.set_method_body(
        main,
        0,
        vec![
            Instr::LoadConstNum(1.0), // state = 1
            Instr::Switch {
                cases: vec![2, 4],
                default: 6,
            },
            Instr::LoadConstNum(999.0), // case 0 target -- unreachable here
            Instr::Ret,
            Instr::LoadConstNum(100.0), // case 1 target
            Instr::Ret,
            Instr::LoadConstNum(200.0), // default target
            Instr::Ret,
        ],
    );
    mb.set_entry_point(main);
    mb.finalize_type(ty);

    let mut interp = Interpreter::new(&mb);
    let result = interp.run(main, vec![]).unwrap();
    match result {
        Value::Number(n) => assert_eq!(n, 100.0),
        other => panic!("expected number, got {other:?}"),
    }
}
