use super::*;

#[test]
fn forward_branch_resolves_to_mark_label_position() {
    let mut b = OpcodeBuilder::new();
    let end = b.new_label();
    b.emit(Instr::LoadConstNum(1.0));
    b.emit_br(end);
    b.emit(Instr::LoadConstNum(2.0));
    b.mark_label(end);
    b.emit(Instr::Ret);
    let instrs = b.finish();
    assert_eq!(instrs[1], Instr::Br(3));
}

#[test]
fn backward_branch_resolves_to_earlier_position() {
    let mut b = OpcodeBuilder::new();
    let top = b.new_label();
    b.mark_label(top);
    b.emit(Instr::LoadConstNum(1.0));
    b.emit_br_true(top);
    let instrs = b.finish();
    assert_eq!(instrs[1], Instr::BrTrue(0));
}

#[test]
#[should_panic(expected = "never marked")]
fn unmarked_label_panics_on_finish() {
    let mut b = OpcodeBuilder::new();
    let label = b.new_label();
    b.emit_br(label);
    let _ = b.finish();
}
