use super::*;
use crate::opcode::Instr;

#[test]
fn method_stub_token_is_usable_before_body_is_set() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("Foo", None, TypeKind::Class, true);
    let stub = mb.define_method(ty, "bar", false, true, 0);
    // A caller can already reference `stub` for a virtual-dispatch
    // instruction even though no body has been attached.
    let instr = Instr::CallVirtual(stub, 0);
    assert!(matches!(instr, Instr::CallVirtual(t, 0) if t == stub));
    assert!(mb.method_def(stub).body.is_none());

    mb.set_method_body(stub, 0, vec![Instr::RetVoid]);
    assert!(mb.method_def(stub).body.is_some());
}

#[test]
fn verify_fails_when_a_method_has_no_body() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("Foo", None, TypeKind::Class, true);
    mb.define_method(ty, "bar", false, false, 0);
    mb.finalize_type(ty);
    assert!(mb.verify().is_err());
}

#[test]
fn verify_fails_when_a_type_is_not_finalized() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("Foo", None, TypeKind::Class, true);
    let m = mb.define_method(ty, "bar", false, false, 0);
    mb.set_method_body(m, 0, vec![Instr::RetVoid]);
    assert!(mb.verify().is_err());
}

#[test]
fn verify_succeeds_with_entry_point_and_finalized_types() {
    let mut mb = MetadataBuilder::new();
    let ty = mb.define_type("$Program", None, TypeKind::Class, true);
    let main = mb.define_method(ty, "Main", true, false, 0);
    mb.set_method_body(main, 0, vec![Instr::RetVoid]);
    mb.set_entry_point(main);
    mb.finalize_type(ty);
    assert!(mb.verify().is_ok());
}

#[test]
fn string_interning_is_deduplicated() {
    let mut mb = MetadataBuilder::new();
    let a = mb.intern_string("hello");
    let b = mb.intern_string("hello");
    assert_eq!(a, b);
    assert_eq!(mb.strings().len(), 1);
}
