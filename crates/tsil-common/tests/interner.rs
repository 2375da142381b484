use super::*;

#[test]
fn interning_same_string_returns_same_atom() {
    let mut interner = Interner::new();
    let a = interner.intern("foo");
    let b = interner.intern("foo");
    assert_eq!(a, b);
    assert_eq!(interner.resolve(a), "foo");
}

#[test]
fn distinct_strings_get_distinct_atoms() {
    let mut interner = Interner::new();
    let a = interner.intern("foo");
    let b = interner.intern("bar");
    assert_ne!(a, b);
    assert_eq!(interner.len(), 2);
}

#[test]
fn sharded_interner_is_shareable() {
    let interner = ShardedInterner::new();
    let a = interner.intern("Program");
    let clone = interner.clone();
    let b = clone.intern("Program");
    assert_eq!(a, b);
    assert_eq!(&*interner.resolve(a), "Program");
}
