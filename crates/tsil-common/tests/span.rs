use super::*;

#[test]
fn merge_takes_outer_bounds() {
    let a = Span::new(4, 10);
    let b = Span::new(2, 6);
    assert_eq!(a.merge(b), Span::new(2, 10));
}

#[test]
fn dummy_span_roundtrips() {
    let s = Span::dummy();
    assert!(s.is_dummy());
    assert!(!Span::new(0, 1).is_dummy());
}

#[test]
fn len_and_empty() {
    let s = Span::new(5, 5);
    assert!(s.is_empty());
    assert_eq!(s.len(), 0);
    assert_eq!(Span::new(5, 9).len(), 4);
}
