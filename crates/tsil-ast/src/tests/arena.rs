use super::*;
use crate::node::{Node, NodeKind};
use tsil_common::Span;

#[test]
fn identical_literal_kinds_still_get_distinct_identity() {
    let mut arena = NodeArena::new();
    let a = arena.push(Node::new(Span::dummy(), NodeKind::NumericLiteral(1.0)));
    let b = arena.push(Node::new(Span::dummy(), NodeKind::NumericLiteral(1.0)));
    assert_ne!(a, b, "two syntactically identical nodes must have distinct arena identity");
    assert_eq!(arena.len(), 2);
}

#[test]
fn get_returns_the_node_at_that_index() {
    let mut arena = NodeArena::new();
    let idx = arena.push(Node::new(Span::new(3, 9), NodeKind::BooleanLiteral(true)));
    assert_eq!(arena.span(idx), Span::new(3, 9));
    assert!(matches!(arena.get(idx).kind, NodeKind::BooleanLiteral(true)));
}
