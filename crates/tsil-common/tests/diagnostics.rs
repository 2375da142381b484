use super::*;
use crate::span::Span;

#[test]
fn formats_positional_args() {
    let template = get_diagnostic_message(102).unwrap().template;
    let msg = format_message(template, &["foo"]);
    assert_eq!(
        msg,
        "function foo has no body and no other declaration provides one"
    );
}

#[test]
fn diagnostic_display_includes_code_and_span() {
    let d = Diagnostic::error(100, "unrecognized AST node variant: Frobnicate", Span::new(4, 10));
    let text = d.to_string();
    assert!(text.contains("TSIL0100"));
    assert!(text.contains("4..10"));
}

#[test]
fn unknown_code_returns_none() {
    assert!(get_diagnostic_message(9999).is_none());
}
