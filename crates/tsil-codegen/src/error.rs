//! Codegen-side error taxonomy (§7: AST-malformed, invalid-enum-
//! initializer, missing-function-body, missing-parent-arrow). IR
//! verification failures surface from `tsil-image::writer` instead, and
//! the driver wraps both into one `CompileError` enum.

use tsil_common::{Diagnostic, Span};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("{0}")]
    Diagnostic(Diagnostic),
}

impl CodegenError {
    pub fn ast_malformed(variant: &str, span: Span) -> Self {
        let msg = tsil_common::diagnostics::format_message(
            tsil_common::diagnostics::get_diagnostic_message(100)
                .expect("code 100 is registered")
                .template,
            &[variant],
        );
        CodegenError::Diagnostic(Diagnostic::error(100, msg, span))
    }

    pub fn invalid_enum_initializer(enum_name: &str, member_name: &str, span: Span) -> Self {
        let msg = tsil_common::diagnostics::format_message(
            tsil_common::diagnostics::get_diagnostic_message(101)
                .expect("code 101 is registered")
                .template,
            &[enum_name, member_name],
        );
        CodegenError::Diagnostic(Diagnostic::error(101, msg, span))
    }

    pub fn missing_function_body(name: &str, span: Span) -> Self {
        let msg = tsil_common::diagnostics::format_message(
            tsil_common::diagnostics::get_diagnostic_message(102)
                .expect("code 102 is registered")
                .template,
            &[name],
        );
        CodegenError::Diagnostic(Diagnostic::error(102, msg, span))
    }

    pub fn missing_parent_arrow(span: Span) -> Self {
        let msg = tsil_common::diagnostics::format_message(
            tsil_common::diagnostics::get_diagnostic_message(103)
                .expect("code 103 is registered")
                .template,
            &["<arrow>"],
        );
        CodegenError::Diagnostic(Diagnostic::error(103, msg, span))
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        let CodegenError::Diagnostic(d) = self;
        d
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;
