//! The driver's unified error type (§7): one `CompileError` variant per
//! error kind, wrapping whichever collaborator actually raised it so a
//! caller never has to match on `CodegenError`/`ImageError` separately.

use tsil_codegen::CodegenError;
use tsil_common::diagnostics::{format_message, get_diagnostic_message};
use tsil_common::{Diagnostic, Span};
use tsil_image::ImageError;

#[derive(thiserror::Error, Debug, Clone)]
pub enum CompileError {
    /// AST-malformed, invalid-enum-initializer, missing-function-body, or
    /// missing-parent-arrow — the four kinds `tsil-codegen` itself raises.
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// A diagnostic raised directly by the driver (import cycle, IR
    /// verification failure, or image write failure — codes 104/105/106)
    /// or a malformed declaration shape the driver notices before handing
    /// anything to `tsil-codegen`.
    #[error("{0}")]
    Diagnostic(Diagnostic),
}

impl From<Diagnostic> for CompileError {
    fn from(d: Diagnostic) -> Self {
        CompileError::Diagnostic(d)
    }
}

impl From<ImageError> for CompileError {
    fn from(e: ImageError) -> Self {
        let diagnostic = match e {
            ImageError::Verification(msg) => Diagnostic::error(
                104,
                format_message(get_diagnostic_message(104).expect("code 104 is registered").template, &["<image>", &msg]),
                Span::dummy(),
            ),
            ImageError::Io { path, source } => Diagnostic::error(
                106,
                format_message(get_diagnostic_message(106).expect("code 106 is registered").template, &[&path, &source.to_string()]),
                Span::dummy(),
            ),
        };
        CompileError::Diagnostic(diagnostic)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
