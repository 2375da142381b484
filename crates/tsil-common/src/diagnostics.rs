//! Diagnostic types for the `tsil` backend.
//!
//! Seven diagnostic kinds cover the whole backend: AST-malformed,
//! unresolved-name (not actually an error, see `tsil-codegen`),
//! invalid-enum-initializer, missing-function-body, missing-parent-arrow,
//! IR-verification-failure, and an io/image-write catch-all. Each has a
//! stable code so messages are centrally defined rather than inlined at
//! each call site.

/// Diagnostic category; this backend only ever raises `Error`/`Message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticCategory {
    Error,
    Message,
}

/// A one-line diagnostic with a source span, used for every fatal error
/// raised while lowering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: u32,
    pub category: DiagnosticCategory,
    pub message: String,
    pub span: crate::span::Span,
}

impl Diagnostic {
    #[must_use]
    pub fn error(code: u32, message: impl Into<String>, span: crate::span::Span) -> Self {
        Self {
            code,
            category: DiagnosticCategory::Error,
            message: message.into(),
            span,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (TSIL{:04}) at {}", self.message, self.code, self.span)
    }
}

/// A static message definition, looked up by code so the same kind of
/// error always reads the same way regardless of which call site raised
/// it.
#[derive(Clone, Copy, Debug)]
pub struct DiagnosticMessage {
    pub code: u32,
    pub template: &'static str,
}

/// One entry per error kind in the backend's error taxonomy.
pub const DIAGNOSTIC_MESSAGES: &[DiagnosticMessage] = &[
    DiagnosticMessage {
        code: 100,
        template: "unrecognized AST node variant: {0}",
    },
    DiagnosticMessage {
        code: 101,
        template: "invalid const enum initializer for member {0}.{1}: only literals, sibling member references, unary +/-/~ and numeric/string binary operators are evaluable at compile time",
    },
    DiagnosticMessage {
        code: 102,
        template: "function {0} has no body and no other declaration provides one",
    },
    DiagnosticMessage {
        code: 103,
        template: "internal error: nested async arrow {0} was discovered before its parent's state machine was built",
    },
    DiagnosticMessage {
        code: 104,
        template: "IR verification failed while finalizing type {0}: {1}",
    },
    DiagnosticMessage {
        code: 105,
        template: "import cycle detected while resolving module {0}",
    },
    DiagnosticMessage {
        code: 106,
        template: "failed to write image to {0}: {1}",
    },
];

#[must_use]
pub fn get_diagnostic_message(code: u32) -> Option<&'static DiagnosticMessage> {
    DIAGNOSTIC_MESSAGES.iter().find(|m| m.code == code)
}

/// Format a diagnostic message by replacing `{0}`, `{1}`, etc. with args.
#[must_use]
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut result = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        result = result.replace(&format!("{{{i}}}"), arg);
    }
    result
}

#[cfg(test)]
#[path = "../tests/diagnostics.rs"]
mod tests;
