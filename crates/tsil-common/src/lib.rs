//! Shared primitives for the `tsil` AOT code generator.
//!
//! This crate provides foundational types used across all `tsil` crates:
//! - String interning (`Atom`, `Interner`, `ShardedInterner`)
//! - Source spans (`Span`, `Spanned`)
//! - Diagnostics (`Diagnostic`, `DiagnosticCategory`, message lookup)
//! - Centralized limits and thresholds

pub mod diagnostics;
pub mod interner;
pub mod limits;
pub mod span;

pub use diagnostics::{Diagnostic, DiagnosticCategory};
pub use interner::{Atom, Interner, ShardedInterner};
pub use span::{Span, Spanned};
