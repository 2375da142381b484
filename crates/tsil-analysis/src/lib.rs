//! Analysis collaborators that sit between the typed AST and codegen:
//! the Type Mapper (A), the Closure Analyzer (B), and the Async State
//! Analyzer (C).

pub mod async_analysis;
pub mod closure;
pub mod type_mapper;

pub use async_analysis::{analyze_async_function, AsyncArrowInfo, AsyncFunctionAnalysis};
pub use closure::{CaptureSet, ClosureAnalyzer};
pub use type_mapper::{TargetType, TypeMapper};
