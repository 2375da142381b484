//! IL Emitter, Async State Machine Builder, Async MoveNext Emitter, and
//! Module Emitter (§2 components D, E, F, I): the recursive AST-to-
//! opcode lowering, the state-machine shape-definer, the switch-
//! dispatched resume-body emitter, and the per-module export synthesis.
//!
//! `tsil-driver` owns the registries (`registries` module, re-exported
//! from here) and the symbol-resolution scope stack (`binding`); this
//! crate's job is turning AST nodes into `tsil_image::Instr` streams
//! against those already-defined handles.

pub mod async_machine;
pub mod binding;
pub mod error;
pub mod il_emitter;
pub mod module_emitter;
pub mod movenext;
pub mod registries;

pub use async_machine::{build_async_machine, AsyncMachineKind};
pub use binding::{Binding, Scope, SymbolTable};
pub use error::{CodegenError, CodegenResult};
pub use il_emitter::{FunctionShape, LoweringCx};
pub use module_emitter::emit_module;
pub use movenext::emit_move_next;
pub use registries::{
    ArrowInfo, AsyncMachine, ClassInfo, EnumInfo, EnumKind, EnumValue, FunctionInfo, FunctionRest,
    ModuleInfo, Registries,
};
