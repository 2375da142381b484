//! Typed AST data model for the `tsil` code generator.
//!
//! Parsing and type checking are out-of-scope collaborators (spec §6);
//! this crate provides the concrete shape of their output — a closed
//! `NodeKind` family addressed by dense, identity-stable `NodeIndex`es,
//! plus the "type map" and "dead-code info" side tables the checker
//! hands the driver.

pub mod arena;
pub mod builder;
pub mod dead_code;
pub mod module;
pub mod node;
pub mod ops;
pub mod type_map;
pub mod types;

pub use arena::{NodeArena, NodeIndex};
pub use builder::AstBuilder;
pub use dead_code::DeadCodeInfo;
pub use module::{Module, ModuleResolver};
pub use node::{
    ArrowData, BindingName, CatchClause, ClassData, ClassMember, ClassMemberKind, EnumData,
    EnumInitializer, EnumMember, ExportItem, ForInit, FunctionData, Node, NodeKind, ObjectProp,
    Param, SwitchCase, VarDeclarator, VarKind,
};
pub use type_map::TypeMap;
pub use types::InferredType;
