//! Type Mapper (component A): maps the checker's coarse `InferredType`
//! onto the handful of distinctions the IL Emitter actually cares about
//! — whether a value can stay unboxed on the primitive stack or must be
//! treated as a boxed `any`, and (for named types) which surface name to
//! resolve a `TypeToken` for. Not semantically required (§6): every path
//! this module can't resolve falls back to the fully general `Object`
//! treatment, never a panic.

use rustc_hash::FxHashMap;
use tsil_ast::InferredType;
use tsil_common::Atom;
use tsil_image::Primitive;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetType {
    /// Fits the `Primitive::Number` fast path (unboxed f64 on the stack).
    Number,
    /// Fits the `Primitive::Boolean` fast path.
    Boolean,
    /// Everything else: strings, arrays, functions, class instances,
    /// `any` — boxed/object-shaped as far as codegen is concerned.
    Object,
}

impl TargetType {
    pub fn primitive(self) -> Option<Primitive> {
        match self {
            TargetType::Number => Some(Primitive::Number),
            TargetType::Boolean => Some(Primitive::Boolean),
            TargetType::Object => None,
        }
    }
}

/// Resolves `InferredType::Class`/`InferredType::Enum` surface names to
/// the `TypeToken`s the driver registered for them (`class_types`/
/// `enum_types` in the driver's registry table). Generic-parameter
/// references that never got resolved to a concrete name by the checker
/// collapse to `Object`, same as `Any`.
pub struct TypeMapper<'a> {
    class_types: &'a FxHashMap<Atom, tsil_image::TypeToken>,
    enum_types: &'a FxHashMap<Atom, tsil_image::TypeToken>,
}

impl<'a> TypeMapper<'a> {
    pub fn new(
        class_types: &'a FxHashMap<Atom, tsil_image::TypeToken>,
        enum_types: &'a FxHashMap<Atom, tsil_image::TypeToken>,
    ) -> Self {
        TypeMapper { class_types, enum_types }
    }

    pub fn target_type(&self, ty: &InferredType) -> TargetType {
        match ty {
            InferredType::Number => TargetType::Number,
            InferredType::Boolean => TargetType::Boolean,
            InferredType::String
            | InferredType::Null
            | InferredType::Undefined
            | InferredType::Any
            | InferredType::Void
            | InferredType::Object
            | InferredType::Array(_)
            | InferredType::Function
            | InferredType::Class(_)
            | InferredType::Enum(_) => TargetType::Object,
        }
    }

    /// Resolves a named class/enum type to its registered `TypeToken`,
    /// if the driver has already defined one for that name.
    pub fn resolve_named_type(&self, ty: &InferredType) -> Option<tsil_image::TypeToken> {
        match ty {
            InferredType::Class(name) => self.class_types.get(name).copied(),
            InferredType::Enum(name) => self.enum_types.get(name).copied(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/type_mapper.rs"]
mod tests;
