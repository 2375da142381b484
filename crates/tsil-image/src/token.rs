//! Opaque handles into the `MetadataBuilder`'s type/method/field tables.
//!
//! These are what the driver's registries (`class_types`, `functions`,
//! `arrow_method`, ...) actually store — a method or field is fully
//! defined, in the phased-stub sense of §4.1, the moment its token
//! exists, even before `MetadataBuilder::set_method_body` is called.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeToken(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodToken(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldToken(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringToken(pub u32);
