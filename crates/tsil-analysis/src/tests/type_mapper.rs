use super::*;
use rustc_hash::FxHashMap;
use tsil_ast::InferredType;
use tsil_common::Interner;
use tsil_image::{Primitive, TypeToken};

#[test]
fn numbers_and_booleans_map_to_primitive_fast_paths() {
    let classes = FxHashMap::default();
    let enums = FxHashMap::default();
    let mapper = TypeMapper::new(&classes, &enums);

    assert_eq!(mapper.target_type(&InferredType::Number), TargetType::Number);
    assert_eq!(mapper.target_type(&InferredType::Boolean), TargetType::Boolean);
    assert_eq!(TargetType::Number.primitive(), Some(Primitive::Number));
    assert_eq!(TargetType::Boolean.primitive(), Some(Primitive::Boolean));
}

#[test]
fn strings_and_any_fall_back_to_object() {
    let classes = FxHashMap::default();
    let enums = FxHashMap::default();
    let mapper = TypeMapper::new(&classes, &enums);

    assert_eq!(mapper.target_type(&InferredType::String), TargetType::Object);
    assert_eq!(mapper.target_type(&InferredType::Any), TargetType::Object);
    assert_eq!(TargetType::Object.primitive(), None);
}

#[test]
fn resolves_a_registered_class_name_to_its_type_token() {
    let mut interner = Interner::default();
    let widget = interner.intern("Widget");

    let mut classes = FxHashMap::default();
    classes.insert(widget, TypeToken(7));
    let enums = FxHashMap::default();
    let mapper = TypeMapper::new(&classes, &enums);

    let ty = InferredType::Class(widget);
    assert_eq!(mapper.target_type(&ty), TargetType::Object);
    assert_eq!(mapper.resolve_named_type(&ty), Some(TypeToken(7)));
}

#[test]
fn an_unregistered_class_name_resolves_to_none() {
    let mut interner = Interner::default();
    let ghost = interner.intern("Ghost");

    let classes = FxHashMap::default();
    let enums = FxHashMap::default();
    let mapper = TypeMapper::new(&classes, &enums);

    assert_eq!(mapper.resolve_named_type(&InferredType::Class(ghost)), None);
}
