use super::*;
use tsil_ast::{AstBuilder, VarKind};
use tsil_common::Interner;
use tsil_image::{FieldType, MetadataBuilder, TypeKind};

use crate::registries::Registries;

#[test]
fn a_local_export_copies_its_bound_local_into_the_static_field() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let decl = b.var_decl(VarKind::Let, "total", Some(b.num(42.0)));
    let body = vec![decl];
    let total = b.atom("total");

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();

    let exports = vec![ModuleExport { name: total, kind: ModuleExportKind::Local }];
    let info = emit_module(&mut metadata, &runtime, &registries, &b.arena, &interner, "./math", &body, &exports, &Default::default())
        .expect("module with a local export should emit");

    let module_type = info.module_type.expect("module type reserved");
    assert_eq!(metadata.type_def(module_type).kind, TypeKind::Class);
    assert!(metadata.type_def(module_type).sealed);

    let field = *info.exports.get(&total).expect("export field recorded");
    assert_eq!(metadata.field_def(field).field_type, FieldType::Object);
    assert!(metadata.field_def(field).is_static);

    let init = info.init.expect("$Initialize reserved");
    let body = metadata.method_def(init).body.as_ref().expect("$Initialize should have a body");
    assert!(body.iter().any(|i| matches!(i, tsil_image::Instr::StoreStaticField(f) if *f == field)));
}

#[test]
fn a_reexport_reads_straight_from_the_source_modules_field() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();

    let other_type = metadata.define_type("$Module_other", None, TypeKind::Class, true);
    let source_field = metadata.define_field(other_type, "export_value", true, FieldType::Object);

    let value = b.atom("value");
    let exports = vec![ModuleExport { name: value, kind: ModuleExportKind::ReExport(source_field) }];
    let info = emit_module(&mut metadata, &runtime, &registries, &b.arena, &interner, "./reexport", &[], &exports, &Default::default())
        .expect("re-export module should emit");

    let field = info.exports[&value];
    let init = info.init.expect("$Initialize reserved");
    let body = metadata.method_def(init).body.as_ref().unwrap();

    assert!(body.iter().any(|i| matches!(i, tsil_image::Instr::LoadStaticField(f) if *f == source_field)));
    assert!(body.iter().any(|i| matches!(i, tsil_image::Instr::StoreStaticField(f) if *f == field)));
}

#[test]
fn a_class_export_reserves_a_field_but_stores_nothing() {
    let mut interner = Interner::default();
    let mut b = AstBuilder::new(&mut interner);

    let mut metadata = MetadataBuilder::new();
    let runtime = tsil_runtime::install(&mut metadata);
    let registries = Registries::new();

    let foo = b.atom("Foo");
    let exports = vec![ModuleExport { name: foo, kind: ModuleExportKind::Class }];
    let info = emit_module(&mut metadata, &runtime, &registries, &b.arena, &interner, "./shapes", &[], &exports, &Default::default())
        .expect("class export module should emit");

    let field = info.exports[&foo];
    let init = info.init.expect("$Initialize reserved");
    let body = metadata.method_def(init).body.as_ref().unwrap();

    assert!(!body.iter().any(|i| matches!(i, tsil_image::Instr::StoreStaticField(f) if *f == field)));
}

#[test]
fn module_paths_are_sanitized_into_valid_type_name_fragments() {
    assert_eq!(sanitize_path("./src/math.ts"), "__src_math_ts");
    assert_eq!(sanitize_path("pkg/index"), "pkg_index");
}
