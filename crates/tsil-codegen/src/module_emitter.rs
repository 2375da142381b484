//! Module Emitter (component I, §4.7): gives each source module a
//! sealed `$Module_<sanitized path>` type — one static field per
//! export, plus a parameterless static `$Initialize` method that runs
//! the module's top-level statements once and wires every export field
//! to its final value.
//!
//! A module's top-level bindings are lowered exactly like a function
//! body's locals (`LoweringCx::lower_stmts`, `DispatchMode::Plain`); the
//! only module-specific step is the trailer that copies each exported
//! name's resolved local into its static field, since plain local
//! bindings have no field of their own to already be backed by (unlike
//! a class instance field or an async machine's hoisted field).
//!
//! `tsil-driver` calls this once per module in dependency order (so a
//! re-export's source field token already exists by the time its
//! importing module is emitted) and keeps the returned `ModuleInfo` in
//! `Registries::modules`.

use rustc_hash::FxHashSet;
use tsil_ast::{NodeArena, NodeIndex};
use tsil_common::{Atom, Interner};
use tsil_image::{FieldToken, FieldType, Instr, MetadataBuilder, TypeKind};
use tsil_runtime::RuntimeHandles;

use crate::error::CodegenResult;
use crate::il_emitter::{DispatchMode, LoweringCx};
use crate::registries::{ModuleInfo, Registries};

/// Where one export's runtime value comes from, resolved by the driver
/// before calling `emit_module` (it alone knows the full cross-module
/// picture: which name binds to which top-level declaration, and which
/// other module's field a re-export aliases).
pub enum ModuleExportKind {
    /// `export const x = ...` / `export let x = ...`: the value is
    /// whatever this module's own top-level lowering bound `name` to.
    Local,
    /// `export function foo() {}`: wraps the function's already-defined
    /// method stub as a callable value, the same way a bare function
    /// reference used as a value does elsewhere (`DESIGN.md`).
    Function,
    /// `export class Foo {}`: no runtime value is stored in the export
    /// field — cross-module class references resolve directly through
    /// `Registries::classes` at compile time, not through a loaded
    /// field value (`DESIGN.md`'s note on module exports).
    Class,
    /// `export { x } from './other'` / `export * from './other'`: reads
    /// straight from the already-emitted source module's static field.
    ReExport(FieldToken),
}

pub struct ModuleExport {
    pub name: Atom,
    pub kind: ModuleExportKind,
}

#[allow(clippy::too_many_arguments)]
pub fn emit_module(
    metadata: &mut MetadataBuilder,
    runtime: &RuntimeHandles,
    registries: &Registries,
    arena: &NodeArena,
    interner: &Interner,
    module_path: &str,
    body_stmts: &[NodeIndex],
    exports: &[ModuleExport],
    cell_promoted: &FxHashSet<Atom>,
) -> CodegenResult<ModuleInfo> {
    let type_name = format!("$Module_{}", sanitize_path(module_path));
    let module_type = metadata.define_type(type_name, None, TypeKind::Class, true);

    let mut export_fields = rustc_hash::FxHashMap::default();
    for e in exports {
        let field_name = format!("export_{}", interner.resolve(e.name));
        let field = metadata.define_field(module_type, field_name, true, FieldType::Object);
        export_fields.insert(e.name, field);
    }

    let init = metadata.define_method(module_type, "$Initialize", true, false, 0);

    let mut cx = LoweringCx::new(metadata, runtime, registries, arena, interner, DispatchMode::Plain, None);
    cx.cell_promoted = cell_promoted.clone();
    cx.lower_stmts(body_stmts)?;

    for e in exports {
        let field = export_fields[&e.name];
        match &e.kind {
            ModuleExportKind::Local => {
                if let Some(crate::binding::Binding::Local(slot)) = cx.symbols.resolve(e.name) {
                    cx.emit(Instr::LoadLocal(slot));
                    cx.emit(Instr::StoreStaticField(field));
                }
            }
            ModuleExportKind::Function => {
                if let Some(method) = registries.functions.get(&e.name).and_then(|f| f.method) {
                    cx.emit(Instr::LoadMethodPtr(method));
                    cx.emit(Instr::CallStatic(runtime.ts_function_wrap, 1));
                    cx.emit(Instr::StoreStaticField(field));
                }
            }
            ModuleExportKind::Class => {
                // No store: see `ModuleExportKind::Class` doc comment.
            }
            ModuleExportKind::ReExport(source_field) => {
                cx.emit(Instr::LoadStaticField(*source_field));
                cx.emit(Instr::StoreStaticField(field));
            }
        }
    }
    cx.emit(Instr::RetVoid);

    let shape = cx.finish();
    metadata.set_method_body(init, shape.locals_count, shape.body);

    Ok(ModuleInfo { module_type: Some(module_type), exports: export_fields, init: Some(init) })
}

/// Turns a module specifier into a valid type-name fragment: every
/// character outside `[A-Za-z0-9_]` becomes `_`, matching how the
/// teacher's own name-mangling handles path separators and extensions.
fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
#[path = "tests/module_emitter.rs"]
mod tests;
