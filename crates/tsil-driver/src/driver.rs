//! The Compiler Driver (component G, §4.1): owns `MetadataBuilder` and
//! `Registries` for the lifetime of one `compile`/`compile_modules` call
//! and runs the fixed 11-phase pipeline, handing each phase subroutine
//! exactly the handles it needs and nothing more.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use tsil_analysis::async_analysis::analyze_async_function;
use tsil_analysis::closure::{CaptureSet, ClosureAnalyzer};
use tsil_analysis::type_mapper::TypeMapper;
use tsil_ast::{
    BindingName, ClassData, ClassMemberKind, DeadCodeInfo, EnumData, EnumInitializer, ExportItem,
    FunctionData, Module, ModuleResolver, NodeArena, NodeIndex, NodeKind, Param, TypeMap,
};
use tsil_codegen::il_emitter::DispatchMode;
use tsil_codegen::module_emitter::{self, ModuleExport, ModuleExportKind};
use tsil_codegen::registries::{ArrowInfo, AsyncMachine, ClassInfo, EnumInfo, EnumKind, EnumValue, Registries};
use tsil_codegen::{build_async_machine, emit_move_next, AsyncMachineKind, CodegenError, LoweringCx};
use tsil_common::{Atom, Diagnostic, Interner, Span};
use tsil_image::{FieldToken, FieldType, Instr, MetadataBuilder, MethodToken, OpcodeBuilder, TypeKind, TypeToken};
use tsil_runtime::RuntimeHandles;

use crate::config::CompilerConfig;
use crate::constfold::{eval_const_expr, ConstValue};
use crate::error::{CompileError, CompileResult};
use crate::walk::{body_stmts, collect_generic_arrows, collect_top_level_decls, TopLevelDecls};

/// The finalized program: the serialized bytes per §6's external
/// interface, plus the metadata that produced them (kept around so
/// in-process callers — the test-only reference interpreter chiefly —
/// can drive it without re-parsing the image).
pub struct CompiledImage {
    pub bytes: Vec<u8>,
    pub metadata: MetadataBuilder,
}

/// One async function/method/arrow body not yet given a state machine.
/// Collected alongside the rest of the declaration walk and processed
/// as a batch so every class stub already exists before any async body
/// starts referencing one.
struct AsyncRoot {
    params: Vec<Param>,
    body: Vec<NodeIndex>,
    type_name: String,
    is_generator: bool,
    home: AsyncRootHome,
}

enum AsyncRootHome {
    Function(Atom),
    Method { stub: MethodToken },
    TopLevelArrow(NodeIndex),
}

pub struct CompilerDriver<'a> {
    metadata: MetadataBuilder,
    runtime: RuntimeHandles,
    registries: Registries,
    interner: &'a Interner,
    type_map: &'a TypeMap,
    config: CompilerConfig,
    program_type: TypeToken,
    /// Every type token created, in creation order, for the finalize
    /// pass — `$Program` is excluded (created first, finalized last
    /// separately) since functions are defined on it throughout.
    all_types: Vec<TypeToken>,
    /// Names captured by *some* arrow anywhere in the compilation unit
    /// (§4.2/§4.4 "cell promotion"), populated per unit by
    /// `closure_analyze` and consulted by every lowering phase after.
    cell_promoted: FxHashSet<Atom>,
    class_types: FxHashMap<Atom, TypeToken>,
    cctors: Vec<MethodToken>,
}

impl<'a> CompilerDriver<'a> {
    fn new(interner: &'a Interner, type_map: &'a TypeMap, config: CompilerConfig) -> Self {
        let mut metadata = MetadataBuilder::new();
        let runtime = tsil_runtime::install(&mut metadata);
        let program_type = metadata.define_type("$Program", None, TypeKind::Class, true);
        debug!(type_name = "$Program", "defined program type");
        CompilerDriver {
            metadata,
            runtime,
            registries: Registries::new(),
            interner,
            type_map,
            config,
            program_type,
            all_types: Vec::new(),
            cell_promoted: FxHashSet::default(),
            class_types: FxHashMap::default(),
            cctors: Vec::new(),
        }
    }

    fn resolve(&self, a: Atom) -> &str {
        self.interner.resolve(a)
    }

    /// Resolves a class instance/static field's declared type to a
    /// metadata `FieldType` — the one place this backend consults the
    /// Type Mapper (`DESIGN.md`): the initializer expression is the
    /// only node a field declaration gives us to look up in the type
    /// map, so a named class type that has already been registered
    /// narrows to `FieldType::Typed`; everything else (numbers,
    /// booleans, strings, no initializer, unresolved) stays `Object`.
    fn member_field_type(&self, init: Option<NodeIndex>) -> FieldType {
        let Some(init) = init else { return FieldType::Object };
        let Some(inferred) = self.type_map.get(init) else { return FieldType::Object };
        let enum_types = FxHashMap::default();
        let mapper = TypeMapper::new(&self.class_types, &enum_types);
        match mapper.resolve_named_type(inferred) {
            Some(tok) => FieldType::Typed(tok),
            None => FieldType::Object,
        }
    }

    // ---- closure analysis ----

    fn closure_analyze(&mut self, arena: &NodeArena, statements: &[NodeIndex]) -> FxHashMap<NodeIndex, CaptureSet> {
        let captures = ClosureAnalyzer::new(arena).analyze(statements);
        for set in captures.values() {
            self.cell_promoted.extend(set.names.iter().copied());
        }
        captures
    }

    // ---- declaration types ----

    fn define_declarations(&mut self, arena: &NodeArena, decls: &TopLevelDecls, dead_code_info: Option<&DeadCodeInfo>) -> CompileResult<()> {
        self.define_classes(arena, &decls.classes, dead_code_info)?;
        self.define_enums(arena, &decls.enums)?;
        self.define_functions(&decls.functions);
        Ok(())
    }

    fn define_classes(&mut self, arena: &NodeArena, classes: &[ClassData], dead_code_info: Option<&DeadCodeInfo>) -> CompileResult<()> {
        // Base classes must exist before their subclasses (a `TypeDef`'s
        // `base` is fixed at creation) — process in a small fixed-point
        // loop rather than demanding the source declare them in order.
        let mut remaining: Vec<&ClassData> = classes.iter().collect();
        let mut rounds = 0usize;
        while !remaining.is_empty() {
            rounds += 1;
            if rounds > classes.len() + 1 {
                return Err(CodegenError::ast_malformed("cyclic class inheritance", Span::dummy()).into());
            }
            let mut next_remaining = Vec::new();
            for class in remaining {
                let Some(name) = class.name else { continue };
                let base_token = match class.super_class {
                    Some(sup) => match self.class_types.get(&sup) {
                        Some(&tok) => Some(tok),
                        None => {
                            next_remaining.push(class);
                            continue;
                        }
                    },
                    None => None,
                };
                let type_name = self.resolve(name).to_string();
                let type_token = self.metadata.define_type(&type_name, base_token, TypeKind::Class, false);
                self.all_types.push(type_token);
                self.class_types.insert(name, type_token);
                debug!(class = %type_name, "defined class type");

                let info = self.predeclare_class_members(class, type_token, dead_code_info)?;
                self.registries.classes.insert(name, info);
            }
            remaining = next_remaining;
        }
        Ok(())
    }

    fn predeclare_class_members(&mut self, class: &ClassData, type_token: TypeToken, dead_code_info: Option<&DeadCodeInfo>) -> CompileResult<ClassInfo> {
        let mut info = ClassInfo { type_token: Some(type_token), ..ClassInfo::default() };
        info.super_class = class.super_class.filter(|s| self.class_types.contains_key(s));

        let mut seen_with_body: FxHashSet<Atom> = FxHashSet::default();
        for m in &class.members {
            if m.kind == ClassMemberKind::Method && m.body.is_some() {
                seen_with_body.insert(m.name);
            }
        }

        for m in &class.members {
            if !self.config.skip_dead_code_info {
                if let Some(dci) = dead_code_info {
                    if m.kind != ClassMemberKind::Field && m.body.is_some_and(|b| dci.is_unreachable(b)) {
                        continue;
                    }
                }
            }
            match m.kind {
                ClassMemberKind::Field => {
                    let field_type = self.member_field_type(m.body);
                    let name_str = self.resolve(m.name).to_string();
                    let field = self.metadata.define_field(type_token, &name_str, m.is_static, field_type);
                    if m.is_static {
                        info.static_fields.insert(m.name, field);
                        if let Some(init) = m.body {
                            info.static_field_inits.push((field, init));
                        }
                    } else {
                        info.instance_fields.insert(m.name, field);
                    }
                }
                ClassMemberKind::Constructor => {
                    if m.body.is_none() {
                        continue;
                    }
                    let tok = self.metadata.define_method(type_token, "$ctor", false, false, m.params.len() as u16);
                    info.ctor = Some(tok);
                }
                ClassMemberKind::Method => {
                    if m.body.is_none() {
                        if !seen_with_body.contains(&m.name) {
                            let name_str = self.resolve(m.name).to_string();
                            return Err(CodegenError::missing_function_body(&name_str, Span::dummy()).into());
                        }
                        continue;
                    }
                    let name_str = self.resolve(m.name).to_string();
                    let tok = self.metadata.define_method(type_token, &name_str, m.is_static, !m.is_static, m.params.len() as u16);
                    if m.is_static {
                        info.static_methods.insert(m.name, tok);
                    } else {
                        info.instance_methods.insert(m.name, tok);
                    }
                    if m.is_async {
                        info.async_methods.insert(m.name);
                    }
                }
                ClassMemberKind::Getter => {
                    if m.body.is_none() {
                        continue;
                    }
                    let name_str = format!("get_{}", self.resolve(m.name));
                    let tok = self.metadata.define_method(type_token, name_str, m.is_static, !m.is_static, 0);
                    info.instance_getters.insert(m.name, tok);
                }
                ClassMemberKind::Setter => {
                    if m.body.is_none() {
                        continue;
                    }
                    let name_str = format!("set_{}", self.resolve(m.name));
                    let tok = self.metadata.define_method(type_token, name_str, m.is_static, !m.is_static, 1);
                    info.instance_setters.insert(m.name, tok);
                }
            }
        }

        // A class with a superclass but no user-written constructor
        // still needs one to forward construction through the base
        // chain — synthesized here as a zero-argument `super()` call,
        // since the member list carries no variadic-forwarding shape to
        // replay (`DESIGN.md`).
        if info.ctor.is_none() && info.super_class.is_some() {
            let tok = self.metadata.define_method(type_token, "$ctor", false, false, 0);
            info.ctor = Some(tok);
            info.synthesized_default_ctor = true;
        }

        if !info.static_field_inits.is_empty() {
            let cctor = self.metadata.define_method(type_token, "$cctor", true, false, 0);
            info.cctor = Some(cctor);
        }

        Ok(info)
    }

    fn define_enums(&mut self, arena: &NodeArena, enums: &[EnumData]) -> CompileResult<()> {
        for e in enums {
            let mut members = FxHashMap::default();
            let mut reverse = FxHashMap::default();
            let mut kind: Option<EnumKind> = None;
            let mut siblings: FxHashMap<Atom, ConstValue> = FxHashMap::default();
            let mut last_numeric: Option<f64> = None;
            for member in &e.members {
                let value = match member.initializer {
                    EnumInitializer::Expr(expr) => match eval_const_expr(arena, &siblings, expr) {
                        Some(v) => v,
                        None => {
                            let enum_name = self.resolve(e.name).to_string();
                            let member_name = self.resolve(member.name).to_string();
                            return Err(CodegenError::invalid_enum_initializer(&enum_name, &member_name, arena.span(expr)).into());
                        }
                    },
                    // An auto-numbered member takes the immediately
                    // preceding member's numeric value plus one, not the
                    // max of every prior numeric member: `A = 5, B, C =
                    // 1, D` gives `D = 2` (`C` + 1), not `6`.
                    EnumInitializer::None => ConstValue::Number(last_numeric.map_or(0.0, |n| n + 1.0)),
                };
                if let ConstValue::Number(n) = value {
                    last_numeric = Some(n);
                }
                siblings.insert(member.name, value);
                let enum_value = match value {
                    ConstValue::Number(n) => {
                        kind = Some(match kind {
                            Some(EnumKind::String) => EnumKind::Heterogeneous,
                            _ => kind.unwrap_or(EnumKind::Numeric),
                        });
                        reverse.insert(n as i64, member.name);
                        EnumValue::Number(n)
                    }
                    ConstValue::Str(s) => {
                        kind = Some(match kind {
                            Some(EnumKind::Numeric) => EnumKind::Heterogeneous,
                            _ => kind.unwrap_or(EnumKind::String),
                        });
                        EnumValue::String(s)
                    }
                };
                members.insert(member.name, enum_value);
            }
            self.registries.enums.insert(e.name, EnumInfo { kind, members, reverse, is_const: e.is_const });
        }
        Ok(())
    }

    fn define_functions(&mut self, functions: &[(Atom, FunctionData)]) {
        for (name, data) in functions {
            if data.is_async {
                self.registries.function_mut(*name).is_async = true;
                continue;
            }
            let rest = rest_info(&data.params);
            let name_str = self.resolve(*name).to_string();
            let tok = self.metadata.define_method(self.program_type, &name_str, true, false, data.params.len() as u16);
            let info = self.registries.function_mut(*name);
            info.method = Some(tok);
            info.is_generator = data.is_generator;
            if let Some((rest_idx, regular)) = rest {
                info.rest = Some(tsil_codegen::registries::FunctionRest { rest_param_index: rest_idx, regular_param_count: regular });
            }
        }
    }

    // ---- non-async top-level function bodies ----

    fn emit_function_bodies(&mut self, arena: &NodeArena, functions: &[(Atom, FunctionData)]) -> CompileResult<()> {
        for (name, data) in functions {
            if data.is_async {
                continue;
            }
            let Some(tok) = self.registries.functions.get(name).and_then(|f| f.method) else { continue };
            let rest = rest_info(&data.params);
            let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, None);
            cx.cell_promoted = self.cell_promoted.clone();
            cx.lower_params(&data.params, 0, rest)?;
            lower_value_returning_body(&mut cx, arena, data.body)?;
            let shape = cx.finish();
            self.metadata.set_method_body(tok, shape.locals_count, shape.body);
        }
        Ok(())
    }

    // ---- async roots ----

    fn collect_async_roots(&self, arena: &NodeArena, decls: &TopLevelDecls) -> (Vec<AsyncRoot>, FxHashSet<NodeIndex>) {
        let mut roots = Vec::new();
        let mut owned = FxHashSet::default();

        for (name, data) in &decls.functions {
            if data.is_async {
                roots.push(AsyncRoot {
                    params: data.params.clone(),
                    body: body_stmts(arena, data.body, false),
                    type_name: format!("$AsyncFn_{}", self.resolve(*name)),
                    is_generator: data.is_generator,
                    home: AsyncRootHome::Function(*name),
                });
            }
        }

        for class in &decls.classes {
            let Some(cname) = class.name else { continue };
            let Some(class_info) = self.registries.classes.get(&cname) else { continue };
            for m in &class.members {
                if m.kind != ClassMemberKind::Method || !m.is_async {
                    continue;
                }
                let Some(body) = m.body else { continue };
                let stub = if m.is_static { class_info.static_methods.get(&m.name).copied() } else { class_info.instance_methods.get(&m.name).copied() };
                let Some(stub) = stub else { continue };
                roots.push(AsyncRoot {
                    params: m.params.clone(),
                    body: body_stmts(arena, body, false),
                    type_name: format!("$AsyncMethod_{}_{}", self.resolve(cname), self.resolve(m.name)),
                    is_generator: m.is_generator,
                    home: AsyncRootHome::Method { stub },
                });
            }
        }

        for (name, arrow_node) in &decls.var_arrows {
            let NodeKind::Arrow(data) = arena.get(*arrow_node).kind.clone() else { continue };
            if !data.is_async {
                continue;
            }
            owned.insert(*arrow_node);
            roots.push(AsyncRoot {
                params: data.params.clone(),
                body: body_stmts(arena, data.body, true),
                type_name: format!("$AsyncArrow_{}", self.resolve(*name)),
                is_generator: data.is_generator,
                home: AsyncRootHome::TopLevelArrow(*arrow_node),
            });
        }

        (roots, owned)
    }

    fn process_async_roots(
        &mut self,
        arena: &NodeArena,
        roots: Vec<AsyncRoot>,
        captures: &FxHashMap<NodeIndex, CaptureSet>,
        async_owned: &mut FxHashSet<NodeIndex>,
    ) -> CompileResult<()> {
        for root in roots {
            let analysis = analyze_async_function(arena, captures, &root.params, &root.body);
            for info in &analysis.async_arrows {
                async_owned.insert(info.node);
            }
            let has_direct_children = analysis.async_arrows.iter().any(|i| i.parent_arrow.is_none());
            let machine = build_async_machine(
                &mut self.metadata,
                &self.runtime,
                self.interner,
                &root.type_name,
                &root.params,
                &analysis,
                AsyncMachineKind::TopLevel,
                root.is_generator,
                has_direct_children,
            );
            self.all_types.push(machine.type_token.unwrap());

            // Pre-define every nested machine (a parent always precedes
            // its child in `analysis.async_arrows`) before emitting any
            // body — the phased-stub discipline extended to async
            // machines.
            let mut parent_of: FxHashMap<NodeIndex, Option<NodeIndex>> = FxHashMap::default();
            for info in &analysis.async_arrows {
                parent_of.insert(info.node, info.parent_arrow);
                let NodeKind::Arrow(data) = arena.get(info.node).kind.clone() else { continue };
                let outer_token = match info.parent_arrow {
                    Some(p) => self.registries.async_arrows.get(&p).and_then(|m| m.type_token).unwrap_or(machine.type_token.unwrap()),
                    None => machine.type_token.unwrap(),
                };
                let has_children = analysis.async_arrows.iter().any(|i| i.parent_arrow == Some(info.node));
                let own_body = body_stmts(arena, data.body, true);
                let own_analysis = analyze_async_function(arena, captures, &data.params, &own_body);
                let child = build_async_machine(
                    &mut self.metadata,
                    &self.runtime,
                    self.interner,
                    &format!("$AsyncArrow_n{}", info.node.0),
                    &data.params,
                    &own_analysis,
                    AsyncMachineKind::Arrow { outer: outer_token, captures: &info.captures },
                    false,
                    has_children,
                );
                self.all_types.push(child.type_token.unwrap());
                self.registries.async_arrows.insert(info.node, child);
                if let Some(p) = info.parent_arrow {
                    self.registries.async_arrow_parent.insert(info.node, p);
                }
            }

            let current_class = root_current_class(&root.home, &self.registries);
            emit_move_next(
                &mut self.metadata,
                &self.runtime,
                &self.registries,
                arena,
                self.interner,
                &machine,
                &root.body,
                current_class,
                Vec::new(),
                &self.cell_promoted,
            )?;

            for info in &analysis.async_arrows {
                let NodeKind::Arrow(data) = arena.get(info.node).kind.clone() else { continue };
                let child = self.registries.async_arrows.get(&info.node).cloned().unwrap();
                let own_body = body_stmts(arena, data.body, true);
                let outer_chain = build_outer_chain(info.node, &parent_of, &self.registries);
                emit_move_next(
                    &mut self.metadata,
                    &self.runtime,
                    &self.registries,
                    arena,
                    self.interner,
                    &child,
                    &own_body,
                    current_class,
                    outer_chain,
                    &self.cell_promoted,
                )?;
            }

            self.build_entry_stub(&root, &machine)?;
        }
        Ok(())
    }

    fn build_entry_stub(&mut self, root: &AsyncRoot, machine: &AsyncMachine) -> CompileResult<()> {
        let is_method = matches!(root.home, AsyncRootHome::Method { .. });
        let (locals, body) = entry_stub_body(&self.runtime, machine, &root.params, is_method);
        match &root.home {
            AsyncRootHome::Function(name) => {
                let name_str = self.resolve(*name).to_string();
                let tok = self.metadata.define_method(self.program_type, &name_str, true, false, root.params.len() as u16);
                self.metadata.set_method_body(tok, locals, body);
                let info = self.registries.function_mut(*name);
                info.method = Some(tok);
                info.is_async = true;
                info.is_generator = root.is_generator;
            }
            AsyncRootHome::Method { stub } => {
                self.metadata.set_method_body(*stub, locals, body);
            }
            AsyncRootHome::TopLevelArrow(node) => {
                let tok = self.metadata.define_method(self.program_type, &root.type_name, true, false, root.params.len() as u16);
                self.metadata.set_method_body(tok, locals, body);
                self.registries.arrow_mut(*node).method = Some(tok);
            }
        }
        Ok(())
    }

    // ---- generic (non-async-owned) arrows ----

    fn register_generic_arrows(&mut self, arena: &NodeArena, roots: &[NodeIndex], async_owned: &FxHashSet<NodeIndex>) -> Vec<NodeIndex> {
        let mut arrows = Vec::new();
        collect_generic_arrows(arena, roots, async_owned, &mut arrows);

        for &idx in &arrows {
            let NodeKind::Arrow(data) = arena.get(idx).kind.clone() else { continue };
            // Every generic arrow gets a display class: this pass has no
            // arrow-scoped capture set available (only async-owned
            // arrows carry one, via `AsyncFunctionAnalysis`), and a
            // non-capturing arrow still works correctly through an
            // `Invoke` method that simply never reads a field (the
            // non-capturing fast path is an optimization this pass does
            // not chase, per `DESIGN.md`).
            let type_name = format!("$Display_n{}", idx.0);
            let display_type = self.metadata.define_type(&type_name, None, TypeKind::Class, true);
            self.all_types.push(display_type);
            let ctor = self.metadata.define_method(display_type, "$ctor", false, false, 0);
            let invoke = self.metadata.define_method(display_type, "Invoke", false, true, data.params.len() as u16);
            let info = ArrowInfo { display_class: Some(display_type), display_ctor: Some(ctor), invoke: Some(invoke), ..ArrowInfo::default() };
            self.registries.arrows.insert(idx, info);
        }
        arrows
    }

    fn emit_generic_arrow_bodies(&mut self, arena: &NodeArena, arrows: &[NodeIndex]) -> CompileResult<()> {
        for &idx in arrows {
            let NodeKind::Arrow(data) = arena.get(idx).kind.clone() else { continue };
            let Some(info) = self.registries.arrows.get(&idx).cloned() else { continue };
            let (Some(ctor), Some(invoke)) = (info.display_ctor, info.invoke) else { continue };

            let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, None);
            cx.cell_promoted = self.cell_promoted.clone();
            cx.lower_params(&data.params, 0, rest_info(&data.params))?;
            lower_value_returning_body(&mut cx, arena, data.body)?;
            let shape = cx.finish();
            self.metadata.set_method_body(invoke, shape.locals_count, shape.body);

            let mut ctor_builder = OpcodeBuilder::new();
            ctor_builder.emit(Instr::RetVoid);
            self.metadata.set_method_body(ctor, 0, ctor_builder.finish());
        }
        Ok(())
    }

    // ---- class method/ctor/cctor bodies ----

    fn emit_class_bodies(&mut self, arena: &NodeArena, classes: &[ClassData]) -> CompileResult<()> {
        for class in classes {
            let Some(cname) = class.name else { continue };
            let Some(info) = self.registries.classes.get(&cname).cloned() else { continue };
            for m in &class.members {
                if m.is_async || m.body.is_none() {
                    continue;
                }
                let body = m.body.unwrap();
                match m.kind {
                    ClassMemberKind::Field => continue,
                    ClassMemberKind::Constructor => {
                        let Some(ctor) = info.ctor else { continue };
                        let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, Some(cname));
                        cx.cell_promoted = self.cell_promoted.clone();
                        cx.lower_params(&m.params, 1, rest_info(&m.params))?;
                        cx.lower_block(body)?;
                        cx.emit(Instr::RetVoid);
                        let shape = cx.finish();
                        self.metadata.set_method_body(ctor, shape.locals_count, shape.body);
                    }
                    ClassMemberKind::Method => {
                        let tok = if m.is_static { info.static_methods.get(&m.name).copied() } else { info.instance_methods.get(&m.name).copied() };
                        let Some(tok) = tok else { continue };
                        let offset: u16 = if m.is_static { 0 } else { 1 };
                        let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, Some(cname));
                        cx.cell_promoted = self.cell_promoted.clone();
                        cx.lower_params(&m.params, offset, rest_info(&m.params))?;
                        lower_value_returning_body(&mut cx, arena, body)?;
                        let shape = cx.finish();
                        self.metadata.set_method_body(tok, shape.locals_count, shape.body);
                    }
                    ClassMemberKind::Getter | ClassMemberKind::Setter => {
                        let tok = if m.kind == ClassMemberKind::Getter {
                            info.instance_getters.get(&m.name).copied()
                        } else {
                            info.instance_setters.get(&m.name).copied()
                        };
                        let Some(tok) = tok else { continue };
                        let offset: u16 = if m.is_static { 0 } else { 1 };
                        let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, Some(cname));
                        cx.cell_promoted = self.cell_promoted.clone();
                        cx.lower_params(&m.params, offset, rest_info(&m.params))?;
                        lower_value_returning_body(&mut cx, arena, body)?;
                        let shape = cx.finish();
                        self.metadata.set_method_body(tok, shape.locals_count, shape.body);
                    }
                }
            }

            if info.synthesized_default_ctor {
                if let (Some(ctor), Some(sup)) = (info.ctor, info.super_class) {
                    let super_ctor = self.registries.classes.get(&sup).and_then(|ci| ci.ctor);
                    let mut b = OpcodeBuilder::new();
                    b.emit(Instr::LoadThis);
                    if let Some(sc) = super_ctor {
                        b.emit(Instr::CallDirect(sc, 1));
                    } else {
                        b.emit(Instr::Pop);
                    }
                    b.emit(Instr::RetVoid);
                    self.metadata.set_method_body(ctor, 0, b.finish());
                }
            }

            if let Some(cctor) = info.cctor {
                let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, Some(cname));
                cx.cell_promoted = self.cell_promoted.clone();
                for &(field, init) in &info.static_field_inits {
                    cx.lower_expr(init)?;
                    cx.box_if_primitive(init);
                    cx.emit(Instr::StoreStaticField(field));
                }
                cx.emit(Instr::RetVoid);
                let shape = cx.finish();
                self.metadata.set_method_body(cctor, shape.locals_count, shape.body);
                self.cctors.push(cctor);
            }
        }
        Ok(())
    }

    fn finalize_types(&mut self) {
        for &t in &self.all_types {
            self.metadata.finalize_type(t);
        }
        self.metadata.finalize_type(self.program_type);
    }

    fn lower_main_body(&mut self, arena: &NodeArena, statements: &[NodeIndex]) -> CompileResult<(u16, Vec<Instr>)> {
        let cctors = self.cctors.clone();
        let mut cx = LoweringCx::new(&mut self.metadata, &self.runtime, &self.registries, arena, self.interner, DispatchMode::Plain, None);
        cx.cell_promoted = self.cell_promoted.clone();
        for cctor in cctors {
            cx.emit(Instr::CallStatic(cctor, 0));
        }
        cx.lower_stmts(statements)?;
        cx.emit(Instr::RetVoid);
        let shape = cx.finish();
        Ok((shape.locals_count, shape.body))
    }
}

fn rest_info(params: &[Param]) -> Option<(usize, usize)> {
    params.iter().position(|p| p.rest).map(|idx| (idx, idx))
}

/// Normalizes the two shapes a value-producing body can take: a block
/// of statements (implicit `undefined` on fallthrough) or — arrows
/// only — a bare expression standing in for `return <expr>`.
fn lower_value_returning_body(cx: &mut LoweringCx, arena: &NodeArena, body: NodeIndex) -> CompileResult<()> {
    if matches!(arena.get(body).kind, NodeKind::Block(_)) {
        cx.lower_block(body)?;
        cx.emit(Instr::LoadUndefined);
        cx.emit_final_return();
    } else {
        cx.lower_expr(body)?;
        cx.emit_final_return();
    }
    Ok(())
}

fn root_current_class(home: &AsyncRootHome, registries: &Registries) -> Option<Atom> {
    match home {
        AsyncRootHome::Method { stub } => registries
            .classes
            .iter()
            .find(|(_, ci)| ci.instance_methods.values().any(|m| m == stub) || ci.static_methods.values().any(|m| m == stub))
            .map(|(name, _)| *name),
        _ => None,
    }
}

fn build_outer_chain(node: NodeIndex, parent_of: &FxHashMap<NodeIndex, Option<NodeIndex>>, registries: &Registries) -> Vec<FieldToken> {
    let mut chain = Vec::new();
    let machine = registries.async_arrows.get(&node).expect("machine built before outer_chain computed");
    if let Some(f) = machine.outer_field {
        chain.push(f);
    }
    let mut cur = parent_of.get(&node).copied().flatten();
    while let Some(p) = cur {
        if let Some(pm) = registries.async_arrows.get(&p) {
            if let Some(f) = pm.outer_field {
                chain.push(f);
            }
        }
        cur = parent_of.get(&p).copied().flatten();
    }
    chain
}

/// Builds the entry-stub body shared by every async root flavor:
/// allocate the machine, seed its fields, run the first `MoveNext`
/// step, and hand back whatever the caller of an `async` function
/// actually observes — a `Task`-shaped value for an ordinary async
/// function, or the bare machine instance for a generator (no builder
/// method beyond `current`/`done` exists in this runtime, so a
/// generator's own consumer drives `MoveNext` directly — `DESIGN.md`).
fn entry_stub_body(runtime: &RuntimeHandles, machine: &AsyncMachine, params: &[Param], is_method: bool) -> (u16, Vec<Instr>) {
    let mut b = OpcodeBuilder::new();
    let type_token = machine.type_token.unwrap();
    let state_field = machine.state_field.unwrap();
    let builder_field = machine.builder_field.unwrap();

    let m: u16 = 0;

    b.emit(Instr::NewObj(type_token, 0));
    b.emit(Instr::StoreLocal(m));

    if is_method {
        if let Some(this_field) = machine.this_field {
            b.emit(Instr::LoadLocal(m));
            b.emit(Instr::LoadThis);
            b.emit(Instr::StoreField(this_field));
        }
    }

    for (i, p) in params.iter().enumerate() {
        if p.rest {
            continue;
        }
        if let BindingName::Identifier(name) = p.name {
            if let Some(&field) = machine.hoisted_params.get(&name) {
                b.emit(Instr::LoadLocal(m));
                b.emit(Instr::LoadArg(i as u16));
                b.emit(Instr::StoreField(field));
            }
        }
    }

    b.emit(Instr::LoadLocal(m));
    b.emit(Instr::LoadConstNum(-1.0));
    b.emit(Instr::StoreField(state_field));

    if let Some(self_boxed) = machine.self_boxed_field {
        b.emit(Instr::LoadLocal(m));
        b.emit(Instr::LoadLocal(m));
        b.emit(Instr::StoreField(self_boxed));
    }

    b.emit(Instr::LoadLocal(m));
    if machine.is_generator {
        b.emit(Instr::NewObj(runtime.iterator_builder_type, 0));
        b.emit(Instr::Dup);
        b.emit(Instr::LoadUndefined);
        b.emit(Instr::StoreField(runtime.iterator_current_field));
        b.emit(Instr::Dup);
        b.emit(Instr::LoadBool(false));
        b.emit(Instr::StoreField(runtime.iterator_done_field));
    } else {
        b.emit(Instr::CallStatic(runtime.task_builder_create, 0));
    }
    b.emit(Instr::StoreField(builder_field));

    b.emit(Instr::LoadLocal(m));
    b.emit(Instr::CallDirect(machine.move_next.unwrap(), 1));

    if machine.is_generator {
        b.emit(Instr::LoadLocal(m));
    } else {
        b.emit(Instr::LoadLocal(m));
        b.emit(Instr::LoadField(builder_field));
        b.emit(Instr::CallVirtual(runtime.task_builder_get_task, 1));
    }
    b.emit(Instr::Ret);

    (1, b.finish())
}

/// Lowers one statement list end to end: closure analysis, declaration
/// definition, async machines, generic arrows, function/class bodies.
/// Shared by `compile`'s single implicit unit and each module
/// `compile_modules` processes, which differ only in how the result
/// feeds the entry point.
fn process_unit(driver: &mut CompilerDriver, arena: &NodeArena, statements: &[NodeIndex], dead_code_info: Option<&DeadCodeInfo>) -> CompileResult<()> {
    let captures = driver.closure_analyze(arena, statements);
    let decls = collect_top_level_decls(arena, statements);
    driver.define_declarations(arena, &decls, dead_code_info)?;

    let (roots, mut async_owned) = driver.collect_async_roots(arena, &decls);
    driver.process_async_roots(arena, roots, &captures, &mut async_owned)?;

    let arrows = driver.register_generic_arrows(arena, statements, &async_owned);
    driver.emit_generic_arrow_bodies(arena, &arrows)?;

    driver.emit_function_bodies(arena, &decls.functions)?;
    driver.emit_class_bodies(arena, &decls.classes)?;
    Ok(())
}

/// Entry point for a single, already-merged compilation unit (§4.1,
/// single-module form): every top-level statement lowers straight into
/// `$Program.Main`.
pub fn compile(
    arena: &NodeArena,
    statements: &[NodeIndex],
    interner: &Interner,
    type_map: &TypeMap,
    dead_code_info: Option<&DeadCodeInfo>,
    config: CompilerConfig,
) -> CompileResult<CompiledImage> {
    let mut driver = CompilerDriver::new(interner, type_map, config.clone());
    process_unit(&mut driver, arena, statements, dead_code_info)?;

    let (locals, body) = driver.lower_main_body(arena, statements)?;
    let main = driver.metadata.define_method(driver.program_type, "Main", true, false, 0);
    driver.metadata.set_method_body(main, locals, body);
    driver.metadata.set_entry_point(main);

    driver.finalize_types();
    finish(driver, &config)
}

/// Entry point for the multi-module form (§4.7): each module gets its
/// own `$Module_<path>` type and `$Initialize`, processed in the
/// dependency order the caller already resolved; the outermost `Main`
/// calls every `$Initialize` in that same order.
pub fn compile_modules(
    modules: Vec<Module>,
    resolver: &dyn ModuleResolver,
    interner: &Interner,
    type_map: &TypeMap,
    dead_code_info: Option<&DeadCodeInfo>,
    config: CompilerConfig,
) -> CompileResult<CompiledImage> {
    let mut driver = CompilerDriver::new(interner, type_map, config.clone());
    let mut init_order: Vec<MethodToken> = Vec::new();

    for module in &modules {
        let arena = &module.arena;
        let statements = &module.statements;
        process_unit(&mut driver, arena, statements, dead_code_info)?;

        let exports = collect_module_exports(&driver, arena, statements, &module.path, resolver);
        let module_info = module_emitter::emit_module(
            &mut driver.metadata,
            &driver.runtime,
            &driver.registries,
            arena,
            interner,
            &module.path,
            statements,
            &exports,
            &driver.cell_promoted,
        )?;
        driver.all_types.push(module_info.module_type.unwrap());
        init_order.push(module_info.init.unwrap());
        driver.registries.modules.insert(module.path.clone(), module_info);
        driver.registries.module_order.push(module.path.clone());
    }

    let mut b = OpcodeBuilder::new();
    for tok in init_order {
        b.emit(Instr::CallStatic(tok, 0));
    }
    b.emit(Instr::RetVoid);
    let main = driver.metadata.define_method(driver.program_type, "Main", true, false, 0);
    driver.metadata.set_method_body(main, 0, b.finish());
    driver.metadata.set_entry_point(main);

    driver.finalize_types();
    finish(driver, &config)
}

fn collect_module_exports(driver: &CompilerDriver, arena: &NodeArena, statements: &[NodeIndex], module_path: &str, resolver: &dyn ModuleResolver) -> Vec<ModuleExport> {
    let mut exports = Vec::new();
    for &stmt in statements {
        match &arena.get(stmt).kind {
            NodeKind::ExportDecl(inner) => match &arena.get(*inner).kind {
                NodeKind::FunctionDecl(data) => {
                    if let Some(name) = data.name {
                        exports.push(ModuleExport { name, kind: ModuleExportKind::Function });
                    }
                }
                NodeKind::ClassDecl(data) => {
                    if let Some(name) = data.name {
                        exports.push(ModuleExport { name, kind: ModuleExportKind::Class });
                    }
                }
                NodeKind::VarDeclStmt { decls, .. } => {
                    for d in decls {
                        if let BindingName::Identifier(name) = d.name {
                            exports.push(ModuleExport { name, kind: ModuleExportKind::Local });
                        }
                    }
                }
                // Enums fold to literals at use sites (no runtime value
                // lives in a field) — nothing to copy out.
                NodeKind::EnumDecl(_) => {}
                _ => {}
            },
            NodeKind::ExportNamed { items, from: None } => {
                for item in items {
                    let ExportItem::Named { local, exported: _ } = item;
                    exports.push(ModuleExport { name: *local, kind: ModuleExportKind::Local });
                }
            }
            NodeKind::ExportNamed { items, from: Some(spec) } => {
                let spec_str = driver.resolve(*spec).to_string();
                if let Some(source_path) = resolver.resolve(&spec_str, module_path) {
                    if let Some(source_module) = driver.registries.modules.get(&source_path) {
                        for item in items {
                            let ExportItem::Named { local, exported } = item;
                            if let Some(&field) = source_module.exports.get(local) {
                                exports.push(ModuleExport { name: *exported, kind: ModuleExportKind::ReExport(field) });
                            }
                        }
                    }
                }
            }
            NodeKind::ExportAll { from } => {
                let from_str = driver.resolve(*from).to_string();
                if let Some(source_path) = resolver.resolve(&from_str, module_path) {
                    if let Some(source_module) = driver.registries.modules.get(&source_path) {
                        for (&name, &field) in &source_module.exports {
                            exports.push(ModuleExport { name, kind: ModuleExportKind::ReExport(field) });
                        }
                    }
                }
            }
            _ => {}
        }
    }
    exports
}

fn finish(driver: CompilerDriver, config: &CompilerConfig) -> CompileResult<CompiledImage> {
    let metadata = driver.metadata;
    let bytes = tsil_image::serialize(&metadata)?;
    if let Some(path) = &config.output_path {
        tsil_image::write_to_path(&metadata, path)?;
    }
    Ok(CompiledImage { bytes, metadata })
}

#[allow(unused)]
fn _assert_error_types() {
    let _: fn(Diagnostic) -> CompileError = CompileError::from;
}
