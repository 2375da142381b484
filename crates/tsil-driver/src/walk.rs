//! Whole-program AST traversal helpers the phase orchestration in
//! `driver.rs` needs: unwrapping `export` wrappers, normalizing a
//! single-statement arrow/if/loop body to a statement slice, and the
//! generic arrow-collection walk that backs phase 5 (§4.1).

use rustc_hash::FxHashSet;
use tsil_ast::{ClassData, EnumData, FunctionData, NodeArena, NodeIndex, NodeKind, ObjectProp};
use tsil_common::Atom;

/// Peels one `export`/`export default` wrapper off a top-level
/// statement, returning the declaration it wraps. Non-export statements
/// pass through unchanged. `lower_stmt`/`lower_one_stmt_async` already
/// do the equivalent at lowering time; the driver needs its own copy to
/// see past the wrapper during declaration discovery.
pub(crate) fn strip_export(arena: &NodeArena, idx: NodeIndex) -> NodeIndex {
    match &arena.get(idx).kind {
        NodeKind::ExportDecl(inner) => strip_export(arena, *inner),
        _ => idx,
    }
}

/// A function/arrow body is either a `Block` of statements or (arrows
/// only) a single expression standing in for `return <expr>`.
pub(crate) fn body_stmts(arena: &NodeArena, body: NodeIndex, is_arrow: bool) -> Vec<NodeIndex> {
    match &arena.get(body).kind {
        NodeKind::Block(stmts) => stmts.clone(),
        _ if is_arrow => vec![body],
        _ => vec![body],
    }
}

/// Top-level declarations discovered in one statement list, with
/// `export`/`export default` wrappers already stripped. Built once per
/// compilation unit (one module, or the single implicit module a
/// non-multi-module `compile()` call processes) and consulted by every
/// later phase instead of re-walking the statement list from scratch.
#[derive(Default)]
pub(crate) struct TopLevelDecls {
    pub functions: Vec<(Atom, FunctionData)>,
    pub classes: Vec<ClassData>,
    pub enums: Vec<EnumData>,
    /// `const name = <arrow>` at top level: `name`, the arrow node, and
    /// whether the arrow itself is async (an async root) or not (a
    /// generic arrow, handled like any other).
    pub var_arrows: Vec<(Atom, NodeIndex)>,
}

pub(crate) fn collect_top_level_decls(arena: &NodeArena, statements: &[NodeIndex]) -> TopLevelDecls {
    let mut decls = TopLevelDecls::default();
    for &stmt in statements {
        let stmt = strip_export(arena, stmt);
        match &arena.get(stmt).kind {
            NodeKind::FunctionDecl(data) => {
                if let Some(name) = data.name {
                    decls.functions.push((name, data.clone()));
                }
            }
            NodeKind::ClassDecl(data) => decls.classes.push(data.clone()),
            NodeKind::EnumDecl(data) => decls.enums.push(data.clone()),
            NodeKind::VarDeclStmt { decls: declarators, .. } => {
                for d in declarators {
                    if let tsil_ast::BindingName::Identifier(name) = d.name {
                        if let Some(init) = d.initializer {
                            if matches!(arena.get(init).kind, NodeKind::Arrow(_)) {
                                decls.var_arrows.push((name, init));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    decls
}

/// Recursively collects every `Arrow` node in the program, in
/// encounter order, skipping (but still descending past) any arrow
/// whose index is in `async_owned` — those are async roots or nested
/// async arrows, built and wired entirely by the async-machine phase
/// rather than the generic arrow registry.
pub(crate) fn collect_generic_arrows(
    arena: &NodeArena,
    roots: &[NodeIndex],
    async_owned: &FxHashSet<NodeIndex>,
    out: &mut Vec<NodeIndex>,
) {
    for &idx in roots {
        walk_node(arena, idx, async_owned, out);
    }
}

fn walk_opt(arena: &NodeArena, idx: Option<NodeIndex>, skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    if let Some(idx) = idx {
        walk_node(arena, idx, skip, out);
    }
}

fn walk_many(arena: &NodeArena, idxs: &[NodeIndex], skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    for &idx in idxs {
        walk_node(arena, idx, skip, out);
    }
}

fn walk_function_data(arena: &NodeArena, data: &FunctionData, skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    walk_params(arena, &data.params, skip, out);
    walk_node(arena, data.body, skip, out);
}

fn walk_params(arena: &NodeArena, params: &[tsil_ast::Param], skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    for p in params {
        walk_opt(arena, p.initializer, skip, out);
    }
}

fn walk_class_data(arena: &NodeArena, data: &ClassData, skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    for m in &data.members {
        walk_params(arena, &m.params, skip, out);
        walk_opt(arena, m.body, skip, out);
    }
}

fn walk_enum_data(arena: &NodeArena, data: &EnumData, skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    for m in &data.members {
        if let tsil_ast::EnumInitializer::Expr(e) = m.initializer {
            walk_node(arena, e, skip, out);
        }
    }
}

fn walk_props(arena: &NodeArena, props: &[ObjectProp], skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    for p in props {
        walk_node(arena, p.value, skip, out);
    }
}

/// Full-tree descent, covering every statement and expression shape the
/// AST defines. Unlike `movenext::contains_await`, this walk *does*
/// descend into nested function/class/arrow bodies: a sync arrow
/// nested three levels deep inside an async method still needs a
/// generic `ArrowInfo` entry if it is ever referenced as a value.
fn walk_node(arena: &NodeArena, idx: NodeIndex, skip: &FxHashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
    match arena.get(idx).kind.clone() {
        NodeKind::Arrow(data) => {
            if !skip.contains(&idx) {
                out.push(idx);
            }
            walk_params(arena, &data.params, skip, out);
            walk_node(arena, data.body, skip, out);
        }
        NodeKind::FunctionExpr(data) => walk_function_data(arena, &data, skip, out),
        NodeKind::ClassExpr(data) => walk_class_data(arena, &data, skip, out),
        NodeKind::FunctionDecl(data) => walk_function_data(arena, &data, skip, out),
        NodeKind::ClassDecl(data) => walk_class_data(arena, &data, skip, out),
        NodeKind::EnumDecl(data) => walk_enum_data(arena, &data, skip, out),

        NodeKind::TemplateLiteral { exprs, tag, .. } => {
            walk_many(arena, &exprs, skip, out);
            walk_opt(arena, tag, skip, out);
        }
        NodeKind::ArrayLiteral(elems) => walk_many(arena, &elems, skip, out),
        NodeKind::ObjectLiteral(props) => walk_props(arena, &props, skip, out),
        NodeKind::SpreadElement(inner)
        | NodeKind::Grouping(inner)
        | NodeKind::NonNullAssertion(inner)
        | NodeKind::TypeAssertion(inner)
        | NodeKind::Satisfies(inner)
        | NodeKind::Await(inner)
        | NodeKind::DynamicImport(inner)
        | NodeKind::Throw(inner)
        | NodeKind::ExportDefault(inner)
        | NodeKind::ExportDecl(inner) => walk_node(arena, inner, skip, out),
        NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
            walk_node(arena, left, skip, out);
            walk_node(arena, right, skip, out);
        }
        NodeKind::Unary { operand, .. } | NodeKind::UpdateExpr { operand, .. } => {
            walk_node(arena, operand, skip, out)
        }
        NodeKind::Assign { target, value, .. } => {
            walk_node(arena, target, skip, out);
            walk_node(arena, value, skip, out);
        }
        NodeKind::Conditional { test, consequent, alternate } => {
            walk_node(arena, test, skip, out);
            walk_node(arena, consequent, skip, out);
            walk_node(arena, alternate, skip, out);
        }
        NodeKind::Call { callee, args, .. } | NodeKind::New { callee, args } => {
            walk_node(arena, callee, skip, out);
            walk_many(arena, &args, skip, out);
        }
        NodeKind::PropertyAccess { object, .. } => walk_node(arena, object, skip, out),
        NodeKind::IndexAccess { object, index, .. } => {
            walk_node(arena, object, skip, out);
            walk_node(arena, index, skip, out);
        }
        NodeKind::Yield { argument, .. } => walk_opt(arena, argument, skip, out),

        NodeKind::Block(stmts) => walk_many(arena, &stmts, skip, out),
        NodeKind::ExprStmt(e) => walk_node(arena, e, skip, out),
        NodeKind::VarDeclStmt { decls, .. } => {
            for d in decls {
                walk_opt(arena, d.initializer, skip, out);
            }
        }
        NodeKind::If { test, consequent, alternate } => {
            walk_node(arena, test, skip, out);
            walk_node(arena, consequent, skip, out);
            walk_opt(arena, alternate, skip, out);
        }
        NodeKind::While { test, body } | NodeKind::DoWhile { test, body } => {
            walk_node(arena, test, skip, out);
            walk_node(arena, body, skip, out);
        }
        NodeKind::For { init, test, update, body } => {
            match init {
                tsil_ast::ForInit::VarDecl { decls, .. } => {
                    for d in decls {
                        walk_opt(arena, d.initializer, skip, out);
                    }
                }
                tsil_ast::ForInit::Expr(e) => walk_node(arena, e, skip, out),
                tsil_ast::ForInit::None => {}
            }
            walk_opt(arena, test, skip, out);
            walk_opt(arena, update, skip, out);
            walk_node(arena, body, skip, out);
        }
        NodeKind::ForOf { iterable, body, .. } => {
            walk_node(arena, iterable, skip, out);
            walk_node(arena, body, skip, out);
        }
        NodeKind::ForIn { object, body, .. } => {
            walk_node(arena, object, skip, out);
            walk_node(arena, body, skip, out);
        }
        NodeKind::Switch { discriminant, cases } => {
            walk_node(arena, discriminant, skip, out);
            for c in cases {
                walk_opt(arena, c.test, skip, out);
                walk_many(arena, &c.body, skip, out);
            }
        }
        NodeKind::Try { block, catch, finally } => {
            walk_node(arena, block, skip, out);
            if let Some(c) = catch {
                walk_node(arena, c.body, skip, out);
            }
            walk_opt(arena, finally, skip, out);
        }
        NodeKind::Return(e) => walk_opt(arena, e, skip, out),
        NodeKind::Labeled { body, .. } => walk_node(arena, body, skip, out),
        NodeKind::ExportNamed { .. }
        | NodeKind::ExportAll { .. }
        | NodeKind::ImportDecl { .. }
        | NodeKind::NumericLiteral(_)
        | NodeKind::StringLiteral(_)
        | NodeKind::BooleanLiteral(_)
        | NodeKind::NullLiteral
        | NodeKind::UndefinedLiteral
        | NodeKind::RegexLiteral(_)
        | NodeKind::Identifier(_)
        | NodeKind::ThisExpr
        | NodeKind::SuperExpr
        | NodeKind::ImportMeta
        | NodeKind::Break(_)
        | NodeKind::Continue(_)
        | NodeKind::Empty => {}
    }
}
