//! Async State Analyzer (component C): given one function/method/arrow
//! body, counts await points, determines which parameters and locals
//! must be hoisted onto the eventual state machine so they survive a
//! suspension, and discovers nested async arrows (direct and
//! transitive) so the driver can schedule their own analyses in
//! nesting-depth order (§3 invariant 4).
//!
//! Hoisting follows a two-pass walk: a monotonic `seen_await` flag
//! partitions declarations into "before
//! the first await" and uses into "after some await"; the hoisted set
//! is the intersection. `for-of` loop variables and `catch` parameters
//! get a narrower, targeted rule instead (see `body_contains_await`)
//! since they are usually declared *after* the function's first await
//! yet still need to survive a suspension inside their own body.

use crate::closure::CaptureSet;
use rustc_hash::{FxHashMap, FxHashSet};
use tsil_ast::{ArrowData, BindingName, CatchClause, ForInit, NodeArena, NodeIndex, NodeKind, Param};
use tsil_common::Atom;

#[derive(Clone, Debug, Default)]
pub struct AsyncFunctionAnalysis {
    pub await_count: u32,
    pub hoisted_parameters: FxHashSet<Atom>,
    pub hoisted_locals: FxHashSet<Atom>,
    pub uses_this: bool,
    pub has_try_catch: bool,
    pub async_arrows: Vec<AsyncArrowInfo>,
}

#[derive(Clone, Debug)]
pub struct AsyncArrowInfo {
    pub node: NodeIndex,
    pub captures: CaptureSet,
    pub parent_arrow: Option<NodeIndex>,
    pub nesting_level: u32,
}

pub fn analyze_async_function(
    arena: &NodeArena,
    captures: &FxHashMap<NodeIndex, CaptureSet>,
    params: &[Param],
    body_stmts: &[NodeIndex],
) -> AsyncFunctionAnalysis {
    let mut walker = Walker {
        arena,
        captures,
        seen_await: false,
        declared_before_await: FxHashSet::default(),
        used_after_await: FxHashSet::default(),
        forced_hoist: FxHashSet::default(),
        await_count: 0,
        uses_this: false,
        has_try_catch: false,
        async_arrows: Vec::new(),
        arrow_stack: Vec::new(),
        depth: 0,
        param_names: FxHashSet::default(),
    };
    for p in params {
        if let BindingName::Identifier(name) = &p.name {
            walker.own_param_name(*name);
        }
    }
    walker.visit_stmts(body_stmts);

    let hoisted_locals: FxHashSet<Atom> = walker
        .declared_before_await
        .intersection(&walker.used_after_await)
        .copied()
        .chain(walker.forced_hoist.iter().copied())
        .collect();
    let hoisted_parameters: FxHashSet<Atom> = walker
        .param_names
        .intersection(&walker.used_after_await)
        .copied()
        .collect();

    AsyncFunctionAnalysis {
        await_count: walker.await_count,
        hoisted_parameters,
        hoisted_locals,
        uses_this: walker.uses_this,
        has_try_catch: walker.has_try_catch,
        async_arrows: walker.async_arrows,
    }
}

/// Scans a subtree for any `Await` expression without descending past a
/// nested async arrow's own boundary (that arrow's awaits belong to its
/// own, separate analysis).
fn body_contains_await(arena: &NodeArena, idx: NodeIndex) -> bool {
    let mut found = false;
    scan_for_await(arena, idx, &mut found);
    found
}

fn scan_for_await(arena: &NodeArena, idx: NodeIndex, found: &mut bool) {
    if *found {
        return;
    }
    match &arena.get(idx).kind {
        NodeKind::Await(inner) => {
            *found = true;
            let _ = inner;
        }
        NodeKind::Arrow(data) if data.is_async => {
            // Nested async arrow: its awaits are its own, not this scan's.
        }
        other => visit_children(arena, other, &mut |child| scan_for_await(arena, child, found)),
    }
}

/// Generic child-visiting helper for the small set of node kinds the
/// await scanner and name-collector need to recurse through. Not
/// exhaustive over every variant (unlike the closure analyzer's
/// visitor, which must be) — only the shapes that can textually
/// contain an `await` within the same function scope.
fn visit_children(arena: &NodeArena, kind: &NodeKind, f: &mut dyn FnMut(NodeIndex)) {
    match kind {
        NodeKind::Block(stmts) => stmts.iter().for_each(|&s| f(s)),
        NodeKind::ExprStmt(e) => f(*e),
        NodeKind::VarDeclStmt { decls, .. } => {
            for d in decls {
                if let Some(i) = d.initializer {
                    f(i);
                }
            }
        }
        NodeKind::If { test, consequent, alternate } => {
            f(*test);
            f(*consequent);
            if let Some(a) = alternate {
                f(*a);
            }
        }
        NodeKind::While { test, body } => {
            f(*test);
            f(*body);
        }
        NodeKind::DoWhile { body, test } => {
            f(*body);
            f(*test);
        }
        NodeKind::For { init, test, update, body } => {
            if let ForInit::Expr(e) = init {
                f(*e);
            }
            if let ForInit::VarDecl { decls, .. } = init {
                for d in decls {
                    if let Some(i) = d.initializer {
                        f(i);
                    }
                }
            }
            if let Some(t) = test {
                f(*t);
            }
            if let Some(u) = update {
                f(*u);
            }
            f(*body);
        }
        NodeKind::ForOf { iterable, body, .. } | NodeKind::ForIn { object: iterable, body, .. } => {
            f(*iterable);
            f(*body);
        }
        NodeKind::Switch { discriminant, cases } => {
            f(*discriminant);
            for case in cases {
                if let Some(t) = case.test {
                    f(t);
                }
                case.body.iter().for_each(|&s| f(s));
            }
        }
        NodeKind::Try { block, catch, finally } => {
            f(*block);
            if let Some(c) = catch {
                f(c.body);
            }
            if let Some(fin) = finally {
                f(*fin);
            }
        }
        NodeKind::Throw(e) => f(*e),
        NodeKind::Return(Some(e)) => f(*e),
        NodeKind::Labeled { body, .. } => f(*body),
        NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
            f(*left);
            f(*right);
        }
        NodeKind::Unary { operand, .. } | NodeKind::UpdateExpr { operand, .. } => f(*operand),
        NodeKind::Assign { target, value, .. } => {
            f(*target);
            f(*value);
        }
        NodeKind::Conditional { test, consequent, alternate } => {
            f(*test);
            f(*consequent);
            f(*alternate);
        }
        NodeKind::Grouping(e)
        | NodeKind::NonNullAssertion(e)
        | NodeKind::TypeAssertion(e)
        | NodeKind::Satisfies(e)
        | NodeKind::SpreadElement(e) => f(*e),
        NodeKind::Call { callee, args, .. } | NodeKind::New { callee, args } => {
            f(*callee);
            args.iter().for_each(|&a| f(a));
        }
        NodeKind::PropertyAccess { object, .. } => f(*object),
        NodeKind::IndexAccess { object, index, .. } => {
            f(*object);
            f(*index);
        }
        NodeKind::ArrayLiteral(elems) => elems.iter().for_each(|&e| f(e)),
        NodeKind::ObjectLiteral(props) => props.iter().for_each(|p| f(p.value)),
        NodeKind::TemplateLiteral { exprs, .. } => exprs.iter().for_each(|&e| f(e)),
        // Reached only for a non-async arrow (the async case is
        // intercepted by `scan_for_await` before it calls here); a
        // non-async arrow shares its enclosing function's await
        // timeline, so its body is still worth scanning.
        NodeKind::Arrow(data) => f(data.body),
        _ => {}
    }
}

struct Walker<'a> {
    arena: &'a NodeArena,
    captures: &'a FxHashMap<NodeIndex, CaptureSet>,
    seen_await: bool,
    declared_before_await: FxHashSet<Atom>,
    used_after_await: FxHashSet<Atom>,
    forced_hoist: FxHashSet<Atom>,
    await_count: u32,
    uses_this: bool,
    has_try_catch: bool,
    async_arrows: Vec<AsyncArrowInfo>,
    arrow_stack: Vec<NodeIndex>,
    depth: u32,
    param_names: FxHashSet<Atom>,
}

impl<'a> Walker<'a> {
    fn own_param_name(&mut self, name: Atom) {
        self.param_names.insert(name);
    }

    fn declare(&mut self, name: Atom) {
        if !self.seen_await {
            self.declared_before_await.insert(name);
        }
    }

    fn use_name(&mut self, name: Atom) {
        if self.seen_await {
            self.used_after_await.insert(name);
        }
    }

    fn visit_stmts(&mut self, stmts: &[NodeIndex]) {
        for &s in stmts {
            self.visit_stmt(s);
        }
    }

    fn visit_stmt(&mut self, idx: NodeIndex) {
        let kind = self.arena.get(idx).kind.clone();
        match kind {
            NodeKind::Block(stmts) => self.visit_stmts(&stmts),
            NodeKind::ExprStmt(e) => self.visit_expr(e),
            NodeKind::VarDeclStmt { decls, .. } => {
                for d in decls {
                    if let BindingName::Identifier(name) = d.name {
                        self.declare(name);
                    }
                    if let Some(i) = d.initializer {
                        self.visit_expr(i);
                    }
                }
            }
            NodeKind::If { test, consequent, alternate } => {
                self.visit_expr(test);
                self.visit_stmt(consequent);
                if let Some(a) = alternate {
                    self.visit_stmt(a);
                }
            }
            NodeKind::While { test, body } => {
                self.visit_expr(test);
                self.visit_stmt(body);
            }
            NodeKind::DoWhile { body, test } => {
                self.visit_stmt(body);
                self.visit_expr(test);
            }
            NodeKind::For { init, test, update, body } => {
                match init {
                    ForInit::VarDecl { decls, .. } => {
                        for d in decls {
                            if let BindingName::Identifier(name) = d.name {
                                self.declare(name);
                            }
                            if let Some(i) = d.initializer {
                                self.visit_expr(i);
                            }
                        }
                    }
                    ForInit::Expr(e) => self.visit_expr(e),
                    ForInit::None => {}
                }
                if let Some(t) = test {
                    self.visit_expr(t);
                }
                if let Some(u) = update {
                    self.visit_expr(u);
                }
                self.visit_stmt(body);
            }
            NodeKind::ForOf { name, iterable, body, .. } | NodeKind::ForIn { name, object: iterable, body, .. } => {
                self.visit_expr(iterable);
                self.declare(name);
                if body_contains_await(self.arena, body) {
                    self.forced_hoist.insert(name);
                }
                self.visit_stmt(body);
            }
            NodeKind::Switch { discriminant, cases } => {
                self.visit_expr(discriminant);
                for case in cases {
                    if let Some(t) = case.test {
                        self.visit_expr(t);
                    }
                    self.visit_stmts(&case.body);
                }
            }
            NodeKind::Try { block, catch, finally } => {
                let try_has_await = body_contains_await(self.arena, block);
                self.has_try_catch = self.has_try_catch || try_has_await;
                self.visit_stmt(block);
                if let Some(CatchClause { param, body }) = catch {
                    let catch_has_await = body_contains_await(self.arena, body);
                    if let Some(p) = param {
                        self.declare(p);
                        if try_has_await || catch_has_await {
                            self.forced_hoist.insert(p);
                        }
                    }
                    self.visit_stmt(body);
                }
                if let Some(f) = finally {
                    self.visit_stmt(f);
                }
            }
            NodeKind::Throw(e) => self.visit_expr(e),
            NodeKind::Return(Some(e)) => self.visit_expr(e),
            NodeKind::Return(None) | NodeKind::Break(_) | NodeKind::Continue(_) | NodeKind::Empty => {}
            NodeKind::Labeled { body, .. } => self.visit_stmt(body),
            NodeKind::FunctionDecl(_) | NodeKind::ClassDecl(_) | NodeKind::EnumDecl(_) => {
                // Own scope / own `this`; not part of this function's
                // hoisting or await accounting.
            }
            NodeKind::ImportDecl { .. } | NodeKind::ExportNamed { .. } | NodeKind::ExportAll { .. } => {}
            NodeKind::ExportDefault(e) => self.visit_expr(e),
            NodeKind::ExportDecl(inner) => self.visit_stmt(inner),
            other => unreachable!("async analyzer visit_stmt on non-statement node: {other:?}"),
        }
    }

    fn visit_expr(&mut self, idx: NodeIndex) {
        let kind = self.arena.get(idx).kind.clone();
        match kind {
            NodeKind::Identifier(name) => self.use_name(name),
            NodeKind::ThisExpr => self.uses_this = true,
            NodeKind::Await(inner) => {
                self.visit_expr(inner);
                self.await_count += 1;
                self.seen_await = true;
            }
            NodeKind::Arrow(data) => self.visit_arrow(idx, &data),
            NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            NodeKind::Unary { operand, .. } | NodeKind::UpdateExpr { operand, .. } => self.visit_expr(operand),
            NodeKind::Assign { target, value, .. } => {
                self.visit_expr(target);
                self.visit_expr(value);
            }
            NodeKind::Conditional { test, consequent, alternate } => {
                self.visit_expr(test);
                self.visit_expr(consequent);
                self.visit_expr(alternate);
            }
            NodeKind::Grouping(e)
            | NodeKind::NonNullAssertion(e)
            | NodeKind::TypeAssertion(e)
            | NodeKind::Satisfies(e)
            | NodeKind::SpreadElement(e)
            | NodeKind::DynamicImport(e) => self.visit_expr(e),
            NodeKind::Call { callee, args, .. } | NodeKind::New { callee, args } => {
                self.visit_expr(callee);
                for a in args {
                    self.visit_expr(a);
                }
            }
            NodeKind::PropertyAccess { object, .. } => self.visit_expr(object),
            NodeKind::IndexAccess { object, index, .. } => {
                self.visit_expr(object);
                self.visit_expr(index);
            }
            NodeKind::ArrayLiteral(elems) => {
                for e in elems {
                    self.visit_expr(e);
                }
            }
            NodeKind::ObjectLiteral(props) => {
                for p in props {
                    self.visit_expr(p.value);
                }
            }
            NodeKind::TemplateLiteral { exprs, tag, .. } => {
                for e in exprs {
                    self.visit_expr(e);
                }
                if let Some(t) = tag {
                    self.visit_expr(t);
                }
            }
            NodeKind::Yield { argument, .. } => {
                if let Some(a) = argument {
                    self.visit_expr(a);
                }
            }
            NodeKind::FunctionExpr(_) | NodeKind::ClassExpr(_) => {
                // Own `this` / own scope boundary.
            }
            NodeKind::NumericLiteral(_)
            | NodeKind::StringLiteral(_)
            | NodeKind::BooleanLiteral(_)
            | NodeKind::NullLiteral
            | NodeKind::UndefinedLiteral
            | NodeKind::RegexLiteral(_)
            | NodeKind::ImportMeta
            | NodeKind::SuperExpr => {}
            other => unreachable!("async analyzer visit_expr on non-expression node: {other:?}"),
        }
    }

    fn visit_arrow(&mut self, idx: NodeIndex, data: &ArrowData) {
        if data.is_async {
            self.async_arrows.push(AsyncArrowInfo {
                node: idx,
                captures: self.captures.get(&idx).cloned().unwrap_or_default(),
                parent_arrow: self.arrow_stack.last().copied(),
                nesting_level: self.depth,
            });
            // The nested async arrow's own await points and hoisting are
            // computed by a separate `analyze_async_function` call over
            // its own body (scheduled by the driver in depth order); we
            // still need to discover *its* nested async arrows here so
            // nesting levels are assigned without a second full pass.
            self.arrow_stack.push(idx);
            self.depth += 1;
            self.discover_nested_arrows_only(data.body);
            self.depth -= 1;
            self.arrow_stack.pop();
        } else {
            // A non-async arrow shares this function's await timeline:
            // its declarations/uses still participate in this function's
            // hoisting decisions (its captures may alias hoisted state).
            self.visit_expr_or_block(data.body);
        }
    }

    fn visit_expr_or_block(&mut self, idx: NodeIndex) {
        match &self.arena.get(idx).kind {
            NodeKind::Block(stmts) => {
                let stmts = stmts.clone();
                self.visit_stmts(&stmts);
            }
            _ => self.visit_expr(idx),
        }
    }

    /// Used while inside a nested async arrow: records further-nested
    /// async arrows (for nesting_level bookkeeping) without touching
    /// this (outer) function's await/hoist accounting, which belongs to
    /// the inner arrow's own, separate analysis.
    fn discover_nested_arrows_only(&mut self, idx: NodeIndex) {
        match &self.arena.get(idx).kind.clone() {
            NodeKind::Block(stmts) => {
                for &s in stmts {
                    self.discover_nested_arrows_only(s);
                }
            }
            NodeKind::Arrow(data) if data.is_async => {
                let inner_body = data.body;
                self.async_arrows.push(AsyncArrowInfo {
                    node: idx,
                    captures: self.captures.get(&idx).cloned().unwrap_or_default(),
                    parent_arrow: self.arrow_stack.last().copied(),
                    nesting_level: self.depth,
                });
                self.arrow_stack.push(idx);
                self.depth += 1;
                self.discover_nested_arrows_only(inner_body);
                self.depth -= 1;
                self.arrow_stack.pop();
            }
            kind => visit_children(self.arena, &kind.clone(), &mut |child| {
                self.discover_nested_arrows_only(child)
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/async_analysis.rs"]
mod tests;
