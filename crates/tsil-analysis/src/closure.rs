//! Closure Analyzer (component B): walks the typed AST and computes,
//! for every arrow function, the set of free variables (and whether it
//! captures `this`) that its body references but does not bind itself.
//!
//! A name is captured by an arrow if it resolves to a binding owned by
//! some enclosing arrow or the module scope; it is *not* captured if
//! the arrow binds it locally (as a parameter, `var`/`let`/`const`, a
//! `for`-loop variable, or a `catch` parameter). Captures propagate
//! outward: an arrow nested two levels deep that reaches for a name
//! bound by the outermost arrow causes every arrow on the chain in
//! between to also capture it, since each level's display class must
//! forward the binding to the next.
//!
//! Plain (non-arrow) functions, function expressions, and class
//! methods establish their own `this` and their own variable scope;
//! they are walked for nested arrows but are never themselves capture
//! targets (no display class is synthesized for them).

use rustc_hash::{FxHashMap, FxHashSet};
use tsil_ast::{
    ArrowData, BindingName, CatchClause, ClassData, ClassMemberKind, EnumInitializer, ForInit, Node,
    NodeArena, NodeIndex, NodeKind, Param,
};
use tsil_common::Atom;

#[derive(Clone, Debug, Default)]
pub struct CaptureSet {
    pub names: FxHashSet<Atom>,
    pub captures_this: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ScopeKind {
    /// The module top level, or a plain function/method: owns its own
    /// `this` and does not propagate captures upward.
    Boundary,
    /// An arrow's frame: captures discovered here propagate to every
    /// enclosing arrow frame up to (but not including) the frame that
    /// actually owns the binding.
    Arrow(NodeIndex),
}

struct Scope {
    names: FxHashSet<Atom>,
    kind: ScopeKind,
}

pub struct ClosureAnalyzer<'a> {
    arena: &'a NodeArena,
    scopes: Vec<Scope>,
    captures: FxHashMap<NodeIndex, CaptureSet>,
}

impl<'a> ClosureAnalyzer<'a> {
    pub fn new(arena: &'a NodeArena) -> Self {
        Self {
            arena,
            scopes: Vec::new(),
            captures: FxHashMap::default(),
        }
    }

    /// Runs the analysis over a module's (or program's) top-level
    /// statement list and returns the capture set for every arrow node
    /// discovered, keyed by that arrow's identity.
    pub fn analyze(mut self, top_level: &[NodeIndex]) -> FxHashMap<NodeIndex, CaptureSet> {
        let module_names = self.collect_own_names(top_level);
        self.scopes.push(Scope {
            names: module_names,
            kind: ScopeKind::Boundary,
        });
        self.visit_stmts(top_level);
        self.scopes.pop();
        self.captures
    }

    fn node(&self, idx: NodeIndex) -> &Node {
        self.arena.get(idx)
    }

    // ---- name collection (one function/arrow scope's own bindings) ----

    fn collect_own_names(&self, stmts: &[NodeIndex]) -> FxHashSet<Atom> {
        let mut names = FxHashSet::default();
        for &s in stmts {
            self.collect_stmt_names(s, &mut names);
        }
        names
    }

    fn bind_pattern_names(&self, binding: &BindingName, out: &mut FxHashSet<Atom>) {
        match binding {
            BindingName::Identifier(name) => {
                out.insert(*name);
            }
            BindingName::Pattern(idx) => self.collect_pattern_leaf_names(*idx, out),
        }
    }

    /// Destructuring patterns are represented structurally (array/object
    /// literal shape); every identifier leaf reachable from the pattern
    /// is a bound name.
    fn collect_pattern_leaf_names(&self, idx: NodeIndex, out: &mut FxHashSet<Atom>) {
        match &self.node(idx).kind {
            NodeKind::Identifier(name) => {
                out.insert(*name);
            }
            NodeKind::ArrayLiteral(elems) => {
                for &e in elems {
                    self.collect_pattern_leaf_names(e, out);
                }
            }
            NodeKind::ObjectLiteral(props) => {
                for p in props {
                    self.collect_pattern_leaf_names(p.value, out);
                }
            }
            NodeKind::Assign { target, .. } => self.collect_pattern_leaf_names(*target, out),
            NodeKind::SpreadElement(inner) => self.collect_pattern_leaf_names(*inner, out),
            _ => {}
        }
    }

    fn collect_stmt_names(&self, idx: NodeIndex, out: &mut FxHashSet<Atom>) {
        match &self.node(idx).kind {
            NodeKind::Block(stmts) => {
                for &s in stmts {
                    self.collect_stmt_names(s, out);
                }
            }
            NodeKind::VarDeclStmt { decls, .. } => {
                for d in decls {
                    self.bind_pattern_names(&d.name, out);
                }
            }
            NodeKind::FunctionDecl(data) => {
                if let Some(name) = data.name {
                    out.insert(name);
                }
            }
            NodeKind::ClassDecl(data) => {
                if let Some(name) = data.name {
                    out.insert(name);
                }
            }
            NodeKind::EnumDecl(data) => {
                out.insert(data.name);
            }
            NodeKind::If { consequent, alternate, .. } => {
                self.collect_stmt_names(*consequent, out);
                if let Some(a) = alternate {
                    self.collect_stmt_names(*a, out);
                }
            }
            NodeKind::While { body, .. } | NodeKind::DoWhile { body, .. } => {
                self.collect_stmt_names(*body, out);
            }
            NodeKind::For { init, body, .. } => {
                if let ForInit::VarDecl { decls, .. } = init {
                    for d in decls {
                        self.bind_pattern_names(&d.name, out);
                    }
                }
                self.collect_stmt_names(*body, out);
            }
            NodeKind::ForOf { name, body, .. } | NodeKind::ForIn { name, body, .. } => {
                out.insert(*name);
                self.collect_stmt_names(*body, out);
            }
            NodeKind::Switch { cases, .. } => {
                for case in cases {
                    for &s in &case.body {
                        self.collect_stmt_names(s, out);
                    }
                }
            }
            NodeKind::Try { block, catch, finally } => {
                self.collect_stmt_names(*block, out);
                if let Some(CatchClause { param, body }) = catch {
                    if let Some(p) = param {
                        out.insert(*p);
                    }
                    self.collect_stmt_names(*body, out);
                }
                if let Some(f) = finally {
                    self.collect_stmt_names(*f, out);
                }
            }
            NodeKind::Labeled { body, .. } => self.collect_stmt_names(*body, out),
            NodeKind::ExportDecl(inner) => self.collect_stmt_names(*inner, out),
            _ => {}
        }
    }

    // ---- the visiting pass: records uses, descends into nested scopes ----

    fn visit_stmts(&mut self, stmts: &[NodeIndex]) {
        for &s in stmts {
            self.visit_stmt(s);
        }
    }

    fn visit_stmt(&mut self, idx: NodeIndex) {
        let kind = self.node(idx).kind.clone();
        match kind {
            NodeKind::Block(stmts) => self.visit_stmts(&stmts),
            NodeKind::ExprStmt(e) => self.visit_expr(e),
            NodeKind::VarDeclStmt { decls, .. } => {
                for d in decls {
                    if let Some(init) = d.initializer {
                        self.visit_expr(init);
                    }
                }
            }
            NodeKind::FunctionDecl(data) => self.visit_function_boundary(&data.params, data.body),
            NodeKind::ClassDecl(data) => self.visit_class(&data),
            NodeKind::EnumDecl(data) => {
                for member in &data.members {
                    if let EnumInitializer::Expr(e) = member.initializer {
                        self.visit_expr(e);
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
                            if let Some(e) = d.initializer {
                                self.visit_expr(e);
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
            NodeKind::ForOf { iterable, body, .. } | NodeKind::ForIn { object: iterable, body, .. } => {
                self.visit_expr(iterable);
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
                self.visit_stmt(block);
                if let Some(c) = catch {
                    self.visit_stmt(c.body);
                }
                if let Some(f) = finally {
                    self.visit_stmt(f);
                }
            }
            NodeKind::Throw(e) => self.visit_expr(e),
            NodeKind::Return(Some(e)) => self.visit_expr(e),
            NodeKind::Return(None) | NodeKind::Break(_) | NodeKind::Continue(_) | NodeKind::Empty => {}
            NodeKind::Labeled { body, .. } => self.visit_stmt(body),
            NodeKind::ImportDecl { .. } => {}
            NodeKind::ExportNamed { .. } | NodeKind::ExportAll { .. } => {}
            NodeKind::ExportDefault(e) => self.visit_expr(e),
            NodeKind::ExportDecl(inner) => self.visit_stmt(inner),
            other => unreachable!("visit_stmt called on a non-statement node: {other:?}"),
        }
    }

    fn visit_class(&mut self, data: &ClassData) {
        for member in &data.members {
            match member.kind {
                ClassMemberKind::Field => {
                    if let Some(init) = member.body {
                        self.visit_expr(init);
                    }
                }
                ClassMemberKind::Method | ClassMemberKind::Getter | ClassMemberKind::Setter | ClassMemberKind::Constructor => {
                    if let Some(body) = member.body {
                        self.visit_function_boundary(&member.params, body);
                    }
                }
            }
        }
    }

    fn visit_function_boundary(&mut self, params: &[Param], body: NodeIndex) {
        let mut names = FxHashSet::default();
        for p in params {
            self.bind_pattern_names(&p.name, &mut names);
        }
        let body_stmts = self.block_or_single(body);
        names.extend(self.collect_own_names(&body_stmts));
        self.scopes.push(Scope {
            names,
            kind: ScopeKind::Boundary,
        });
        self.visit_stmts(&body_stmts);
        self.scopes.pop();
    }

    fn block_or_single(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        match &self.node(idx).kind {
            NodeKind::Block(stmts) => stmts.clone(),
            _ => vec![idx],
        }
    }

    fn visit_expr(&mut self, idx: NodeIndex) {
        let kind = self.node(idx).kind.clone();
        match kind {
            NodeKind::NumericLiteral(_)
            | NodeKind::StringLiteral(_)
            | NodeKind::BooleanLiteral(_)
            | NodeKind::NullLiteral
            | NodeKind::UndefinedLiteral
            | NodeKind::RegexLiteral(_)
            | NodeKind::ImportMeta
            | NodeKind::SuperExpr => {}
            NodeKind::ThisExpr => self.record_this_use(),
            NodeKind::Identifier(name) => self.record_use(name),
            NodeKind::TemplateLiteral { exprs, tag, .. } => {
                for e in exprs {
                    self.visit_expr(e);
                }
                if let Some(t) = tag {
                    self.visit_expr(t);
                }
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
            NodeKind::SpreadElement(e) => self.visit_expr(e),
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
            | NodeKind::Await(e)
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
            NodeKind::Arrow(data) => self.visit_arrow(idx, &data),
            NodeKind::FunctionExpr(data) => self.visit_function_boundary(&data.params, data.body),
            NodeKind::ClassExpr(data) => self.visit_class(&data),
            NodeKind::Yield { argument, .. } => {
                if let Some(a) = argument {
                    self.visit_expr(a);
                }
            }
            other => unreachable!("visit_expr called on a non-expression node: {other:?}"),
        }
    }

    fn visit_arrow(&mut self, arrow_idx: NodeIndex, data: &ArrowData) {
        let mut names = FxHashSet::default();
        for p in &data.params {
            self.bind_pattern_names(&p.name, &mut names);
        }
        let body_stmts = self.block_or_single(data.body);
        names.extend(self.collect_own_names(&body_stmts));

        self.captures.entry(arrow_idx).or_default();
        self.scopes.push(Scope {
            names,
            kind: ScopeKind::Arrow(arrow_idx),
        });
        self.visit_stmts(&body_stmts);
        self.scopes.pop();
    }

    fn record_use(&mut self, name: Atom) {
        let owner = self.scopes.iter().rposition(|s| s.names.contains(&name));
        let Some(owner) = owner else { return };
        for scope in &self.scopes[owner + 1..] {
            if let ScopeKind::Arrow(arrow) = scope.kind {
                self.captures.entry(arrow).or_default().names.insert(name);
            }
        }
    }

    fn record_this_use(&mut self) {
        let boundary = self.scopes.iter().rposition(|s| s.kind == ScopeKind::Boundary);
        let Some(boundary) = boundary else { return };
        for scope in &self.scopes[boundary + 1..] {
            if let ScopeKind::Arrow(arrow) = scope.kind {
                self.captures.entry(arrow).or_default().captures_this = true;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/closure.rs"]
mod tests;
