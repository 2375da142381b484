//! Ergonomic AST construction, for tests (and for a future parser to
//! model itself on). Not part of the production pipeline — `tsil-ast`
//! has no parser; this is the stand-in that lets `tsil-analysis`,
//! `tsil-codegen` and `tsil-driver` exercise real trees in tests.
//!
//! Every builder call takes a shared `&mut Interner` rather than owning
//! one, so multiple modules in a `compile_modules` test intern class and
//! function names into the *same* atom space — required because the
//! driver's registries are keyed by `Atom` across module boundaries.

use crate::arena::{NodeArena, NodeIndex};
use crate::node::{
    ArrowData, BindingName, CatchClause, ClassData, ClassMember, ClassMemberKind, EnumData,
    EnumInitializer, EnumMember, ExportItem, ForInit, FunctionData, Node, NodeKind, Param,
    SwitchCase, VarDeclarator, VarKind,
};
use crate::ops::{AssignOp, BinaryOp, LogicalOp, UnaryOp, UpdateOp};
use tsil_common::{Atom, Interner, Span};

pub struct AstBuilder<'i> {
    pub arena: NodeArena,
    interner: &'i mut Interner,
}

impl<'i> AstBuilder<'i> {
    pub fn new(interner: &'i mut Interner) -> Self {
        AstBuilder {
            arena: NodeArena::new(),
            interner,
        }
    }

    pub fn atom(&mut self, s: &str) -> Atom {
        self.interner.intern(s)
    }

    fn push(&mut self, kind: NodeKind) -> NodeIndex {
        self.arena.push(Node::new(Span::dummy(), kind))
    }

    // ---- Expressions ----

    pub fn num(&mut self, v: f64) -> NodeIndex {
        self.push(NodeKind::NumericLiteral(v))
    }

    pub fn str_lit(&mut self, s: &str) -> NodeIndex {
        let a = self.atom(s);
        self.push(NodeKind::StringLiteral(a))
    }

    pub fn bool_lit(&mut self, v: bool) -> NodeIndex {
        self.push(NodeKind::BooleanLiteral(v))
    }

    pub fn null(&mut self) -> NodeIndex {
        self.push(NodeKind::NullLiteral)
    }

    pub fn undefined(&mut self) -> NodeIndex {
        self.push(NodeKind::UndefinedLiteral)
    }

    pub fn this_expr(&mut self) -> NodeIndex {
        self.push(NodeKind::ThisExpr)
    }

    pub fn ident(&mut self, name: &str) -> NodeIndex {
        let a = self.atom(name);
        self.push(NodeKind::Identifier(a))
    }

    pub fn binary(&mut self, op: BinaryOp, left: NodeIndex, right: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Binary { op, left, right })
    }

    pub fn logical(&mut self, op: LogicalOp, left: NodeIndex, right: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Logical { op, left, right })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Unary { op, operand })
    }

    pub fn update(&mut self, op: UpdateOp, prefix: bool, operand: NodeIndex) -> NodeIndex {
        self.push(NodeKind::UpdateExpr { op, prefix, operand })
    }

    pub fn assign(&mut self, op: AssignOp, target: NodeIndex, value: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Assign { op, target, value })
    }

    pub fn conditional(
        &mut self,
        test: NodeIndex,
        consequent: NodeIndex,
        alternate: NodeIndex,
    ) -> NodeIndex {
        self.push(NodeKind::Conditional {
            test,
            consequent,
            alternate,
        })
    }

    pub fn call(&mut self, callee: NodeIndex, args: Vec<NodeIndex>) -> NodeIndex {
        self.push(NodeKind::Call {
            callee,
            args,
            optional: false,
        })
    }

    pub fn new_expr(&mut self, callee: NodeIndex, args: Vec<NodeIndex>) -> NodeIndex {
        self.push(NodeKind::New { callee, args })
    }

    pub fn prop(&mut self, object: NodeIndex, name: &str) -> NodeIndex {
        let name = self.atom(name);
        self.push(NodeKind::PropertyAccess {
            object,
            name,
            optional: false,
        })
    }

    pub fn index(&mut self, object: NodeIndex, index: NodeIndex) -> NodeIndex {
        self.push(NodeKind::IndexAccess {
            object,
            index,
            optional: false,
        })
    }

    pub fn spread(&mut self, inner: NodeIndex) -> NodeIndex {
        self.push(NodeKind::SpreadElement(inner))
    }

    pub fn template(&mut self, quasis: Vec<&str>, exprs: Vec<NodeIndex>) -> NodeIndex {
        let quasis = quasis.into_iter().map(|q| self.atom(q)).collect();
        self.push(NodeKind::TemplateLiteral {
            quasis,
            exprs,
            tag: None,
        })
    }

    pub fn array_lit(&mut self, items: Vec<NodeIndex>) -> NodeIndex {
        self.push(NodeKind::ArrayLiteral(items))
    }

    pub fn arrow(&mut self, params: Vec<&str>, body: NodeIndex, is_async: bool) -> NodeIndex {
        let params = params
            .into_iter()
            .map(|p| Param {
                name: BindingName::Identifier(self.atom(p)),
                initializer: None,
                rest: false,
            })
            .collect();
        self.push(NodeKind::Arrow(ArrowData {
            params,
            body,
            is_async,
            is_generator: false,
        }))
    }

    pub fn await_expr(&mut self, inner: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Await(inner))
    }

    pub fn yield_expr(&mut self, argument: Option<NodeIndex>, delegate: bool) -> NodeIndex {
        self.push(NodeKind::Yield { argument, delegate })
    }

    // ---- Statements ----

    pub fn block(&mut self, stmts: Vec<NodeIndex>) -> NodeIndex {
        self.push(NodeKind::Block(stmts))
    }

    pub fn expr_stmt(&mut self, expr: NodeIndex) -> NodeIndex {
        self.push(NodeKind::ExprStmt(expr))
    }

    pub fn var_decl(
        &mut self,
        kind: VarKind,
        name: &str,
        initializer: Option<NodeIndex>,
    ) -> NodeIndex {
        let a = self.atom(name);
        self.push(NodeKind::VarDeclStmt {
            kind,
            decls: vec![VarDeclarator {
                name: BindingName::Identifier(a),
                initializer,
            }],
        })
    }

    pub fn function_decl(
        &mut self,
        name: &str,
        params: Vec<&str>,
        body: NodeIndex,
        is_async: bool,
        is_generator: bool,
    ) -> NodeIndex {
        let name_atom = self.atom(name);
        let params = params
            .into_iter()
            .map(|p| Param {
                name: BindingName::Identifier(self.atom(p)),
                initializer: None,
                rest: false,
            })
            .collect();
        self.push(NodeKind::FunctionDecl(FunctionData {
            name: Some(name_atom),
            params,
            body,
            is_async,
            is_generator,
        }))
    }

    pub fn if_stmt(
        &mut self,
        test: NodeIndex,
        consequent: NodeIndex,
        alternate: Option<NodeIndex>,
    ) -> NodeIndex {
        self.push(NodeKind::If {
            test,
            consequent,
            alternate,
        })
    }

    pub fn while_stmt(&mut self, test: NodeIndex, body: NodeIndex) -> NodeIndex {
        self.push(NodeKind::While { test, body })
    }

    pub fn for_of(
        &mut self,
        decl_kind: VarKind,
        name: &str,
        iterable: NodeIndex,
        body: NodeIndex,
        is_await: bool,
    ) -> NodeIndex {
        let name = self.atom(name);
        self.push(NodeKind::ForOf {
            decl_kind,
            name,
            iterable,
            body,
            is_await,
        })
    }

    pub fn switch_stmt(&mut self, discriminant: NodeIndex, cases: Vec<SwitchCase>) -> NodeIndex {
        self.push(NodeKind::Switch {
            discriminant,
            cases,
        })
    }

    pub fn try_stmt(
        &mut self,
        block: NodeIndex,
        catch_param: Option<&str>,
        catch_body: Option<NodeIndex>,
        finally: Option<NodeIndex>,
    ) -> NodeIndex {
        let catch = catch_body.map(|body| CatchClause {
            param: catch_param.map(|p| self.atom(p)),
            body,
        });
        self.push(NodeKind::Try {
            block,
            catch,
            finally,
        })
    }

    pub fn throw_stmt(&mut self, expr: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Throw(expr))
    }

    pub fn return_stmt(&mut self, expr: Option<NodeIndex>) -> NodeIndex {
        self.push(NodeKind::Return(expr))
    }

    pub fn labeled(&mut self, label: &str, body: NodeIndex) -> NodeIndex {
        let label = self.atom(label);
        self.push(NodeKind::Labeled { label, body })
    }

    pub fn break_stmt(&mut self, label: Option<&str>) -> NodeIndex {
        let label = label.map(|l| self.atom(l));
        self.push(NodeKind::Break(label))
    }

    pub fn continue_stmt(&mut self, label: Option<&str>) -> NodeIndex {
        let label = label.map(|l| self.atom(l));
        self.push(NodeKind::Continue(label))
    }

    // ---- Classes ----

    pub fn method(
        &mut self,
        name: &str,
        params: Vec<&str>,
        body: NodeIndex,
        is_async: bool,
    ) -> ClassMember {
        let params = params
            .into_iter()
            .map(|p| Param {
                name: BindingName::Identifier(self.atom(p)),
                initializer: None,
                rest: false,
            })
            .collect();
        ClassMember {
            name: self.atom(name),
            kind: ClassMemberKind::Method,
            is_static: false,
            params,
            body: Some(body),
            is_async,
            is_generator: false,
        }
    }

    pub fn class_decl(
        &mut self,
        name: &str,
        super_class: Option<&str>,
        members: Vec<ClassMember>,
    ) -> NodeIndex {
        let name_atom = self.atom(name);
        let super_class = super_class.map(|s| self.atom(s));
        self.push(NodeKind::ClassDecl(ClassData {
            name: Some(name_atom),
            super_class,
            members,
        }))
    }

    // ---- Enums ----

    pub fn enum_decl(&mut self, name: &str, is_const: bool, members: Vec<(&str, EnumInitializer)>) -> NodeIndex {
        let name_atom = self.atom(name);
        let members = members
            .into_iter()
            .map(|(n, init)| EnumMember {
                name: self.atom(n),
                initializer: init,
            })
            .collect();
        self.push(NodeKind::EnumDecl(EnumData {
            name: name_atom,
            is_const,
            members,
        }))
    }

    // ---- Modules ----

    pub fn export_decl(&mut self, inner: NodeIndex) -> NodeIndex {
        self.push(NodeKind::ExportDecl(inner))
    }

    pub fn export_default(&mut self, expr: NodeIndex) -> NodeIndex {
        self.push(NodeKind::ExportDefault(expr))
    }

    pub fn export_named(&mut self, items: Vec<(&str, &str)>, from: Option<&str>) -> NodeIndex {
        let items = items
            .into_iter()
            .map(|(local, exported)| ExportItem::Named {
                local: self.atom(local),
                exported: self.atom(exported),
            })
            .collect();
        let from = from.map(|f| self.atom(f));
        self.push(NodeKind::ExportNamed { items, from })
    }

    pub fn export_all(&mut self, from: &str) -> NodeIndex {
        let from = self.atom(from);
        self.push(NodeKind::ExportAll { from })
    }

    pub fn import_decl(
        &mut self,
        module_specifier: &str,
        named: Vec<(&str, &str)>,
        default: Option<&str>,
    ) -> NodeIndex {
        let module_specifier = self.atom(module_specifier);
        let named = named
            .into_iter()
            .map(|(local, exported)| ExportItem::Named {
                local: self.atom(local),
                exported: self.atom(exported),
            })
            .collect();
        let default = default.map(|d| self.atom(d));
        self.push(NodeKind::ImportDecl {
            module_specifier,
            named,
            default,
            namespace: None,
        })
    }
}

pub const fn for_init_none() -> ForInit {
    ForInit::None
}
