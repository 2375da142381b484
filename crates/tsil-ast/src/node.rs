//! The typed AST: a closed family of `NodeKind` variants.
//!
//! Covers the full surface this backend accepts from its front end:
//! literals, identifiers, the full operator surface, arrow
//! functions (async/generator), template literals (raw and tagged),
//! spread, type assertion/satisfies (erased at this layer — they carry
//! no runtime behavior, only their inner expression matters to codegen),
//! await/yield, dynamic import, import.meta, non-null assertion, class
//! expressions, regex literals, and the standard statement families
//! (including multi-module import/export forms).
//!
//! Every visitor over `NodeKind` must be an exhaustive match with no
//! wildcard arm reaching a "handled" case — add a variant here and every
//! `match` in `tsil-analysis`/`tsil-codegen` fails to compile until it is
//! taught about it. The one exception is the IL Emitter's top-level
//! dispatch, which intentionally ends in a catch-all that raises
//! `AST-malformed` (see `tsil-common::diagnostics`), so that a variant
//! the emitter hasn't been extended for yet is a compile error in the
//! *checker-to-emitter contract* sense is turned into a graceful
//! diagnostic rather than a panic.

use crate::arena::NodeIndex;
use crate::ops::{AssignOp, BinaryOp, LogicalOp, UnaryOp, UpdateOp};
use tsil_common::{Atom, Span};

#[derive(Clone, Debug)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(span: Span, kind: NodeKind) -> Self {
        Node { span, kind }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Clone, Debug)]
pub struct VarDeclarator {
    /// Binding name. Destructuring patterns are represented as a nested
    /// `ObjectPattern`/`ArrayPattern` node index; simple identifiers are
    /// interned directly for the common case.
    pub name: BindingName,
    pub initializer: Option<NodeIndex>,
}

#[derive(Clone, Debug)]
pub enum BindingName {
    Identifier(Atom),
    Pattern(NodeIndex),
}

#[derive(Clone, Debug)]
pub struct ObjectProp {
    pub key: Atom,
    pub value: NodeIndex,
    pub computed: bool,
    pub shorthand: bool,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: BindingName,
    pub initializer: Option<NodeIndex>,
    pub rest: bool,
}

#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: Option<Atom>,
    pub params: Vec<Param>,
    pub body: NodeIndex,
    pub is_async: bool,
    pub is_generator: bool,
}

/// Arrows never rebind `this`; function expressions establish their own
/// `this` boundary. The type checker upstream is trusted to have bound
/// `this` references correctly before this backend ever sees the AST.
#[derive(Clone, Debug)]
pub struct ArrowData {
    pub params: Vec<Param>,
    pub body: NodeIndex,
    pub is_async: bool,
    pub is_generator: bool,
}

#[derive(Clone, Debug)]
pub enum ClassMemberKind {
    Method,
    Getter,
    Setter,
    Constructor,
    Field,
}

#[derive(Clone, Debug)]
pub struct ClassMember {
    pub name: Atom,
    pub kind: ClassMemberKind,
    pub is_static: bool,
    /// Function body for methods/getters/setters/constructor; the
    /// initializer expression for a field.
    pub params: Vec<Param>,
    pub body: Option<NodeIndex>,
    pub is_async: bool,
    pub is_generator: bool,
}

#[derive(Clone, Debug)]
pub struct ClassData {
    pub name: Option<Atom>,
    pub super_class: Option<Atom>,
    pub members: Vec<ClassMember>,
}

#[derive(Clone, Debug)]
pub enum EnumInitializer {
    /// No explicit initializer; numeric enums auto-increment from the
    /// previous member (or 0 for the first member).
    None,
    Expr(NodeIndex),
}

#[derive(Clone, Debug)]
pub struct EnumMember {
    pub name: Atom,
    pub initializer: EnumInitializer,
}

#[derive(Clone, Debug)]
pub struct EnumData {
    pub name: Atom,
    pub is_const: bool,
    pub members: Vec<EnumMember>,
}

#[derive(Clone, Debug)]
pub struct SwitchCase {
    /// `None` for `default:`.
    pub test: Option<NodeIndex>,
    pub body: Vec<NodeIndex>,
}

#[derive(Clone, Debug)]
pub struct CatchClause {
    pub param: Option<Atom>,
    pub body: NodeIndex,
}

#[derive(Clone, Debug)]
pub enum ForInit {
    VarDecl { kind: VarKind, decls: Vec<VarDeclarator> },
    Expr(NodeIndex),
    None,
}

#[derive(Clone, Debug)]
pub enum ExportItem {
    /// `export { a }` or `export { a as b }`.
    Named { local: Atom, exported: Atom },
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    // ---- Literals & identifiers ----
    NumericLiteral(f64),
    StringLiteral(Atom),
    BooleanLiteral(bool),
    NullLiteral,
    UndefinedLiteral,
    RegexLiteral(Atom),
    Identifier(Atom),
    ThisExpr,
    SuperExpr,

    // ---- Compound literals ----
    TemplateLiteral {
        quasis: Vec<Atom>,
        exprs: Vec<NodeIndex>,
        /// `Some(tag)` for a tagged template.
        tag: Option<NodeIndex>,
    },
    ArrayLiteral(Vec<NodeIndex>),
    ObjectLiteral(Vec<ObjectProp>),
    SpreadElement(NodeIndex),

    // ---- Operators ----
    Binary {
        op: BinaryOp,
        left: NodeIndex,
        right: NodeIndex,
    },
    Logical {
        op: LogicalOp,
        left: NodeIndex,
        right: NodeIndex,
    },
    Unary {
        op: UnaryOp,
        operand: NodeIndex,
    },
    UpdateExpr {
        op: UpdateOp,
        prefix: bool,
        operand: NodeIndex,
    },
    Assign {
        op: AssignOp,
        target: NodeIndex,
        value: NodeIndex,
    },
    Conditional {
        test: NodeIndex,
        consequent: NodeIndex,
        alternate: NodeIndex,
    },
    Grouping(NodeIndex),

    // ---- Calls / construction / member access ----
    Call {
        callee: NodeIndex,
        args: Vec<NodeIndex>,
        optional: bool,
    },
    New {
        callee: NodeIndex,
        args: Vec<NodeIndex>,
    },
    PropertyAccess {
        object: NodeIndex,
        name: Atom,
        optional: bool,
    },
    IndexAccess {
        object: NodeIndex,
        index: NodeIndex,
        optional: bool,
    },
    NonNullAssertion(NodeIndex),
    TypeAssertion(NodeIndex),
    Satisfies(NodeIndex),

    // ---- Functions / classes ----
    Arrow(ArrowData),
    FunctionExpr(FunctionData),
    ClassExpr(ClassData),

    // ---- Async / generator control ----
    Await(NodeIndex),
    Yield {
        argument: Option<NodeIndex>,
        delegate: bool,
    },
    DynamicImport(NodeIndex),
    ImportMeta,

    // ---- Statements ----
    Block(Vec<NodeIndex>),
    ExprStmt(NodeIndex),
    VarDeclStmt {
        kind: VarKind,
        decls: Vec<VarDeclarator>,
    },
    FunctionDecl(FunctionData),
    ClassDecl(ClassData),
    EnumDecl(EnumData),
    If {
        test: NodeIndex,
        consequent: NodeIndex,
        alternate: Option<NodeIndex>,
    },
    While {
        test: NodeIndex,
        body: NodeIndex,
    },
    DoWhile {
        body: NodeIndex,
        test: NodeIndex,
    },
    For {
        init: ForInit,
        test: Option<NodeIndex>,
        update: Option<NodeIndex>,
        body: NodeIndex,
    },
    ForOf {
        decl_kind: VarKind,
        name: Atom,
        iterable: NodeIndex,
        body: NodeIndex,
        is_await: bool,
    },
    ForIn {
        decl_kind: VarKind,
        name: Atom,
        object: NodeIndex,
        body: NodeIndex,
    },
    Switch {
        discriminant: NodeIndex,
        cases: Vec<SwitchCase>,
    },
    Try {
        block: NodeIndex,
        catch: Option<CatchClause>,
        finally: Option<NodeIndex>,
    },
    Throw(NodeIndex),
    Return(Option<NodeIndex>),
    Break(Option<Atom>),
    Continue(Option<Atom>),
    Labeled {
        label: Atom,
        body: NodeIndex,
    },
    Empty,

    // ---- Modules ----
    ImportDecl {
        module_specifier: Atom,
        /// `import { a, b as c } from "..."`; empty for a side-effect-only import.
        named: Vec<ExportItem>,
        default: Option<Atom>,
        namespace: Option<Atom>,
    },
    ExportNamed {
        items: Vec<ExportItem>,
        /// `export { a } from "other"` when `Some`.
        from: Option<Atom>,
    },
    ExportAll {
        from: Atom,
    },
    ExportDefault(NodeIndex),
    /// `export` modifier wrapping a declaration statement (function,
    /// class, enum, or variable declaration).
    ExportDecl(NodeIndex),
}
