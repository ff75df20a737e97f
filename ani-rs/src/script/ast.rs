//! Syntax tree for ani scripts.
//!
//! The parser builds the tree with every semantic slot empty.  Scope
//! registration fills in block ids, variable slots and identifier scope
//! cursors; type-fixup then fills in node types, resolved operators,
//! assignment strategies and call targets, folding constant subtrees into
//! [`ExprKind::Literal`] nodes as it goes.

use super::ops::{OpFn, OpId};
use super::registry::{Binding, BlockId, FunctionMatch, ScopeCursor, VarRef};
use super::types::{AssignmentFunc, ExprValueType, IncDecFunc, IncDecOp, ScopeHandle};
use super::value::ExprValue;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    /// Static type, `Unknown` until type-fixup has visited the node.
    pub ty: ExprValueType,
    pub line: u32,
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Self { kind, ty: ExprValueType::unknown(), line }
    }

    pub fn literal(value: ExprValue, line: u32) -> Self {
        let ty = value.value_type();
        Self { kind: ExprKind::Literal(value), ty, line }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    /// Where the identifier appears, set by registration.
    pub scope: Option<ScopeCursor>,
    /// What the identifier denotes, set by type-fixup.
    pub binding: Option<Binding>,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), scope: None, binding: None }
    }
}

/// Call argument, optionally named (`f(width: 2)`).
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

/// How a `.name` selection is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    /// Vector component or range endpoint.
    Component(usize),
    /// Euclidean norm of a vector.
    Length,
    /// Character count of a string.
    StringLength,
    Dim,
    Rows,
    Cols,
    ArraySize,
    /// Member variable of a scope instance.
    Scope { slot: usize },
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(ExprValue),
    Ident(Ident),
    /// `<e1, ..., en>`
    Vector { elems: Vec<Expr> },
    /// `{e1, ..., en}`; `convs[i]` widens element `i` when it is not an
    /// exact match for the element type.
    Array { elems: Vec<Expr>, convs: Vec<Option<AssignmentFunc>> },
    Unary { op: OpId, operand: Box<Expr>, compute: Option<OpFn> },
    Binary { op: OpId, lhs: Box<Expr>, rhs: Box<Expr>, compute: Option<OpFn> },
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
        convs: [Option<AssignmentFunc>; 2],
    },
    /// `target = value`, or `target op= value` when `op` is set.
    Assign {
        op: Option<OpId>,
        target: Box<Expr>,
        value: Box<Expr>,
        compute: Option<OpFn>,
        assign: Option<AssignmentFunc>,
    },
    IncDec { op: IncDecOp, prefix: bool, target: Box<Expr>, func: Option<IncDecFunc> },
    Subscript { base: Box<Expr>, index: Box<Expr> },
    Member { base: Box<Expr>, name: String, access: Option<MemberAccess> },
    /// The callee is an identifier whose binding is a function placeholder
    /// until the argument types are known.
    Call { callee: Box<Expr>, args: Vec<Arg>, resolved: Option<FunctionMatch> },
    NewObject { name: String, args: Vec<Arg>, resolved: Option<FunctionMatch> },
    NewArray { elem: TypeSpec, size: Box<Expr>, elem_ty: ExprValueType },
}

/// A type as written in the source.
#[derive(Debug, Clone)]
pub enum TypeSpec {
    Integer,
    Scalar,
    Range,
    String,
    Vector(Box<Expr>),
    Matrix(Box<Expr>, Box<Expr>),
    Named(String),
    Array(Box<TypeSpec>),
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub var: Option<VarRef>,
    pub assign: Option<AssignmentFunc>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub spec: TypeSpec,
    pub ty: ExprValueType,
    pub vars: Vec<Declarator>,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub id: Option<BlockId>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: u32) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Empty,
    Expr(Expr),
    Decl(Decl),
    Block(Block),
    If { cond: Expr, then: Box<Stmt>, otherwise: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    /// A `for` with a declaration in its init clause is wrapped in a block
    /// by the parser, so `init` is only ever an expression.
    For { init: Option<Expr>, cond: Option<Expr>, step: Option<Expr>, body: Box<Stmt> },
    Return(Option<Expr>),
    Break,
}

#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub spec: TypeSpec,
    pub names: Vec<String>,
    pub line: u32,
}

/// `object Name { members }`
#[derive(Debug, Clone)]
pub struct ObjectDecl {
    pub name: String,
    pub members: Vec<MemberDecl>,
    pub handle: Option<ScopeHandle>,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub objects: Vec<ObjectDecl>,
    pub body: Block,
}

// ── Traversal ─────────────────────────────────────────────────────────────────

impl Expr {
    /// Visit the direct sub-expressions, in evaluation order.
    pub fn children_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => {}
            ExprKind::Vector { elems } | ExprKind::Array { elems, .. } => elems.iter_mut().for_each(f),
            ExprKind::Unary { operand, .. } => f(operand),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            ExprKind::Conditional { cond, then, otherwise, .. } => {
                f(cond);
                f(then);
                f(otherwise);
            }
            ExprKind::Assign { target, value, .. } => {
                f(value);
                f(target);
            }
            ExprKind::IncDec { target, .. } => f(target),
            ExprKind::Subscript { base, index } => {
                f(base);
                f(index);
            }
            ExprKind::Member { base, .. } => f(base),
            ExprKind::Call { callee, args, .. } => {
                f(callee);
                args.iter_mut().for_each(|a| f(&mut a.value));
            }
            ExprKind::NewObject { args, .. } => args.iter_mut().for_each(|a| f(&mut a.value)),
            ExprKind::NewArray { elem, size, .. } => {
                elem.exprs_mut(f);
                f(size);
            }
        }
    }

    /// Pre-order walk over this expression and everything below it.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        f(self);
        self.children_mut(&mut |e| e.walk_mut(f));
    }
}

impl TypeSpec {
    /// Dimension expressions inside the spec.
    pub fn exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            TypeSpec::Vector(n) => f(n),
            TypeSpec::Matrix(r, c) => {
                f(r);
                f(c);
            }
            TypeSpec::Array(inner) => inner.exprs_mut(f),
            TypeSpec::Integer | TypeSpec::Scalar | TypeSpec::Range | TypeSpec::String | TypeSpec::Named(_) => {}
        }
    }
}
