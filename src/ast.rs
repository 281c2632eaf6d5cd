//! The model AST this crate consumes.
//!
//! The front-end parser/type-checker that produces and resolves this tree is out of scope (§1);
//! the types here are plain, publicly constructible structs and enums so a caller — or a test —
//! can build a validated tree directly without going through a parser.

use std::sync::Arc;

/// A source position, when the front end supplied one. Optional throughout: a tree built by
/// hand (e.g. in a test) need not carry positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

/// A loaded model file: enums, component declarations, and system declarations, plus imports
/// already resolved by the front end.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub name: String,
    pub imports: Vec<Import>,
    pub enums: Vec<Arc<EnumDecl>>,
    pub components: Vec<Arc<ComponentDecl>>,
    pub systems: Vec<Arc<SystemDecl>>,
}

/// A resolved import: the front end has already located the defining file.
#[derive(Debug, Clone)]
pub struct Import {
    pub alias: String,
    pub resolved_file: Arc<File>,
}

/// An enum declaration; `variants[i]` is the name for variant index `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDecl {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v == name)
    }
}

/// A declared dependency (`uses dep: Kind`).
#[derive(Debug, Clone)]
pub struct DependencyDecl {
    pub name: String,
    pub resolved_component: Arc<ComponentDecl>,
}

/// A declared parameter, with its default expression if any.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub default: Option<Expr>,
}

/// A method declaration: ordered parameter names and a body.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Stmt,
}

/// A component declaration. `is_native` components have no SDL body for their methods; they are
/// looked up in the native registry instead (§4.5a).
#[derive(Debug, Clone)]
pub struct ComponentDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub uses: Vec<DependencyDecl>,
    pub methods: Vec<Arc<MethodDecl>>,
    pub is_native: bool,
    /// Nested instance declarations and dependency overrides written directly in the
    /// component's body (e.g. `uses cache = new Cache()`), compiled by the same two-pass
    /// Initializer as a system body (§4.4).
    pub init_decls: Vec<InitDecl>,
}

impl ComponentDecl {
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDecl>> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyDecl> {
        self.uses.iter().find(|d| d.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// A single declaration line inside a system or component initializer body, before compilation
/// into the ordered statement list (§4.4).
#[derive(Debug, Clone)]
pub enum InitDecl {
    /// `var = new Kind(param: value, ...)` — instance declaration with constructor overrides.
    Instance {
        target: String,
        component: Arc<ComponentDecl>,
        overrides: Vec<(String, Expr)>,
    },
    /// `uses dep = other_var` — dependency override, wiring an already-declared instance.
    DependencyOverride { target: String, dependency: String, value: Expr },
    /// `let name = expr` — a plain top-level binding.
    Let { name: String, value: Expr },
}

/// A system declaration: top-level instance declarations plus overrides.
#[derive(Debug, Clone)]
pub struct SystemDecl {
    pub name: String,
    pub body: Vec<InitDecl>,
}

/// Statements, per §6.
#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Vec<Stmt>),
    Let { names: Vec<String>, value: Expr },
    Set { target: Expr, value: Expr },
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    For { cond: Expr, body: Box<Stmt> },
    Return(Option<Expr>),
    Expr(Expr),
    Delay(Expr),
}

/// A single weighted case in a `distribute` expression.
#[derive(Debug, Clone)]
pub struct DistributeCase {
    pub weight: Expr,
    pub body: Expr,
}

/// Expressions, per §6.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Identifier(String),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Member { receiver: Box<Expr>, member: String },
    New { component: Arc<ComponentDecl>, args: Vec<(String, Expr)> },
    Sample(Box<Expr>),
    Distribute { cases: Vec<DistributeCase>, default: Option<Box<Expr>>, total: Option<Box<Expr>> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Tuple(Vec<Expr>),
    Go { body: Box<Stmt> },
    GoBatch { count: Box<Expr>, body: Box<Stmt> },
    Wait { futures: Vec<Expr>, aggregator: AggregatorKind, args: Vec<Expr> },
    /// `Kind.Variant` — an enum-variant literal resolved against a known enum declaration.
    EnumVariant { decl: Arc<EnumDecl>, variant: String },
}

/// Literal values embeddable directly in the AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A literal virtual duration, e.g. `10ms`.
    DurationNanos(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorKind {
    WaitAll,
    WaitAny,
}
