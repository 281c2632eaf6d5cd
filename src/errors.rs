//! Typed error values for every fallible boundary in the core.
//!
//! Kinds are grouped by subsystem per the error-handling design: evaluation errors are user
//! model errors (bad identifier, division by zero, empty sample, …), native errors carry the
//! receiver/method that failed, and `Internal` variants mark invariant violations that are
//! programmer bugs rather than user mistakes. None of these unwind past a public API boundary.

use std::fmt;

use crate::ast::SourcePos;

/// Error raised while evaluating an expression or statement.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// An identifier had no binding reachable from the current environment.
    UnknownIdentifier { name: String, pos: Option<SourcePos> },
    /// A member access named something the component declaration does not have.
    UnknownMember { component: String, member: String, pos: Option<SourcePos> },
    /// A `uses` dependency was read before it was bound.
    UnsetDependency { component: String, dependency: String, pos: Option<SourcePos> },
    /// A binary/unary operator was applied to operands of the wrong shape.
    TypeMismatch { op: String, detail: String, pos: Option<SourcePos> },
    /// Division or modulo by zero.
    DivisionByZero { pos: Option<SourcePos> },
    /// `sample` was applied to an `Outcomes` with no buckets, or all-zero weight.
    EmptySample { pos: Option<SourcePos> },
    /// A call target did not resolve to a `Method` value.
    NotCallable { detail: String, pos: Option<SourcePos> },
    /// Argument count did not match parameter count at a call site.
    ArityMismatch { expected: usize, got: usize, pos: Option<SourcePos> },
    /// A native method invocation failed.
    Native(NativeError),
    /// An invariant the crate itself is responsible for was violated.
    Internal(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownIdentifier { name, .. } => write!(f, "unknown identifier `{name}`"),
            Self::UnknownMember { component, member, .. } => {
                write!(f, "component `{component}` has no member `{member}`")
            }
            Self::UnsetDependency { component, dependency, .. } => {
                write!(f, "dependency `{dependency}` not set on `{component}`")
            }
            Self::TypeMismatch { op, detail, .. } => write!(f, "type mismatch in `{op}`: {detail}"),
            Self::DivisionByZero { .. } => write!(f, "division by zero"),
            Self::EmptySample { .. } => write!(f, "sample of empty outcomes"),
            Self::NotCallable { detail, .. } => write!(f, "not callable: {detail}"),
            Self::ArityMismatch { expected, got, .. } => {
                write!(f, "expected {expected} arguments, got {got}")
            }
            Self::Native(err) => write!(f, "{err}"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<NativeError> for EvalError {
    fn from(err: NativeError) -> Self {
        Self::Native(err)
    }
}

/// Error raised inside the native-component bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeError {
    pub receiver: String,
    pub method: String,
    pub detail: String,
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native call {}.{} failed: {}", self.receiver, self.method, self.detail)
    }
}

impl std::error::Error for NativeError {}

/// Error raised while compiling or running a component/system Initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum InitError {
    /// A component declaration referenced by `new` could not be found.
    UnknownComponent(String),
    /// Evaluating a constructed instance's default expressions failed.
    Eval(EvalError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownComponent(name) => write!(f, "unknown component declaration `{name}`"),
            Self::Eval(err) => write!(f, "initializer evaluation failed: {err}"),
        }
    }
}

impl std::error::Error for InitError {}

impl From<EvalError> for InitError {
    fn from(err: EvalError) -> Self {
        Self::Eval(err)
    }
}

/// A single uninitialized dependency, reported (not raised) after materialization.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UninitializedDependency {
    /// Dotted path from the system root, e.g. `server.cache`.
    pub path: String,
    pub pos: Option<SourcePos>,
}

/// Error raised before flow analysis can even start iterating.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowError {
    /// A generator entry point named a method the component declaration does not have.
    UnknownMethod { component: String, method: String },
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMethod { component, method } => {
                write!(f, "component `{component}` has no method `{method}`")
            }
        }
    }
}

impl std::error::Error for FlowError {}

/// Non-fatal issue recorded during flow analysis; the solver keeps going.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum FlowWarning {
    UnresolvedCallTarget { component: String, method: String, expr: String },
    CycleBroken { component: String },
    DepthLimitReached { component: String },
    MaxIterationsReached { iterations: usize },
}

impl fmt::Display for FlowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedCallTarget { component, method, expr } => {
                write!(f, "{component}.{method}: could not resolve call target `{expr}`")
            }
            Self::CycleBroken { component } => write!(f, "cycle broken at `{component}`"),
            Self::DepthLimitReached { component } => {
                write!(f, "call-stack depth limit reached at `{component}`")
            }
            Self::MaxIterationsReached { iterations } => {
                write!(f, "flow solver stopped after {iterations} iterations without converging")
            }
        }
    }
}
