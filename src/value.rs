//! The tagged runtime value model (§3, §4.1).
//!
//! Every `Value` carries a `time` delta: the virtual duration attributed to producing it.
//! Arithmetic and native calls compose `time` additively; sampling an `Outcomes` consumes the
//! chosen bucket's value, including whatever `time` that bucket's body accrued.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use smallvec::SmallVec;

use crate::ast::{EnumDecl, MethodDecl};
use crate::concurrency::FutureHandle;
use crate::env::Env;
use crate::errors::EvalError;
use crate::instance::ComponentHandle;

/// A runtime value together with the virtual time spent producing it.
#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub time: Duration,
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self { kind, time: Duration::ZERO }
    }

    pub fn with_time(kind: ValueKind, time: Duration) -> Self {
        Self { kind, time }
    }

    pub fn nil() -> Self {
        Self::new(ValueKind::Nil)
    }

    pub fn bool(b: bool) -> Self {
        Self::new(ValueKind::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Self::new(ValueKind::Int(i))
    }

    pub fn float(f: f64) -> Self {
        Self::new(ValueKind::Float(f))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(ValueKind::String(Arc::from(s.into())))
    }

    /// Adds `extra` virtual time to this value, returning it (used when a caller charges
    /// additional time onto an already-produced value, e.g. a sampled bool in `IsTrue`).
    pub fn plus_time(mut self, extra: Duration) -> Self {
        self.time += extra;
        self
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.kind, ValueKind::Nil)
    }

    pub fn get_bool(&self) -> Result<bool, EvalError> {
        match &self.kind {
            ValueKind::Bool(b) => Ok(*b),
            other => Err(EvalError::TypeMismatch {
                op: "get_bool".into(),
                detail: format!("expected Bool, got {}", other.type_name()),
                pos: None,
            }),
        }
    }

    pub fn get_int(&self) -> Result<i64, EvalError> {
        match &self.kind {
            ValueKind::Int(i) => Ok(*i),
            other => Err(EvalError::TypeMismatch {
                op: "get_int".into(),
                detail: format!("expected Int, got {}", other.type_name()),
                pos: None,
            }),
        }
    }

    pub fn get_float(&self) -> Result<f64, EvalError> {
        match &self.kind {
            ValueKind::Float(f) => Ok(*f),
            ValueKind::Int(i) => Ok(*i as f64),
            other => Err(EvalError::TypeMismatch {
                op: "get_float".into(),
                detail: format!("expected Float, got {}", other.type_name()),
                pos: None,
            }),
        }
    }

    pub fn get_tuple(&self) -> Result<&[Value], EvalError> {
        match &self.kind {
            ValueKind::Tuple(values) => Ok(values),
            other => Err(EvalError::TypeMismatch {
                op: "get_tuple".into(),
                detail: format!("expected Tuple, got {}", other.type_name()),
                pos: None,
            }),
        }
    }

    pub fn outcomes(&self) -> Result<&Outcomes, EvalError> {
        match &self.kind {
            ValueKind::Outcomes(o) => Ok(o.as_ref()),
            other => Err(EvalError::TypeMismatch {
                op: "outcomes".into(),
                detail: format!("expected Outcomes, got {}", other.type_name()),
                pos: None,
            }),
        }
    }

    /// Evaluates truthiness. A plain `Bool` is used directly; a `Bool` `Outcomes` is sampled and
    /// the sample's time is folded into the returned value's time so the caller can charge its
    /// clock with a single addition.
    pub fn is_true(&self, rng: &mut impl Rng) -> Result<Value, EvalError> {
        match &self.kind {
            ValueKind::Bool(b) => Ok(Value::bool(*b)),
            ValueKind::Outcomes(o) => {
                let (sampled, sample_time) = o.sample(rng)?;
                let b = sampled.get_bool()?;
                Ok(Value::bool(b).plus_time(sample_time + sampled.time))
            }
            other => Err(EvalError::TypeMismatch {
                op: "is_true".into(),
                detail: format!("expected Bool or Outcomes<Bool>, got {}", other.type_name()),
                pos: None,
            }),
        }
    }

    /// Renders a value as the short string the tracer and measurement matcher compare against
    /// (e.g. `"true"`, `"InternalError"`, `"42"`).
    pub fn render(&self) -> String {
        match &self.kind {
            ValueKind::Nil => "nil".to_string(),
            ValueKind::Bool(b) => b.to_string(),
            ValueKind::Int(i) => i.to_string(),
            ValueKind::Float(f) => f.to_string(),
            ValueKind::String(s) => s.to_string(),
            ValueKind::Tuple(values) => {
                let parts: Vec<String> = values.iter().map(Value::render).collect();
                format!("({})", parts.join(", "))
            }
            ValueKind::Outcomes(_) => "<outcomes>".to_string(),
            ValueKind::Component(c) => format!("<component {}>", c.decl.name),
            ValueKind::Method(m) => format!("<method {}>", m.decl.name),
            ValueKind::Future(_) => "<future>".to_string(),
            ValueKind::Ref(r) => format!("<ref .{}>", r.attribute),
            ValueKind::Enum(e) => e.decl.variants.get(e.variant_index).cloned().unwrap_or_default(),
        }
    }
}

/// The closed sum of runtime value shapes (§3).
#[derive(Debug, Clone)]
pub enum ValueKind {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Tuple(Vec<Value>),
    Outcomes(Box<Outcomes>),
    Component(ComponentHandle),
    Method(Box<MethodValue>),
    Future(FutureHandle),
    Ref(Box<RefValue>),
    Enum(EnumValue),
}

impl ValueKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Tuple(_) => "Tuple",
            Self::Outcomes(_) => "Outcomes",
            Self::Component(_) => "Component",
            Self::Method(_) => "Method",
            Self::Future(_) => "Future",
            Self::Ref(_) => "Ref",
            Self::Enum(_) => "Enum",
        }
    }
}

/// A bound callable: a method declaration paired with the environment of the component it was
/// accessed from ("SavedEnv").
#[derive(Debug, Clone)]
pub struct MethodValue {
    pub decl: Arc<MethodDecl>,
    pub receiver: Option<ComponentHandle>,
    pub saved_env: Env,
}

/// An lvalue produced by member access: `(receiver, attribute)`. Consumed by `Set` and by
/// further dotted access, which lets nested dependency paths (`a.b.c`) resolve recursively
/// rather than requiring eager flattening at initialization (§9 open question).
#[derive(Debug, Clone)]
pub struct RefValue {
    pub receiver: Box<Value>,
    pub attribute: String,
}

/// An enum variant value: the declaration plus the chosen variant's index.
#[derive(Debug, Clone)]
pub struct EnumValue {
    pub decl: Arc<EnumDecl>,
    pub variant_index: usize,
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.decl, &other.decl) && self.variant_index == other.variant_index
    }
}

/// A discrete probability distribution over `Value`s: a finite list of `(weight, value)`
/// buckets. Weights are non-negative; normalization happens implicitly at sample time.
#[derive(Debug, Clone, Default)]
pub struct Outcomes {
    buckets: SmallVec<[(f64, Value); 4]>,
}

impl Outcomes {
    pub fn new() -> Self {
        Self { buckets: SmallVec::new() }
    }

    pub fn add(&mut self, weight: f64, value: Value) {
        self.buckets.push((weight, value));
    }

    pub fn is_empty(&self) -> bool {
        self.total_weight() <= 0.0
    }

    pub fn total_weight(&self) -> f64 {
        self.buckets.iter().map(|(w, _)| w).sum()
    }

    pub fn buckets(&self) -> &[(f64, Value)] {
        &self.buckets
    }

    /// Picks a bucket proportionally to its weight. Returns the chosen value and the additional
    /// time the act of sampling itself spends (always zero today — sampling is instantaneous;
    /// the returned value's own `time` field, e.g. a modeled latency bucket, is carried
    /// separately and must be added by the caller alongside this).
    pub fn sample(&self, rng: &mut impl Rng) -> Result<(&Value, Duration), EvalError> {
        let total = self.total_weight();
        if total <= 0.0 || self.buckets.is_empty() {
            return Err(EvalError::EmptySample { pos: None });
        }
        let mut roll = rng.gen::<f64>() * total;
        for (weight, value) in &self.buckets {
            if roll < *weight {
                return Ok((value, Duration::ZERO));
            }
            roll -= weight;
        }
        // Floating point rounding can leave a sliver unconsumed; fall back to the last bucket.
        Ok((&self.buckets.last().expect("checked non-empty above").1, Duration::ZERO))
    }
}

/// Structural equality for scalars and enum variants; component/method/future compare by
/// identity (§4.1).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (&a.kind, &b.kind) {
        (ValueKind::Nil, ValueKind::Nil) => true,
        (ValueKind::Bool(x), ValueKind::Bool(y)) => x == y,
        (ValueKind::Int(x), ValueKind::Int(y)) => x == y,
        (ValueKind::Float(x), ValueKind::Float(y)) => x == y,
        (ValueKind::Int(x), ValueKind::Float(y)) | (ValueKind::Float(y), ValueKind::Int(x)) => (*x as f64) == *y,
        (ValueKind::String(x), ValueKind::String(y)) => x == y,
        (ValueKind::Tuple(x), ValueKind::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (ValueKind::Enum(x), ValueKind::Enum(y)) => x == y,
        (ValueKind::Component(x), ValueKind::Component(y)) => x == y,
        _ => false,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
