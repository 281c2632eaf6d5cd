//! The tree-walking interpreter (§4.5).
//!
//! [`Interpreter`] is stateless and shareable (`Arc<dyn Tracer>` plus a plain `RuntimeConfig`);
//! all per-call-chain mutable state — the virtual clock, the seeded RNG, the tracer's parent-id
//! stack, and collected evaluation errors — lives in a [`CallContext`] the caller owns. This is
//! what lets the batch runner (§4.11) give each worker its own context while sharing one
//! `Interpreter` and one tracer.

mod expressions;
mod statements;

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::ast::{Expr, Stmt};
use crate::config::RuntimeConfig;
use crate::env::Env;
use crate::errors::EvalError;
use crate::instance::ComponentHandle;
use crate::measurement::MeasurementStore;
use crate::native::NativeRegistry;
use crate::tracer::{NoopTracer, Tracer};
use crate::value::{MethodValue, Value};

/// Per-call-chain mutable state threaded through every `eval_*` call. Never shared across
/// threads — the batch runner gives each worker its own (§5).
pub struct CallContext {
    pub clock: Duration,
    pub rng: ChaCha8Rng,
    parent_stack: Vec<u64>,
    pub errors: Vec<EvalError>,
}

impl CallContext {
    pub fn new(seed: u64) -> Self {
        Self { clock: Duration::ZERO, rng: ChaCha8Rng::seed_from_u64(seed), parent_stack: vec![0], errors: Vec::new() }
    }

    pub fn current_parent(&self) -> u64 {
        *self.parent_stack.last().expect("parent stack never empty")
    }

    pub fn push_parent(&mut self, id: u64) {
        self.parent_stack.push(id);
    }

    pub fn pop_parent(&mut self) {
        if self.parent_stack.len() > 1 {
            self.parent_stack.pop();
        }
    }

    /// Advances the virtual clock by `value`'s time and returns `value` unchanged. Every
    /// expression evaluation funnels its result through this so the clock invariant
    /// (monotonic non-decreasing, §8) holds by construction.
    pub fn charge(&mut self, value: Value) -> Value {
        self.clock += value.time;
        value
    }
}

/// The tree-walking evaluator. Cheap to clone (an `Arc<dyn Tracer>` and a small config struct);
/// share one across worker threads in the batch runner.
#[derive(Clone)]
pub struct Interpreter {
    pub tracer: Arc<dyn Tracer>,
    pub config: RuntimeConfig,
    pub native_registry: Arc<NativeRegistry>,
    /// Optional live measurement store, fed the same exit observations as `tracer` (§4.9). Kept
    /// separate from `Tracer` because the store needs pointer identity on the `ComponentHandle`
    /// it is matching against, not the rendered name a `TraceEvent` carries for its JSON
    /// external interface (§6).
    pub measurements: Option<Arc<MeasurementStore>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self {
            tracer: Arc::new(NoopTracer),
            config: RuntimeConfig::default(),
            native_registry: Arc::new(NativeRegistry::default()),
            measurements: None,
        }
    }
}

impl Interpreter {
    pub fn new(tracer: Arc<dyn Tracer>, config: RuntimeConfig, native_registry: Arc<NativeRegistry>) -> Self {
        Self { tracer, config, native_registry, measurements: None }
    }

    pub fn with_measurements(mut self, store: Arc<MeasurementStore>) -> Self {
        self.measurements = Some(store);
        self
    }

    /// Evaluates `stmt` against `env` inside `ctx`. Returns the last produced value and whether
    /// a `return` propagated out of it.
    pub fn eval_stmt(&self, stmt: &Stmt, env: &Env, ctx: &mut CallContext) -> Result<(Value, bool), EvalError> {
        statements::eval_stmt(self, stmt, env, ctx)
    }

    /// Evaluates `expr` against `env` inside `ctx`.
    pub fn eval_expr(&self, expr: &Expr, env: &Env, ctx: &mut CallContext) -> Result<Value, EvalError> {
        expressions::eval_expr(self, expr, env, ctx)
    }

    /// Invokes a bound method value with already-evaluated `args` (§4.5 CallExpr). Emits enter/
    /// exit trace events around SDL method bodies; native receivers are dispatched through the
    /// bridge instead (§4.5a) and are *not* individually traced here (the native implementation
    /// may choose to, via its own instrumentation).
    pub fn call_method(
        &self,
        method: &MethodValue,
        args: Vec<Value>,
        env_for_trace_name: Option<&ComponentHandle>,
        ctx: &mut CallContext,
    ) -> Result<Value, EvalError> {
        if let Some(receiver) = &method.receiver {
            if receiver.is_native() {
                return expressions::call_native(self, receiver, &method.decl.name, args, ctx);
            }
        }

        let component_name = env_for_trace_name.map(|c| c.decl.name.clone());
        let arg_strings: Vec<String> = args.iter().map(Value::render).collect();
        let enter_id = self.tracer.next_id();
        let enter_ts = ctx.clock;
        let _span = tracing::debug_span!(
            "call_method",
            component = component_name.as_deref().unwrap_or("?"),
            method = %method.decl.name,
            enter_id
        )
        .entered();
        self.tracer.record(crate::tracer::TraceEvent {
            kind: crate::tracer::TraceKind::Enter,
            id: enter_id,
            parent_id: ctx.current_parent(),
            ts: enter_ts.as_nanos() as u64,
            dur: None,
            component: component_name.clone(),
            method: Some(method.decl.name.clone()),
            args: arg_strings,
            ret: None,
            err: None,
        });
        ctx.push_parent(enter_id);

        let call_env = method.saved_env.push();
        for (param, arg) in method.decl.params.iter().zip(args.into_iter()) {
            call_env.set(param.clone(), arg);
        }

        let result = self.eval_stmt(&method.decl.body, &call_env, ctx);
        ctx.pop_parent();

        let exit_ts = ctx.clock;
        let dur = exit_ts.saturating_sub(enter_ts);
        let ret_string = match &result {
            Ok((value, _)) => Some(value.render()),
            Err(_) => None,
        };
        match &result {
            Ok((value, _)) => {
                self.tracer.record(crate::tracer::TraceEvent {
                    kind: crate::tracer::TraceKind::Exit,
                    id: enter_id,
                    parent_id: ctx.current_parent(),
                    ts: exit_ts.as_nanos() as u64,
                    dur: Some(dur.as_nanos() as u64),
                    component: component_name,
                    method: Some(method.decl.name.clone()),
                    args: vec![],
                    ret: Some(value.render()),
                    err: None,
                });
            }
            Err(err) => {
                tracing::warn!(%err, method = %method.decl.name, "method call failed");
                self.tracer.record(crate::tracer::TraceEvent {
                    kind: crate::tracer::TraceKind::Exit,
                    id: enter_id,
                    parent_id: ctx.current_parent(),
                    ts: exit_ts.as_nanos() as u64,
                    dur: Some(dur.as_nanos() as u64),
                    component: component_name,
                    method: Some(method.decl.name.clone()),
                    args: vec![],
                    ret: None,
                    err: Some(err.to_string()),
                });
            }
        }

        if let (Some(store), Some(receiver)) = (&self.measurements, env_for_trace_name) {
            store.observe_exit(receiver, &method.decl.name, exit_ts, dur, ret_string.as_deref());
        }

        result.map(|(value, _)| value)
    }
}
