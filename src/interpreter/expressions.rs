//! Expression evaluation (§4.5), the native-bridge call boundary (§4.5a), and the `Set` lvalue
//! resolver shared with `statements::eval_stmt`.
//!
//! Time discipline: only four kinds of node ever add directly to `ctx.clock` — `Sample`, a
//! `Bool` `Outcomes` coerced to truth (`Unary::Not`, and the `If`/`For` condition handling in
//! `statements.rs`), `Wait`, and native calls that return a sampled `Outcomes`. Everything else
//! (`Binary`, `Tuple`, `Member`, `Call`, `New`, literals) only *composes* `Value::time` from its
//! children; a `Call`'s own elapsed time is never folded back into its result because it was
//! already charged to `ctx.clock` while the callee's body executed.

use std::sync::Arc;
use std::time::Duration;

use crate::ast::{AggregatorKind, BinaryOp, Expr, Literal, UnaryOp};
use crate::concurrency::{self, FutureCell, FutureHandle, FutureState};
use crate::env::Env;
use crate::errors::EvalError;
use crate::instance::{ComponentHandle, ComponentInstance};
use crate::native::NativeReturn;
use crate::value::{EnumValue, MethodValue, RefValue, Value, ValueKind};

use super::{CallContext, Interpreter};

pub(super) fn eval_expr(
    interp: &Interpreter,
    expr: &Expr,
    env: &Env,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(eval_literal(lit)),

        Expr::Identifier(name) => {
            env.get(name).ok_or_else(|| EvalError::UnknownIdentifier { name: name.clone(), pos: None })
        }

        Expr::Unary { op, operand } => eval_unary(interp, *op, operand, env, ctx),

        Expr::Binary { op, lhs, rhs } => eval_binary(interp, *op, lhs, rhs, env, ctx),

        Expr::Member { receiver, member } => {
            let receiver_value = eval_expr(interp, receiver, env, ctx)?;
            eval_member(receiver_value, member)
        }

        Expr::New { component, args } => {
            let instance_env = Env::root();
            let native = if component.is_native {
                interp.native_registry.construct(&component.name)
            } else {
                None
            };
            let instance = ComponentInstance::new(component.clone(), instance_env.clone(), native);
            let handle = ComponentHandle::from(instance);
            instance_env.set("self", Value::new(ValueKind::Component(handle.clone())));

            let block = crate::initializer::compile_initializer(&component.params, &component.init_decls);
            interp.eval_stmt(&block, &instance_env, ctx)?;

            for (key, value_expr) in args {
                let value = eval_expr(interp, value_expr, env, ctx)?;
                store_member(&handle, key, value);
            }

            Ok(Value::new(ValueKind::Component(handle)))
        }

        Expr::Sample(inner) => {
            let outcomes_value = eval_expr(interp, inner, env, ctx)?;
            let outcomes = outcomes_value.outcomes()?;
            let (sampled, sample_time) = outcomes.sample(&mut ctx.rng)?;
            tracing::trace!(result = %sampled.render(), sample_time_ns = sample_time.as_nanos() as u64, "sampled outcomes");
            let combined = sampled.clone().plus_time(sample_time + outcomes_value.time);
            Ok(ctx.charge(combined))
        }

        Expr::Distribute { cases, default, total } => eval_distribute(interp, cases, default.as_deref(), total.as_deref(), env, ctx),

        Expr::Call { callee, args } => eval_call(interp, callee, args, env, ctx),

        Expr::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            let mut total_time = Duration::ZERO;
            for item in items {
                let value = eval_expr(interp, item, env, ctx)?;
                total_time += value.time;
                values.push(value);
            }
            Ok(Value::with_time(ValueKind::Tuple(values), total_time))
        }

        Expr::Go { body } => {
            let state = FutureState {
                body: Arc::new((**body).clone()),
                captured_env: env.push(),
                loop_count: 1,
                spawn_time: ctx.clock,
                tracer_parent_id: Some(ctx.current_parent()),
            };
            Ok(Value::new(ValueKind::Future(FutureCell::spawn(state))))
        }

        Expr::GoBatch { count, body } => {
            let count_value = eval_expr(interp, count, env, ctx)?;
            let loop_count = count_value.get_int()?.max(0) as u32;
            let state = FutureState {
                body: Arc::new((**body).clone()),
                captured_env: env.push(),
                loop_count,
                spawn_time: ctx.clock,
                tracer_parent_id: Some(ctx.current_parent()),
            };
            Ok(Value::new(ValueKind::Future(FutureCell::spawn(state))))
        }

        Expr::Wait { futures, aggregator, args } => eval_wait(interp, futures, *aggregator, args, env, ctx),

        Expr::EnumVariant { decl, variant } => {
            let variant_index = decl
                .variant_index(variant)
                .ok_or_else(|| EvalError::Internal(format!("enum `{}` has no variant `{variant}`", decl.name)))?;
            Ok(Value::new(ValueKind::Enum(EnumValue { decl: decl.clone(), variant_index })))
        }
    }
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::Nil => Value::nil(),
        Literal::Bool(b) => Value::bool(*b),
        Literal::Int(i) => Value::int(*i),
        Literal::Float(f) => Value::float(*f),
        Literal::String(s) => Value::string(s.clone()),
        // The payload is the raw nanosecond count; the literal itself spends no virtual time
        // merely by being evaluated (only `delay` converts it into elapsed clock time).
        Literal::DurationNanos(nanos) => Value::int(*nanos as i64),
    }
}

fn eval_unary(
    interp: &Interpreter,
    op: UnaryOp,
    operand: &Expr,
    env: &Env,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    let value = eval_expr(interp, operand, env, ctx)?;
    match op {
        UnaryOp::Neg => match &value.kind {
            ValueKind::Int(i) => Ok(Value::with_time(ValueKind::Int(-i), value.time)),
            ValueKind::Float(f) => Ok(Value::with_time(ValueKind::Float(-f), value.time)),
            other => Err(EvalError::TypeMismatch {
                op: op.to_string(),
                detail: format!("expected Int or Float, got {}", other.type_name()),
                pos: None,
            }),
        },
        UnaryOp::Not => match &value.kind {
            ValueKind::Bool(b) => Ok(Value::with_time(ValueKind::Bool(!b), value.time)),
            ValueKind::Outcomes(_) => {
                let truth_value = value.is_true(&mut ctx.rng)?;
                let truth = ctx.charge(truth_value);
                Ok(Value::bool(!truth.get_bool()?))
            }
            other => Err(EvalError::TypeMismatch {
                op: op.to_string(),
                detail: format!("expected Bool or Outcomes<Bool>, got {}", other.type_name()),
                pos: None,
            }),
        },
    }
}

fn eval_binary(
    interp: &Interpreter,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &Env,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    let lhs_value = eval_expr(interp, lhs, env, ctx)?;

    // Short-circuit: the right side is never evaluated (and never charged) when the left side
    // already decides the result.
    if matches!(op, BinaryOp::And) && !lhs_value.get_bool()? {
        return Ok(Value::with_time(ValueKind::Bool(false), lhs_value.time));
    }
    if matches!(op, BinaryOp::Or) && lhs_value.get_bool()? {
        return Ok(Value::with_time(ValueKind::Bool(true), lhs_value.time));
    }

    let rhs_value = eval_expr(interp, rhs, env, ctx)?;
    let total_time = lhs_value.time + rhs_value.time;

    let kind = match op {
        BinaryOp::And => ValueKind::Bool(lhs_value.get_bool()? && rhs_value.get_bool()?),
        BinaryOp::Or => ValueKind::Bool(lhs_value.get_bool()? || rhs_value.get_bool()?),
        BinaryOp::Eq => ValueKind::Bool(crate::value::values_equal(&lhs_value, &rhs_value)),
        BinaryOp::Ne => ValueKind::Bool(!crate::value::values_equal(&lhs_value, &rhs_value)),
        BinaryOp::Add if matches!(&lhs_value.kind, ValueKind::String(_)) || matches!(&rhs_value.kind, ValueKind::String(_)) => {
            ValueKind::String(Arc::from(format!("{}{}", lhs_value.render(), rhs_value.render())))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            eval_arithmetic(op, &lhs_value, &rhs_value)?
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => eval_comparison(op, &lhs_value, &rhs_value)?,
    };

    Ok(Value::with_time(kind, total_time))
}

fn eval_arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<ValueKind, EvalError> {
    if let (ValueKind::Int(a), ValueKind::Int(b)) = (&lhs.kind, &rhs.kind) {
        return match op {
            BinaryOp::Add => Ok(ValueKind::Int(a + b)),
            BinaryOp::Sub => Ok(ValueKind::Int(a - b)),
            BinaryOp::Mul => Ok(ValueKind::Int(a * b)),
            BinaryOp::Div => {
                if *b == 0 {
                    Err(EvalError::DivisionByZero { pos: None })
                } else {
                    Ok(ValueKind::Int(a / b))
                }
            }
            BinaryOp::Mod => {
                if *b == 0 {
                    Err(EvalError::DivisionByZero { pos: None })
                } else {
                    Ok(ValueKind::Int(a % b))
                }
            }
            _ => unreachable!("eval_arithmetic only called for arithmetic ops"),
        };
    }

    let a = lhs.get_float()?;
    let b = rhs.get_float()?;
    match op {
        BinaryOp::Add => Ok(ValueKind::Float(a + b)),
        BinaryOp::Sub => Ok(ValueKind::Float(a - b)),
        BinaryOp::Mul => Ok(ValueKind::Float(a * b)),
        BinaryOp::Div => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero { pos: None })
            } else {
                Ok(ValueKind::Float(a / b))
            }
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero { pos: None })
            } else {
                Ok(ValueKind::Float(a % b))
            }
        }
        _ => unreachable!("eval_arithmetic only called for arithmetic ops"),
    }
}

fn eval_comparison(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<ValueKind, EvalError> {
    let ordering = if let (ValueKind::Int(a), ValueKind::Int(b)) = (&lhs.kind, &rhs.kind) {
        a.partial_cmp(b)
    } else {
        lhs.get_float()?.partial_cmp(&rhs.get_float()?)
    };
    let ordering = ordering.ok_or_else(|| EvalError::TypeMismatch {
        op: op.to_string(),
        detail: "values are not ordered".into(),
        pos: None,
    })?;
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("eval_comparison only called for comparison ops"),
    };
    Ok(ValueKind::Bool(result))
}

/// Resolves a parameter/dependency/method member access against a component, recursing through
/// `Ref` indirection so nested dependency paths (`a.b.c`) resolve one hop at a time (§9).
fn eval_member(receiver_value: Value, member: &str) -> Result<Value, EvalError> {
    match receiver_value.kind {
        ValueKind::Component(handle) => resolve_component_member(&handle, member),
        ValueKind::Ref(ref_val) => {
            let bound = dereference(&ref_val)?;
            if bound.is_nil() {
                let component = match &ref_val.receiver.kind {
                    ValueKind::Component(handle) => handle.decl.name.clone(),
                    _ => "?".to_string(),
                };
                return Err(EvalError::UnsetDependency { component, dependency: ref_val.attribute.clone(), pos: None });
            }
            eval_member(bound, member)
        }
        other => Err(EvalError::TypeMismatch {
            op: "member".into(),
            detail: format!("cannot access `.{member}` on {}", other.type_name()),
            pos: None,
        }),
    }
}

fn dereference(ref_val: &RefValue) -> Result<Value, EvalError> {
    match &ref_val.receiver.kind {
        ValueKind::Component(handle) => Ok(handle.get_param(&ref_val.attribute).unwrap_or_else(Value::nil)),
        other => Err(EvalError::Internal(format!("Ref receiver was {} instead of Component", other.type_name()))),
    }
}

fn resolve_component_member(handle: &ComponentHandle, member: &str) -> Result<Value, EvalError> {
    if handle.decl.param(member).is_some() {
        return Ok(handle.get_param(member).unwrap_or_else(Value::nil));
    }
    if handle.decl.dependency(member).is_some() {
        let receiver = Box::new(Value::new(ValueKind::Component(handle.clone())));
        return Ok(Value::new(ValueKind::Ref(Box::new(RefValue { receiver, attribute: member.to_string() }))));
    }
    if let Some(method_decl) = handle.decl.method(member) {
        return Ok(Value::new(ValueKind::Method(Box::new(MethodValue {
            decl: method_decl.clone(),
            receiver: Some(handle.clone()),
            saved_env: handle.env.push(),
        }))));
    }
    Err(EvalError::UnknownMember { component: handle.decl.name.clone(), member: member.to_string(), pos: None })
}

/// Binds `value` onto whichever parameter-or-dependency slot `member` names on `handle` (§4.4
/// pass 2, and inline `new Kind(member: value)` overrides).
fn store_member(handle: &ComponentHandle, member: &str, value: Value) {
    handle.set_param(member.to_string(), value);
}

pub(super) fn assign(
    interp: &Interpreter,
    target: &Expr,
    env: &Env,
    value: Value,
    ctx: &mut CallContext,
) -> Result<(), EvalError> {
    match target {
        Expr::Identifier(name) => {
            env.assign(name, value);
            Ok(())
        }
        Expr::Member { receiver, member } => {
            let receiver_value = eval_expr(interp, receiver, env, ctx)?;
            match receiver_value.kind {
                ValueKind::Component(handle) => {
                    store_member(&handle, member, value);
                    Ok(())
                }
                ValueKind::Ref(ref_val) => {
                    let bound = dereference(&ref_val)?;
                    match bound.kind {
                        ValueKind::Component(handle) => {
                            store_member(&handle, member, value);
                            Ok(())
                        }
                        _ => {
                            let component = match &ref_val.receiver.kind {
                                ValueKind::Component(handle) => handle.decl.name.clone(),
                                _ => "?".to_string(),
                            };
                            Err(EvalError::UnsetDependency { component, dependency: ref_val.attribute.clone(), pos: None })
                        }
                    }
                }
                other => Err(EvalError::TypeMismatch {
                    op: "set".into(),
                    detail: format!("cannot set a member on {}", other.type_name()),
                    pos: None,
                }),
            }
        }
        other => Err(EvalError::Internal(format!("invalid assignment target {other:?}"))),
    }
}

fn eval_distribute(
    interp: &Interpreter,
    cases: &[crate::ast::DistributeCase],
    default: Option<&Expr>,
    total: Option<&Expr>,
    env: &Env,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    let mut outcomes = crate::value::Outcomes::new();
    let mut weight_sum = 0.0;
    let mut weight_eval_time = Duration::ZERO;

    for case in cases {
        let weight_value = eval_expr(interp, &case.weight, env, ctx)?;
        let weight = weight_value.get_float()?;
        weight_eval_time += weight_value.time;
        weight_sum += weight;
        let body_value = eval_expr(interp, &case.body, env, ctx)?;
        outcomes.add(weight, body_value);
    }

    if let Some(default_expr) = default {
        let declared_total = match total {
            Some(total_expr) => {
                let total_value = eval_expr(interp, total_expr, env, ctx)?;
                weight_eval_time += total_value.time;
                total_value.get_float()?
            }
            None => 1.0,
        };
        let residual = (declared_total - weight_sum).max(0.0);
        let default_value = eval_expr(interp, default_expr, env, ctx)?;
        outcomes.add(residual, default_value);
    }

    Ok(ctx.charge(Value::with_time(ValueKind::Outcomes(Box::new(outcomes)), weight_eval_time)))
}

fn eval_call(
    interp: &Interpreter,
    callee: &Expr,
    args: &[Expr],
    env: &Env,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    let callee_value = eval_expr(interp, callee, env, ctx)?;
    let method_value = match callee_value.kind {
        ValueKind::Method(m) => *m,
        other => {
            return Err(EvalError::NotCallable { detail: format!("{} is not callable", other.type_name()), pos: None })
        }
    };
    if method_value.decl.params.len() != args.len() {
        return Err(EvalError::ArityMismatch { expected: method_value.decl.params.len(), got: args.len(), pos: None });
    }
    let mut evaluated_args = Vec::with_capacity(args.len());
    for arg in args {
        evaluated_args.push(eval_expr(interp, arg, env, ctx)?);
    }
    let receiver = method_value.receiver.clone();
    let result = interp.call_method(&method_value, evaluated_args, receiver.as_ref(), ctx)?;
    // The call's own elapsed time already landed in `ctx.clock` while the body ran; zeroing it
    // here keeps `Binary`/`Tuple` composition from double-counting it.
    Ok(Value::with_time(result.kind, Duration::ZERO))
}

/// Dispatches a call onto a native receiver (§4.5a), always sampling immediately (the
/// interpreter is always simulating here; flow analysis calls native components through a
/// different path that passes `should_sample = false`).
pub(super) fn call_native(
    _interp: &Interpreter,
    receiver: &ComponentHandle,
    method: &str,
    args: Vec<Value>,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    let native = receiver
        .native
        .as_ref()
        .ok_or_else(|| EvalError::Internal(format!("`{}` is native but has no registered receiver", receiver.decl.name)))?;
    let outcome = native.invoke(receiver, method, &args, true)?;
    let value = match outcome {
        NativeReturn::Value(v) => v,
        NativeReturn::Outcomes(outcomes) => {
            let (sampled, sample_time) = outcomes.sample(&mut ctx.rng)?;
            tracing::trace!(
                component = %receiver.decl.name,
                method,
                result = %sampled.render(),
                "sampled native outcomes"
            );
            sampled.clone().plus_time(sample_time)
        }
    };
    Ok(ctx.charge(value))
}

fn eval_wait(
    interp: &Interpreter,
    futures: &[Expr],
    aggregator: AggregatorKind,
    args: &[Expr],
    env: &Env,
    ctx: &mut CallContext,
) -> Result<Value, EvalError> {
    let mut results = Vec::with_capacity(futures.len());
    for future_expr in futures {
        let future_value = eval_expr(interp, future_expr, env, ctx)?;
        match future_value.kind {
            ValueKind::Future(handle) => results.push(resolve_future(interp, &handle, ctx)?),
            other => {
                return Err(EvalError::TypeMismatch {
                    op: "wait".into(),
                    detail: format!("expected Future, got {}", other.type_name()),
                    pos: None,
                })
            }
        }
    }

    let mut success_codes = Vec::with_capacity(args.len());
    for arg in args {
        success_codes.push(eval_expr(interp, arg, env, ctx)?);
    }
    let failure_value = Value::bool(false);

    let combined = match aggregator {
        AggregatorKind::WaitAll => concurrency::wait_all(&results, &success_codes, failure_value),
        AggregatorKind::WaitAny => concurrency::wait_any(&results, &success_codes, failure_value),
    };
    Ok(ctx.charge(combined))
}

/// Drives a spawned future's body to completion (§4.6). `gobatch N` bodies are evaluated `N`
/// times independently, each against a fresh child of the captured environment and with the
/// call-chain clock reset between runs (they model N *parallel* copies, not N sequential ones);
/// the future resolves to the slowest copy's latency paired with the first copy's value.
fn resolve_future(interp: &Interpreter, handle: &FutureHandle, ctx: &mut CallContext) -> Result<Value, EvalError> {
    if let Some(resolved) = handle.resolved() {
        return Ok(resolved);
    }
    let state = handle
        .take_pending()
        .ok_or_else(|| EvalError::Internal("future was already in progress".into()))?;

    if let Some(parent) = state.tracer_parent_id {
        ctx.push_parent(parent);
    }

    let runs = state.loop_count.max(1);
    let clock_before_all = ctx.clock;
    let mut per_run = Vec::with_capacity(runs as usize);
    for _ in 0..runs {
        let run_env = state.captured_env.push();
        let start = ctx.clock;
        let (value, _returned) = interp.eval_stmt(&state.body, &run_env, ctx)?;
        let elapsed = ctx.clock.saturating_sub(start);
        per_run.push(Value::with_time(value.kind, elapsed));
        ctx.clock = start;
    }
    ctx.clock = clock_before_all;

    if state.tracer_parent_id.is_some() {
        ctx.pop_parent();
    }

    let makespan = per_run.iter().map(|v| v.time).max().unwrap_or(Duration::ZERO);
    tracing::debug!(runs, makespan_ns = makespan.as_nanos() as u64, "future resolved");
    let representative = per_run.into_iter().next().map(|v| v.kind).unwrap_or(ValueKind::Nil);
    let resolved = Value::with_time(representative, makespan);
    handle.resolve(resolved.clone());
    Ok(resolved)
}
