//! Statement evaluation (§4.5 "Statements").

use crate::ast::Stmt;
use crate::env::Env;
use crate::errors::EvalError;
use crate::value::{Value, ValueKind};

use super::{CallContext, Interpreter};

pub(super) fn eval_stmt(
    interp: &Interpreter,
    stmt: &Stmt,
    env: &Env,
    ctx: &mut CallContext,
) -> Result<(Value, bool), EvalError> {
    match stmt {
        Stmt::Block(stmts) => {
            let block_env = env.push();
            let mut last = Value::nil();
            for s in stmts {
                let (value, returned) = eval_stmt(interp, s, &block_env, ctx)?;
                last = value;
                if returned {
                    return Ok((last, true));
                }
            }
            Ok((last, false))
        }
        Stmt::Let { names, value } => {
            let evaluated = interp.eval_expr(value, env, ctx)?;
            bind_names(env, names, evaluated.clone())?;
            Ok((evaluated, false))
        }
        Stmt::Set { target, value } => {
            let evaluated = interp.eval_expr(value, env, ctx)?;
            super::expressions::assign(interp, target, env, evaluated.clone(), ctx)?;
            Ok((evaluated, false))
        }
        Stmt::If { cond, then_branch, else_branch } => {
            let cond_value = interp.eval_expr(cond, env, ctx)?;
            let truth_value = cond_value.is_true(&mut ctx.rng)?;
            let truth = ctx.charge(truth_value);
            if truth.get_bool()? {
                eval_stmt(interp, then_branch, env, ctx)
            } else if let Some(else_branch) = else_branch {
                eval_stmt(interp, else_branch, env, ctx)
            } else {
                Ok((Value::nil(), false))
            }
        }
        Stmt::For { cond, body } => {
            let mut last = Value::nil();
            let mut counter: i64 = 0;
            loop {
                let evaluated = interp.eval_expr(cond, env, ctx)?;
                let cond_value = ctx.charge(evaluated);
                let keep_going = match &cond_value.kind {
                    ValueKind::Int(n) => counter < *n,
                    ValueKind::Bool(b) => *b,
                    ValueKind::Outcomes(_) => {
                        let truth_value = cond_value.is_true(&mut ctx.rng)?;
                        let sampled = ctx.charge(truth_value);
                        sampled.get_bool()?
                    }
                    other => {
                        return Err(EvalError::TypeMismatch {
                            op: "for".into(),
                            detail: format!("expected Int or Bool condition, got {}", other.type_name()),
                            pos: None,
                        })
                    }
                };
                if !keep_going {
                    break;
                }
                let (value, returned) = eval_stmt(interp, body, env, ctx)?;
                last = value;
                if returned {
                    return Ok((last, true));
                }
                counter += 1;
            }
            Ok((last, false))
        }
        Stmt::Return(expr) => {
            let value = match expr {
                Some(expr) => interp.eval_expr(expr, env, ctx)?,
                None => Value::nil(),
            };
            Ok((value, true))
        }
        Stmt::Expr(expr) => {
            let value = interp.eval_expr(expr, env, ctx)?;
            Ok((value, false))
        }
        Stmt::Delay(expr) => {
            // The duration expression's own `.time` is not charged here: only its numeric
            // payload (interpreted as a nanosecond count) becomes elapsed clock time. This is
            // the one statement that converts a plain duration value into real elapsed time.
            let duration_value = interp.eval_expr(expr, env, ctx)?;
            let nanos = match &duration_value.kind {
                ValueKind::Int(n) => (*n).max(0) as u64,
                ValueKind::Float(f) => f.max(0.0) as u64,
                other => {
                    return Err(EvalError::TypeMismatch {
                        op: "delay".into(),
                        detail: format!("expected a numeric duration, got {}", other.type_name()),
                        pos: None,
                    })
                }
            };
            ctx.clock += std::time::Duration::from_nanos(nanos);
            Ok((Value::nil(), false))
        }
    }
}

fn bind_names(env: &Env, names: &[String], value: Value) -> Result<(), EvalError> {
    if names.len() == 1 {
        env.set(names[0].clone(), value);
        return Ok(());
    }
    let tuple = value.get_tuple()?;
    if tuple.len() != names.len() {
        return Err(EvalError::ArityMismatch { expected: names.len(), got: tuple.len(), pos: None });
    }
    for (name, item) in names.iter().zip(tuple.iter()) {
        env.set(name.clone(), item.clone());
    }
    Ok(())
}
