//! End-to-end check that `wait` over a `gobatch` reports makespan latency, not summed latency.
//!
//! `gobatch 4 { delay 10ms; return true } wait using WaitAll(true)` should yield a result whose
//! `Time` is 10ms (the slowest of the four identical copies), and advance the caller's clock by
//! 10ms rather than 40ms.

use meshsim::ast::{AggregatorKind, Expr, Literal, Stmt};
use meshsim::env::Env;
use meshsim::{CallContext, Interpreter};

#[test]
fn four_identical_gobatch_copies_yield_one_copys_latency() {
    let body = Stmt::Block(vec![
        Stmt::Delay(Expr::Literal(Literal::DurationNanos(10_000_000))),
        Stmt::Return(Some(Expr::Literal(Literal::Bool(true)))),
    ]);
    let gobatch = Expr::GoBatch { count: Box::new(Expr::Literal(Literal::Int(4))), body: Box::new(body) };
    let wait = Expr::Wait {
        futures: vec![gobatch],
        aggregator: AggregatorKind::WaitAll,
        args: vec![Expr::Literal(Literal::Bool(true))],
    };

    let interp = Interpreter::default();
    let env = Env::root();
    let mut ctx = CallContext::new(0);
    let result = interp.eval_expr(&wait, &env, &mut ctx).unwrap();

    assert!(result.get_bool().unwrap());
    assert_eq!(result.time, std::time::Duration::from_millis(10));
    assert_eq!(ctx.clock, std::time::Duration::from_millis(10));
}

#[test]
fn a_failing_copy_fails_the_whole_wait() {
    let good = Stmt::Return(Some(Expr::Literal(Literal::Bool(true))));
    let bad = Stmt::Return(Some(Expr::Literal(Literal::Bool(false))));
    let wait = Expr::Wait {
        futures: vec![Expr::Go { body: Box::new(good) }, Expr::Go { body: Box::new(bad) }],
        aggregator: AggregatorKind::WaitAll,
        args: vec![Expr::Literal(Literal::Bool(true))],
    };

    let interp = Interpreter::default();
    let env = Env::root();
    let mut ctx = CallContext::new(0);
    let result = interp.eval_expr(&wait, &env, &mut ctx).unwrap();
    assert!(!result.get_bool().unwrap());
}
