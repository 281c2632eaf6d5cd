//! Concurrency primitives (§4.6): `go`/`gobatch` futures and the `WaitAll`/`WaitAny`
//! aggregators.
//!
//! All concurrency here is cooperative and simulation-level — there is no real parallelism
//! inside a single call chain (§5). A future is a thunk of `(statement, captured env)`; nothing
//! runs at spawn time. The interpreter's `wait` evaluation drives each future's body and then
//! hands the per-future results to the aggregator functions in this module.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ast::Stmt;
use crate::env::Env;
use crate::value::{values_equal, Value};

/// The not-yet-evaluated state of a spawned future.
#[derive(Clone)]
pub struct FutureState {
    pub body: Arc<Stmt>,
    pub captured_env: Env,
    /// 1 for `go`, N for `gobatch N`.
    pub loop_count: u32,
    pub spawn_time: Duration,
    pub tracer_parent_id: Option<u64>,
}

enum FutureSlot {
    Pending(FutureState),
    /// Taken by a `wait` currently evaluating this future's body.
    InProgress,
    Resolved(Value),
}

/// The shared, mutable cell backing a `Future` value. Wrapped in `Arc` so the `Value::Future`
/// handed back from `go`/`gobatch` and any copy captured elsewhere refer to the same future.
pub struct FutureCell(Mutex<FutureSlot>);

pub type FutureHandle = Arc<FutureCell>;

impl std::fmt::Debug for FutureCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FutureCell(..)")
    }
}

impl FutureCell {
    pub fn spawn(state: FutureState) -> FutureHandle {
        Arc::new(Self(Mutex::new(FutureSlot::Pending(state))))
    }

    /// Takes the pending state for evaluation, marking the future `InProgress` so a second
    /// `wait` on the same future (not modeled by the grammar, but defensive) does not
    /// re-evaluate it. Returns `None` if already resolved or in progress.
    pub fn take_pending(&self) -> Option<FutureState> {
        let mut slot = self.0.lock().expect("future lock poisoned");
        match &*slot {
            FutureSlot::Pending(_) => {
                let FutureSlot::Pending(state) = std::mem::replace(&mut *slot, FutureSlot::InProgress) else {
                    unreachable!()
                };
                Some(state)
            }
            _ => None,
        }
    }

    pub fn resolve(&self, value: Value) {
        *self.0.lock().expect("future lock poisoned") = FutureSlot::Resolved(value);
    }

    pub fn resolved(&self) -> Option<Value> {
        match &*self.0.lock().expect("future lock poisoned") {
            FutureSlot::Resolved(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Combines per-future results under `WaitAll` (§4.6): latency is the makespan (max of per-
/// future latencies); the result is the first declared success code if every future returned a
/// code in `success_codes`, otherwise `failure_value`.
pub fn wait_all(results: &[Value], success_codes: &[Value], failure_value: Value) -> Value {
    let makespan = results.iter().map(|v| v.time).max().unwrap_or(Duration::ZERO);
    let all_succeeded = !results.is_empty()
        && results.iter().all(|r| success_codes.iter().any(|code| values_equal(r, code)));
    let outcome = if all_succeeded {
        success_codes.first().cloned().unwrap_or_else(|| Value::bool(true))
    } else {
        failure_value
    };
    Value::with_time(outcome.kind, makespan)
}

/// `WaitAny` is specified as "earliest-successful-completion wins" but, per §4.6/§9, delegates
/// to `WaitAll` today; preserving the `WaitAll` contract is required of any future
/// specialization.
pub fn wait_any(results: &[Value], success_codes: &[Value], failure_value: Value) -> Value {
    wait_all(results, success_codes, failure_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(time_ms: u64) -> Value {
        Value::with_time(crate::value::ValueKind::Bool(true), Duration::from_millis(time_ms))
    }

    #[test]
    fn wait_all_latency_is_makespan_not_sum() {
        let results = vec![v(10), v(10), v(10), v(10)];
        let success = vec![Value::bool(true)];
        let out = wait_all(&results, &success, Value::bool(false));
        assert_eq!(out.time, Duration::from_millis(10));
    }

    #[test]
    fn wait_all_fails_if_any_future_misses_success_set() {
        let results = vec![v(5), Value::with_time(crate::value::ValueKind::Bool(false), Duration::from_millis(7))];
        let success = vec![Value::bool(true)];
        let out = wait_all(&results, &success, Value::bool(false));
        assert!(!out.get_bool().unwrap());
        assert_eq!(out.time, Duration::from_millis(7));
    }
}
