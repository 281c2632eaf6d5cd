//! The batch runner (§4.11): distributes independent simulation runs of the same method across
//! a worker pool, so the measurement store can be populated at scale faster than one call chain
//! at a time.
//!
//! Each run gets its own [`CallContext`] — its own virtual clock and its own seeded RNG, derived
//! deterministically from `(base_seed, run_index)` so a fixed base seed reproduces the whole
//! batch regardless of scheduling (§5). Workers share one `Interpreter` (cheap to clone: an
//! `Arc<dyn Tracer>` plus a config struct) and push a fresh child frame from the method's own
//! saved environment per run rather than mutating anything shared.

use rayon::prelude::*;

use crate::errors::EvalError;
use crate::instance::ComponentHandle;
use crate::interpreter::{CallContext, Interpreter};
use crate::value::{MethodValue, Value};

/// One run's outcome: either the returned value (with its accumulated virtual time) or the
/// error that aborted it. A failing run does not abort the batch (§7 "surfaced as a distinct
/// error variant ... so the batch runner can record the failing run and continue").
pub struct RunOutcome {
    pub run_index: usize,
    pub result: Result<Value, EvalError>,
}

/// The aggregate result of a batch (§4.11).
pub struct BatchOutcome {
    pub runs: Vec<RunOutcome>,
}

impl BatchOutcome {
    pub fn successes(&self) -> impl Iterator<Item = &Value> {
        self.runs.iter().filter_map(|r| r.result.as_ref().ok())
    }

    pub fn failure_count(&self) -> usize {
        self.runs.iter().filter(|r| r.result.is_err()).count()
    }
}

/// Runs `method` on `component` `run_count` times, distributing runs across a worker pool sized
/// `worker_count` (falling back to available parallelism when `None`). Each run calls `method`
/// with freshly-evaluated `args` (re-evaluated per run since a `Value` is not safely shareable
/// across an independently-clocked call chain) and its own `CallContext` seeded from
/// `(base_seed, run_index)`.
pub fn run_call_in_batches(
    interp: &Interpreter,
    component: &ComponentHandle,
    method: &MethodValue,
    args_for_run: impl Fn(usize) -> Vec<Value> + Sync,
    run_count: usize,
    base_seed: u64,
    worker_count: Option<usize>,
) -> BatchOutcome {
    let run_one = |run_index: usize| -> RunOutcome {
        let mut ctx = CallContext::new(base_seed.wrapping_add(run_index as u64));
        let args = args_for_run(run_index);
        let result = interp.call_method(method, args, Some(component), &mut ctx);
        RunOutcome { run_index, result }
    };

    let indices: Vec<usize> = (0..run_count).collect();
    let runs = match worker_count {
        Some(workers) if workers > 0 => {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| indices.par_iter().map(|&i| run_one(i)).collect::<Vec<_>>()),
                Err(err) => {
                    tracing::warn!(%err, "failed to build batch worker pool, falling back to the global pool");
                    indices.par_iter().map(|&i| run_one(i)).collect()
                }
            }
        }
        _ => indices.par_iter().map(|&i| run_one(i)).collect(),
    };

    tracing::debug!(run_count, failures = runs.iter().filter(|r: &&RunOutcome| r.result.is_err()).count(), "batch complete");
    BatchOutcome { runs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ComponentDecl, Expr, Literal, MethodDecl, Stmt};
    use crate::env::Env;
    use crate::instance::ComponentInstance;
    use std::sync::Arc;

    fn constant_method(name: &str, value: i64) -> MethodValue {
        let decl = Arc::new(MethodDecl { name: name.to_string(), params: vec![], body: Stmt::Return(Some(Expr::Literal(Literal::Int(value)))) });
        let component_decl = Arc::new(ComponentDecl {
            name: "Server".into(),
            params: vec![],
            uses: vec![],
            methods: vec![decl.clone()],
            is_native: false,
            init_decls: vec![],
        });
        let instance = ComponentInstance::new(component_decl, Env::root(), None);
        let handle = ComponentHandle::from(instance);
        MethodValue { decl, receiver: Some(handle), saved_env: Env::root() }
    }

    #[test]
    fn every_run_completes_independently() {
        let interp = Interpreter::default();
        let method = constant_method("Get", 7);
        let component = method.receiver.clone().unwrap();
        let outcome = run_call_in_batches(&interp, &component, &method, |_| vec![], 20, 42, Some(2));
        assert_eq!(outcome.runs.len(), 20);
        assert_eq!(outcome.failure_count(), 0);
        for value in outcome.successes() {
            assert_eq!(value.get_int().unwrap(), 7);
        }
    }

    #[test]
    fn same_base_seed_reproduces_the_batch() {
        let interp = Interpreter::default();
        let method = constant_method("Get", 1);
        let component = method.receiver.clone().unwrap();
        let a = run_call_in_batches(&interp, &component, &method, |_| vec![], 8, 99, None);
        let b = run_call_in_batches(&interp, &component, &method, |_| vec![], 8, 99, None);
        let render = |outcome: &BatchOutcome| -> Vec<String> {
            let mut pairs: Vec<(usize, String)> =
                outcome.runs.iter().map(|r| (r.run_index, r.result.as_ref().unwrap().render())).collect();
            pairs.sort_by_key(|(i, _)| *i);
            pairs.into_iter().map(|(_, v)| v).collect()
        };
        assert_eq!(render(&a), render(&b));
    }
}
