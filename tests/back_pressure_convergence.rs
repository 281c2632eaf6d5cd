//! End-to-end back-pressure convergence over a shared leaf pool (§8 scenario 4).
//!
//! Two components forward all their traffic into a leaf pool declaring `capacity: 2` and
//! `hold_time_seconds: 0.1` (a 100ms hold time), giving the pool a 20 RPS throughput ceiling.
//! At A=100/B=200 RPS the pool is badly oversubscribed and its success rate should drop below
//! 1.0; at A=5/B=5 RPS it comfortably clears the 80% utilization threshold and should stay at
//! or above 0.95.

use std::sync::Arc;

use meshsim::ast::{ComponentDecl, DependencyDecl, Expr, MethodDecl, Stmt};
use meshsim::env::Env;
use meshsim::instance::ComponentInstance;
use meshsim::value::{Value, ValueKind};
use meshsim::{analyze, ComponentHandle, FlowStatus, GeneratorEntryPoint, RuntimeConfig};

fn pool_decl() -> Arc<ComponentDecl> {
    Arc::new(ComponentDecl {
        name: "Pool".into(),
        params: vec![],
        uses: vec![],
        methods: vec![Arc::new(MethodDecl { name: "Acquire".into(), params: vec![], body: Stmt::Return(None) })],
        is_native: false,
        init_decls: vec![],
    })
}

fn forwarder_decl(name: &str, pool_decl: Arc<ComponentDecl>) -> Arc<ComponentDecl> {
    Arc::new(ComponentDecl {
        name: name.to_string(),
        params: vec![],
        uses: vec![DependencyDecl { name: "pool".into(), resolved_component: pool_decl }],
        methods: vec![Arc::new(MethodDecl {
            name: "Handle".into(),
            params: vec![],
            body: Stmt::Expr(Expr::Call {
                callee: Box::new(Expr::Member {
                    receiver: Box::new(Expr::Member { receiver: Box::new(Expr::Identifier("self".into())), member: "pool".into() }),
                    member: "Acquire".into(),
                }),
                args: vec![],
            }),
        })],
        is_native: false,
        init_decls: vec![],
    })
}

fn build_graph(a_rate: f64, b_rate: f64) -> (ComponentHandle, Vec<GeneratorEntryPoint>) {
    let pool_decl = pool_decl();
    let pool = ComponentHandle::from(ComponentInstance::new(pool_decl.clone(), Env::root(), None));
    pool.set_param("capacity", Value::int(2));
    pool.set_param("hold_time_seconds", Value::float(0.1));

    let a_decl = forwarder_decl("A", pool_decl.clone());
    let b_decl = forwarder_decl("B", pool_decl);
    let a = ComponentHandle::from(ComponentInstance::new(a_decl, Env::root(), None));
    let b = ComponentHandle::from(ComponentInstance::new(b_decl, Env::root(), None));
    a.set_param("pool", Value::new(ValueKind::Component(pool.clone())));
    b.set_param("pool", Value::new(ValueKind::Component(pool.clone())));

    let entries = vec![
        GeneratorEntryPoint { component: a, method: "Handle".into(), rate: a_rate, generator_id: "a".into() },
        GeneratorEntryPoint { component: b, method: "Handle".into(), rate: b_rate, generator_id: "b".into() },
    ];
    (pool, entries)
}

#[test]
fn oversubscribed_pool_converges_with_degraded_success_rate() {
    let (pool, entries) = build_graph(100.0, 200.0);
    let result = analyze(&entries, &Env::root(), &RuntimeConfig::default()).unwrap();

    assert_eq!(result.status, FlowStatus::Converged);
    let pool_rate = *result.component_rates.get("Pool.Acquire").unwrap();
    assert!((pool_rate - 300.0).abs() < 3.0, "pool arrival rate {pool_rate} not ~= 300");
    assert!(pool.get_success_rate("Acquire") < 1.0);
}

#[test]
fn lightly_loaded_pool_keeps_success_rate_high() {
    let (pool, entries) = build_graph(5.0, 5.0);
    let result = analyze(&entries, &Env::root(), &RuntimeConfig::default()).unwrap();

    assert_eq!(result.status, FlowStatus::Converged);
    assert!(pool.get_success_rate("Acquire") >= 0.95, "success rate {} not >= 0.95", pool.get_success_rate("Acquire"));
}
