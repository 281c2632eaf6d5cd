//! End-to-end flow analysis over a cascading call with a conditional branch (§8 scenario 3).
//!
//! `A.Lookup()` always calls `self.cache.Read()`, records its success rate against `hit`, then
//! branches: on a hit it returns directly, on a miss it calls `self.db.Find()`. `Cache` is a
//! native `FlowAnalyzable` leaf reporting a fixed 0.8 hit rate — the spec-sanctioned way to pin a
//! success probability the solver should not recompute, since `apply_back_pressure` skips native
//! components outright rather than overwriting whatever `flow_eval` already recorded from their
//! `FlowPattern`. At 10 RPS into `A.Lookup` the solver should credit `cache.Read` with the full
//! 10 RPS (the read always happens) and `db.Find` with the 2 RPS that take the miss branch.

use std::sync::Arc;

use meshsim::ast::{ComponentDecl, DependencyDecl, Expr, MethodDecl, Stmt};
use meshsim::env::Env;
use meshsim::errors::NativeError;
use meshsim::instance::ComponentInstance;
use meshsim::native::{FlowAnalyzable, FlowPattern, NativeComponent, NativeReturn};
use meshsim::value::{Value, ValueKind};
use meshsim::{analyze, ComponentHandle, GeneratorEntryPoint, RuntimeConfig};

/// A native cache that always reports an 0.8 hit rate and no outflows of its own, regardless of
/// how much traffic arrives.
struct FixedHitRateCache;

impl NativeComponent for FixedHitRateCache {
    fn invoke(&self, _receiver: &ComponentInstance, _method: &str, _args: &[Value], _should_sample: bool) -> Result<NativeReturn, NativeError> {
        Ok(NativeReturn::Value(Value::bool(true)))
    }

    fn as_flow_analyzable(&self) -> Option<&dyn FlowAnalyzable> {
        Some(self)
    }
}

impl FlowAnalyzable for FixedHitRateCache {
    fn get_flow_pattern(&self, _method: &str, _in_rate: f64) -> FlowPattern {
        FlowPattern::leaf(0.8)
    }
}

fn leaf(name: &str, method: &str) -> Arc<ComponentDecl> {
    Arc::new(ComponentDecl {
        name: name.to_string(),
        params: vec![],
        uses: vec![],
        methods: vec![Arc::new(MethodDecl { name: method.to_string(), params: vec![], body: Stmt::Return(None) })],
        is_native: false,
        init_decls: vec![],
    })
}

fn native_leaf(name: &str) -> Arc<ComponentDecl> {
    Arc::new(ComponentDecl { name: name.to_string(), params: vec![], uses: vec![], methods: vec![], is_native: true, init_decls: vec![] })
}

fn member_call(receiver_dep: &str, method: &str) -> Expr {
    Expr::Call {
        callee: Box::new(Expr::Member {
            receiver: Box::new(Expr::Member { receiver: Box::new(Expr::Identifier("self".into())), member: receiver_dep.into() }),
            member: method.into(),
        }),
        args: vec![],
    }
}

#[test]
fn cache_read_gets_full_rate_db_find_gets_the_miss_share() {
    let cache_decl = native_leaf("Cache");
    let db_decl = leaf("DB", "Find");
    let cache = ComponentHandle::from(ComponentInstance::new(cache_decl.clone(), Env::root(), Some(Arc::new(FixedHitRateCache))));
    let db = ComponentHandle::from(ComponentInstance::new(db_decl.clone(), Env::root(), None));

    let lookup_body = Stmt::Block(vec![
        Stmt::Let { names: vec!["hit".into()], value: member_call("cache", "Read") },
        Stmt::If {
            cond: Expr::Identifier("hit".into()),
            then_branch: Box::new(Stmt::Return(Some(Expr::Literal(meshsim::ast::Literal::Bool(true))))),
            else_branch: Some(Box::new(Stmt::Return(Some(member_call("db", "Find"))))),
        },
    ]);
    let a_decl = Arc::new(ComponentDecl {
        name: "A".into(),
        params: vec![],
        uses: vec![
            DependencyDecl { name: "cache".into(), resolved_component: cache_decl },
            DependencyDecl { name: "db".into(), resolved_component: db_decl },
        ],
        methods: vec![Arc::new(MethodDecl { name: "Lookup".into(), params: vec![], body: lookup_body })],
        is_native: false,
        init_decls: vec![],
    });
    let a = ComponentHandle::from(ComponentInstance::new(a_decl, Env::root(), None));
    a.set_param("cache", Value::new(ValueKind::Component(cache)));
    a.set_param("db", Value::new(ValueKind::Component(db)));

    let entry = GeneratorEntryPoint { component: a, method: "Lookup".into(), rate: 10.0, generator_id: "g1".into() };
    let result = analyze(&[entry], &Env::root(), &RuntimeConfig::default()).unwrap();

    let cache_rate = *result.component_rates.get("Cache.Read").unwrap();
    let db_rate = *result.component_rates.get("DB.Find").unwrap();
    assert!((cache_rate - 10.0).abs() < 0.1, "cache.Read rate {cache_rate} not ~= 10");
    assert!((db_rate - 2.0).abs() < 0.1, "db.Find rate {db_rate} not ~= 2");
    assert!((cache_rate + db_rate - 12.0).abs() < 0.12, "total downstream rate not ~= 12");
}
