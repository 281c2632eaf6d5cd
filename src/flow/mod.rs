//! The analytical flow solver (§4.8).
//!
//! Given one or more generator entry points, [`analyze`] computes steady-state per-(instance,
//! method) arrival rates across the reachable component graph by fixed-point iteration: each
//! iteration re-walks the whole graph from the entry points (a recursive descent with call-stack
//! cycle-breaking and a depth limit, exactly like the interpreter's own call nesting), and
//! iterations converge because each one recomputes component success rates from the *previous*
//! iteration's utilization, which feeds back into this iteration's outflow through the
//! variable-outcome table. No value is ever sampled; this is the non-simulating twin of
//! `interpreter::eval_*`.

use std::collections::HashMap;
use std::time::Duration;

use crate::ast::{BinaryOp, Expr, Stmt};
use crate::config::RuntimeConfig;
use crate::env::Env;
use crate::errors::{FlowError, FlowWarning};
use crate::instance::ComponentHandle;
use crate::value::{Value, ValueKind};

/// One generator: a fixed arrival rate injected at `component.method` on every iteration.
#[derive(Debug, Clone)]
pub struct GeneratorEntryPoint {
    pub component: ComponentHandle,
    pub method: String,
    pub rate: f64,
    pub generator_id: String,
}

/// One edge in the resolved call graph, labeled with the declared component-kind names (two
/// instances of the same kind are not distinguished — see the open question in `DESIGN.md`).
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Converged,
    MaxIterationsReached,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowMetadata {
    pub total_flow: f64,
    pub max_rate: f64,
    pub convergence_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct FlowResult {
    pub edges: Vec<FlowEdge>,
    pub component_rates: HashMap<String, f64>,
    pub metadata: FlowMetadata,
    pub status: FlowStatus,
    pub warnings: Vec<FlowWarning>,
}

/// Per-solve scratch state: the call stack driving cycle detection, a resolver environment for
/// identifiers that are not `self` (top-level system instance names), and the running table of
/// inferred per-variable success probabilities consulted by `If` branch weighting.
struct FlowScope {
    call_stack: Vec<ComponentHandle>,
    static_env: Env,
    variable_outcomes: HashMap<String, f64>,
}

type RateMap = HashMap<ComponentHandle, HashMap<String, f64>>;

/// Runs the fixed-point solve (§4.8). `static_env` resolves call targets that are plain
/// identifiers rather than `self`-rooted chains (typically top-level system instance names);
/// pass `SystemInstance::root_env` populated by the Initializer.
pub fn analyze(
    entry_points: &[GeneratorEntryPoint],
    static_env: &Env,
    config: &RuntimeConfig,
) -> Result<FlowResult, FlowError> {
    for entry in entry_points {
        if entry.component.decl.method(&entry.method).is_none() && !entry.component.is_native() {
            return Err(FlowError::UnknownMethod {
                component: entry.component.decl.name.clone(),
                method: entry.method.clone(),
            });
        }
    }

    let mut warnings = Vec::new();
    let mut previous: RateMap = HashMap::new();
    let mut edges = Vec::new();
    let mut status = FlowStatus::MaxIterationsReached;

    for iteration in 0..config.flow_max_iterations {
        let _span = tracing::debug_span!("flow_iteration", iteration).entered();
        let is_last_possible = iteration + 1 == config.flow_max_iterations;

        let mut current: RateMap = HashMap::new();
        for entry in entry_points {
            *current.entry(entry.component.clone()).or_default().entry(entry.method.clone()).or_insert(0.0) +=
                entry.rate;
        }

        let mut iteration_edges = Vec::new();
        for entry in entry_points {
            let mut scope =
                FlowScope { call_stack: Vec::new(), static_env: static_env.clone(), variable_outcomes: HashMap::new() };
            flow_eval(
                &entry.component,
                &entry.method,
                entry.rate,
                &mut scope,
                &mut current,
                config,
                &mut warnings,
                &mut iteration_edges,
            );
        }

        apply_back_pressure(&current, config);

        // The very first pass has no prior estimate to compare against or damp from — accepting
        // it outright lets a feed-forward graph (no cycles, no branch weighting fed by a prior
        // iteration's success rates) converge on the next pass instead of crawling toward a
        // deterministic target from a zero-initialized damping series.
        if iteration == 0 {
            previous = current;
            edges = iteration_edges;
            continue;
        }

        let max_delta = max_delta(&previous, &current);
        tracing::debug!(iteration, max_delta, "flow iteration settled");

        if max_delta < config.flow_convergence_threshold {
            previous = current;
            edges = iteration_edges;
            status = FlowStatus::Converged;
            break;
        }

        previous = damp(&previous, &current, config.flow_damping);
        if is_last_possible {
            edges = iteration_edges;
            status = FlowStatus::MaxIterationsReached;
            warnings.push(FlowWarning::MaxIterationsReached { iterations: config.flow_max_iterations });
        }
    }

    let mut component_rates = HashMap::new();
    let mut total_flow = 0.0;
    let mut max_rate = 0.0_f64;
    for (component, methods) in &previous {
        for (method, rate) in methods {
            component_rates.insert(format!("{}.{}", component.decl.name, method), *rate);
            total_flow += rate;
            max_rate = max_rate.max(*rate);
        }
    }

    Ok(FlowResult {
        edges,
        component_rates,
        metadata: FlowMetadata { total_flow, max_rate, convergence_threshold: config.flow_convergence_threshold },
        status,
        warnings,
    })
}

fn max_delta(old: &RateMap, new: &RateMap) -> f64 {
    let mut delta = 0.0_f64;
    for (component, methods) in new {
        for (method, rate) in methods {
            let old_rate = old.get(component).and_then(|m| m.get(method)).copied().unwrap_or(0.0);
            delta = delta.max((rate - old_rate).abs());
        }
    }
    for (component, methods) in old {
        for (method, rate) in methods {
            if !new.get(component).map(|m| m.contains_key(method)).unwrap_or(false) {
                delta = delta.max(*rate);
            }
        }
    }
    delta
}

fn damp(old: &RateMap, new: &RateMap, factor: f64) -> RateMap {
    let mut result: RateMap = HashMap::new();
    let mut keys: Vec<(ComponentHandle, String)> = Vec::new();
    for (component, methods) in new {
        for method in methods.keys() {
            keys.push((component.clone(), method.clone()));
        }
    }
    for (component, methods) in old {
        for method in methods.keys() {
            if !new.get(component).map(|m| m.contains_key(method)).unwrap_or(false) {
                keys.push((component.clone(), method.clone()));
            }
        }
    }
    for (component, method) in keys {
        let old_rate = old.get(&component).and_then(|m| m.get(&method)).copied().unwrap_or(0.0);
        let new_rate = new.get(&component).and_then(|m| m.get(&method)).copied().unwrap_or(0.0);
        let damped = old_rate + factor * (new_rate - old_rate);
        result.entry(component).or_default().insert(method, damped);
    }
    result
}

/// After a full traversal, gives every processed component's methods a fresh arrival-rate
/// snapshot and recomputes its success rate: native `FlowAnalyzable` components keep whatever
/// `flow_eval` already recorded from their `FlowPattern`; SDL components default to 1.0 and
/// degrade linearly once total utilization crosses the configured threshold, where a declared
/// `capacity` parameter is read as concurrent slots and an optional `hold_time_seconds`
/// parameter turns that into a throughput ceiling (`capacity / hold_time_seconds`); a component
/// with `capacity` but no `hold_time_seconds` is treated as one request per second per slot.
fn apply_back_pressure(current: &RateMap, config: &RuntimeConfig) {
    for (component, methods) in current {
        for (method, rate) in methods {
            component.set_arrival_rate(method.clone(), *rate);
        }
        if component.is_native() {
            continue;
        }
        let capacity = component.get_param("capacity").and_then(|v| v.get_float().ok());
        let success_rate = match capacity {
            Some(capacity) if capacity > 0.0 => {
                let hold_time = component.get_param("hold_time_seconds").and_then(|v| v.get_float().ok());
                let throughput_ceiling = match hold_time {
                    Some(hold_time) if hold_time > 0.0 => capacity / hold_time,
                    _ => capacity,
                };
                let utilization = component.total_arrival_rate() / throughput_ceiling;
                if utilization > config.flow_utilization_degradation_threshold {
                    (1.0 - (utilization - config.flow_utilization_degradation_threshold)).clamp(0.0, 1.0)
                } else {
                    1.0
                }
            }
            _ => 1.0,
        };
        for method in methods.keys() {
            component.set_success_rate(method.clone(), success_rate);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn flow_eval(
    component: &ComponentHandle,
    method: &str,
    in_rate: f64,
    scope: &mut FlowScope,
    acc: &mut RateMap,
    config: &RuntimeConfig,
    warnings: &mut Vec<FlowWarning>,
    edges: &mut Vec<FlowEdge>,
) {
    if in_rate <= 1e-9 {
        return;
    }
    if scope.call_stack.contains(component) {
        warnings.push(FlowWarning::CycleBroken { component: component.decl.name.clone() });
        return;
    }
    if scope.call_stack.len() >= config.flow_cycle_depth_limit {
        warnings.push(FlowWarning::DepthLimitReached { component: component.decl.name.clone() });
        return;
    }

    *acc.entry(component.clone()).or_default().entry(method.to_string()).or_insert(0.0) += in_rate;

    if component.is_native() {
        if let Some(native) = &component.native {
            if let Some(capable) = native.as_flow_analyzable() {
                let pattern = capable.get_flow_pattern(method, in_rate);
                component.set_success_rate(method, pattern.success_rate);
                scope.call_stack.push(component.clone());
                for (outflow_key, rate) in &pattern.outflows {
                    let (dep_name, target_method) = split_outflow_key(outflow_key);
                    match component.get_param(dep_name) {
                        Some(Value { kind: ValueKind::Component(target), .. }) => {
                            edges.push(FlowEdge {
                                from: format!("{}.{method}", component.decl.name),
                                to: format!("{}.{target_method}", target.decl.name),
                                rate: *rate,
                            });
                            flow_eval(&target, target_method, *rate, scope, acc, config, warnings, edges);
                        }
                        _ => warnings.push(FlowWarning::UnresolvedCallTarget {
                            component: component.decl.name.clone(),
                            method: method.to_string(),
                            expr: outflow_key.clone(),
                        }),
                    }
                }
                scope.call_stack.pop();
            }
        }
        return;
    }

    let Some(method_decl) = component.decl.method(method) else { return };
    scope.call_stack.push(component.clone());
    walk_stmt(&method_decl.body, component, in_rate, scope, acc, config, warnings, edges);
    scope.call_stack.pop();
}

fn split_outflow_key(key: &str) -> (&str, &str) {
    match key.split_once('.') {
        Some((dep, method)) => (dep, method),
        None => (key, key),
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_stmt(
    stmt: &Stmt,
    component: &ComponentHandle,
    in_rate: f64,
    scope: &mut FlowScope,
    acc: &mut RateMap,
    config: &RuntimeConfig,
    warnings: &mut Vec<FlowWarning>,
    edges: &mut Vec<FlowEdge>,
) {
    match stmt {
        Stmt::Block(stmts) => {
            for s in stmts {
                walk_stmt(s, component, in_rate, scope, acc, config, warnings, edges);
            }
        }
        Stmt::If { cond, then_branch, else_branch } => {
            let p = branch_probability(cond, scope);
            walk_stmt(then_branch, component, in_rate * p, scope, acc, config, warnings, edges);
            if let Some(else_branch) = else_branch {
                walk_stmt(else_branch, component, in_rate * (1.0 - p), scope, acc, config, warnings, edges);
            }
        }
        // Loop bounds are not analyzed (§4.8 limitations): one execution per input.
        Stmt::For { body, .. } => {
            walk_stmt(body, component, in_rate, scope, acc, config, warnings, edges);
        }
        Stmt::Let { names, value } => {
            walk_call_in_expr(value, component, in_rate, scope, acc, config, warnings, edges);
            if let (Some(name), Expr::Call { callee, .. }) = (names.first(), value) {
                if let Some((target, target_method)) = resolve_call_target(callee, component, scope, warnings) {
                    scope.variable_outcomes.insert(name.clone(), target.get_success_rate(target_method));
                }
            }
        }
        Stmt::Set { value, .. } | Stmt::Return(Some(value)) | Stmt::Expr(value) => {
            walk_call_in_expr(value, component, in_rate, scope, acc, config, warnings, edges);
        }
        Stmt::Return(None) | Stmt::Delay(_) => {}
    }
}

fn branch_probability(cond: &Expr, scope: &FlowScope) -> f64 {
    match cond {
        Expr::Identifier(name) => scope.variable_outcomes.get(name).copied().unwrap_or(0.5),
        Expr::Unary { op: crate::ast::UnaryOp::Not, operand } => 1.0 - branch_probability(operand, scope),
        Expr::Binary { op: BinaryOp::And, lhs, rhs } => branch_probability(lhs, scope) * branch_probability(rhs, scope),
        _ => 0.5,
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_call_in_expr(
    expr: &Expr,
    component: &ComponentHandle,
    in_rate: f64,
    scope: &mut FlowScope,
    acc: &mut RateMap,
    config: &RuntimeConfig,
    warnings: &mut Vec<FlowWarning>,
    edges: &mut Vec<FlowEdge>,
) {
    if let Expr::Call { callee, .. } = expr {
        match resolve_call_target(callee, component, scope, warnings) {
            Some((target, target_method)) => {
                edges.push(FlowEdge {
                    from: format!("{}.?", component.decl.name),
                    to: format!("{}.{target_method}", target.decl.name),
                    rate: in_rate,
                });
                flow_eval(&target, target_method, in_rate, scope, acc, config, warnings, edges);
            }
            None => {}
        }
    }
}

/// Resolves a call's callee (a `Member` chain rooted at `self` or a top-level identifier) to a
/// target component and method name, per the call-target-resolution rule in §4.8.
fn resolve_call_target<'e>(
    callee: &'e Expr,
    component: &ComponentHandle,
    scope: &FlowScope,
    warnings: &mut Vec<FlowWarning>,
) -> Option<(ComponentHandle, &'e str)> {
    let Expr::Member { receiver, member } = callee else {
        return None;
    };
    match resolve_static_receiver(receiver, component, scope) {
        Some(target) => Some((target, member.as_str())),
        None => {
            warnings.push(FlowWarning::UnresolvedCallTarget {
                component: component.decl.name.clone(),
                method: String::new(),
                expr: render_chain(callee),
            });
            None
        }
    }
}

fn resolve_static_receiver(expr: &Expr, component: &ComponentHandle, scope: &FlowScope) -> Option<ComponentHandle> {
    match expr {
        Expr::Identifier(name) if name == "self" => Some(component.clone()),
        Expr::Identifier(name) => match scope.static_env.get(name)?.kind {
            ValueKind::Component(handle) => Some(handle),
            _ => None,
        },
        Expr::Member { receiver, member } => {
            let base = resolve_static_receiver(receiver, component, scope)?;
            match base.get_param(member)?.kind {
                ValueKind::Component(handle) => Some(handle),
                _ => None,
            }
        }
        _ => None,
    }
}

fn render_chain(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(name) => name.clone(),
        Expr::Member { receiver, member } => format!("{}.{member}", render_chain(receiver)),
        _ => "<expr>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use std::sync::Arc;

    fn leaf_component(name: &str) -> Arc<ComponentDecl> {
        Arc::new(ComponentDecl {
            name: name.to_string(),
            params: vec![],
            uses: vec![],
            methods: vec![Arc::new(MethodDecl { name: "Get".into(), params: vec![], body: Stmt::Return(None) })],
            is_native: false,
            init_decls: vec![],
        })
    }

    #[test]
    fn cascading_call_credits_downstream_rate() {
        let cache_decl = leaf_component("Cache");
        let cache = ComponentHandle::from(crate::instance::ComponentInstance::new(cache_decl.clone(), Env::root(), None));

        let server_decl = Arc::new(ComponentDecl {
            name: "Server".into(),
            params: vec![],
            uses: vec![DependencyDecl { name: "cache".into(), resolved_component: cache_decl }],
            methods: vec![Arc::new(MethodDecl {
                name: "Handle".into(),
                params: vec![],
                body: Stmt::Block(vec![Stmt::Expr(Expr::Call {
                    callee: Box::new(Expr::Member {
                        receiver: Box::new(Expr::Member {
                            receiver: Box::new(Expr::Identifier("self".into())),
                            member: "cache".into(),
                        }),
                        member: "Get".into(),
                    }),
                    args: vec![],
                })]),
            })],
            is_native: false,
            init_decls: vec![],
        });
        let server = ComponentHandle::from(crate::instance::ComponentInstance::new(server_decl, Env::root(), None));
        server.set_param("cache", Value::new(ValueKind::Component(cache.clone())));

        let entry = GeneratorEntryPoint { component: server, method: "Handle".into(), rate: 10.0, generator_id: "g1".into() };
        let result = analyze(&[entry], &Env::root(), &RuntimeConfig::default()).unwrap();

        assert_eq!(result.status, FlowStatus::Converged);
        assert_eq!(*result.component_rates.get("Server.Handle").unwrap(), 10.0);
        assert_eq!(*result.component_rates.get("Cache.Get").unwrap(), 10.0);
    }
}
