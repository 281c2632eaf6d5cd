//! The Initializer compiler (§4.4).
//!
//! Turns the declarative mix of instance declarations, dependency overrides, and parameter
//! defaults found in a component or system body into a single, order-independent `Stmt::Block`:
//! pass 1 constructs every instance and binds every defaulted parameter, pass 2 wires overrides
//! onto the now-constructed instances. Diagnostics (unbound dependencies) are collected after
//! materialization, never raised during compilation.

use std::sync::Arc;

use crate::ast::{Expr, InitDecl, ParamDecl, Stmt, SystemDecl};
use crate::env::Env;
use crate::errors::InitError;
use crate::instance::SystemInstance;
use crate::interpreter::{CallContext, Interpreter};
use crate::value::ValueKind;

/// Compiles a component/system body into the ordered statement list the interpreter evaluates
/// to materialize it (§4.4 contract).
pub fn compile_initializer(param_defaults: &[ParamDecl], init_decls: &[InitDecl]) -> Stmt {
    let mut pass1 = Vec::new();
    let mut pass2 = Vec::new();

    for param in param_defaults {
        if let Some(default) = &param.default {
            pass1.push(Stmt::Set {
                target: member_of("self", &param.name),
                value: default.clone(),
            });
        }
    }

    for decl in init_decls {
        match decl {
            InitDecl::Instance { target, component, overrides } => {
                pass1.push(Stmt::Set {
                    target: Expr::Identifier(target.clone()),
                    value: Expr::New { component: component.clone(), args: vec![] },
                });
                for (key, value) in overrides {
                    pass2.push(Stmt::Set { target: member_of(target, key), value: value.clone() });
                }
            }
            InitDecl::DependencyOverride { target, dependency, value } => {
                pass2.push(Stmt::Set { target: member_of(target, dependency), value: value.clone() });
            }
            InitDecl::Let { name, value } => {
                pass1.push(Stmt::Let { names: vec![name.clone()], value: value.clone() });
            }
        }
    }

    pass1.extend(pass2);
    Stmt::Block(pass1)
}

fn member_of(receiver: &str, member: &str) -> Expr {
    Expr::Member { receiver: Box::new(Expr::Identifier(receiver.to_string())), member: member.to_string() }
}

/// Materializes a system: compiles and evaluates its Initializer, registers every top-level
/// instance declaration by name, and returns the resulting [`SystemInstance`]. Uninitialized
/// dependencies are *not* an error here (§4.4) — call
/// [`SystemInstance::uninitialized_dependencies`] before invoking a method.
pub fn materialize_system(interp: &Interpreter, decl: Arc<SystemDecl>) -> Result<SystemInstance, InitError> {
    let _span = tracing::debug_span!("materialize_system", system = %decl.name).entered();
    let root_env = Env::root();
    let system = SystemInstance::new(decl.clone(), root_env.clone());
    let block = compile_initializer(&[], &decl.body);
    let mut ctx = CallContext::new(0);
    interp.eval_stmt(&block, &root_env, &mut ctx)?;

    for init_decl in &decl.body {
        let target = match init_decl {
            InitDecl::Instance { target, .. } => target,
            InitDecl::DependencyOverride { .. } => continue,
            InitDecl::Let { name, .. } => name,
        };
        if let Some(value) = root_env.get(target) {
            if let ValueKind::Component(handle) = value.kind {
                system.register(target.clone(), handle);
            }
        }
    }

    let unbound = system.uninitialized_dependencies();
    if !unbound.is_empty() {
        tracing::debug!(count = unbound.len(), "system materialized with unbound dependencies");
    }

    Ok(system)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    #[test]
    fn compiles_pass1_before_pass2() {
        let component = Arc::new(ComponentDecl {
            name: "Cache".into(),
            params: vec![],
            uses: vec![],
            methods: vec![],
            is_native: false,
            init_decls: vec![],
        });
        let decls = vec![InitDecl::Instance {
            target: "cache".into(),
            component,
            overrides: vec![("capacity".into(), Expr::Literal(Literal::Int(10)))],
        }];
        let block = compile_initializer(&[], &decls);
        let Stmt::Block(stmts) = block else { panic!("expected block") };
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Stmt::Set { value: Expr::New { .. }, .. }));
        assert!(matches!(&stmts[1], Stmt::Set { target: Expr::Member { .. }, .. }));
    }
}
