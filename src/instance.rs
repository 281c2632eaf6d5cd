//! File / System / Component instances (§4.3).
//!
//! A [`Runtime`] memoizes loaded [`File`]s and hands out [`SystemInstance`]s. A
//! [`ComponentInstance`] is the shared, mutable-only-at-init node of the component graph:
//! identity (pointer equality, via [`ComponentHandle`]) is load-bearing for the measurement
//! store and the flow solver's `RateMap`.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::ast::{ComponentDecl, File, SystemDecl};
use crate::env::Env;
use crate::errors::UninitializedDependency;
use crate::native::NativeComponent;
use crate::value::Value;

/// A constructed component. Parameters and arrival rates are mutated only during
/// initialization or by an explicit `Set`/flow-solver update; simulation readers otherwise see
/// a stable snapshot (§9 "shared mutable component graph").
pub struct ComponentInstance {
    pub decl: Arc<ComponentDecl>,
    pub env: Env,
    params: RwLock<HashMap<String, Value>>,
    arrival_rates: RwLock<HashMap<String, f64>>,
    success_rates: RwLock<HashMap<String, f64>>,
    pub native: Option<Arc<dyn NativeComponent>>,
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance").field("decl", &self.decl.name).finish()
    }
}

impl ComponentInstance {
    pub fn new(decl: Arc<ComponentDecl>, env: Env, native: Option<Arc<dyn NativeComponent>>) -> Arc<Self> {
        Arc::new(Self {
            decl,
            env,
            params: RwLock::new(HashMap::new()),
            arrival_rates: RwLock::new(HashMap::new()),
            success_rates: RwLock::new(HashMap::new()),
            native,
        })
    }

    pub fn is_native(&self) -> bool {
        self.decl.is_native
    }

    pub fn get_param(&self, name: &str) -> Option<Value> {
        self.params.read().expect("lock poisoned").get(name).cloned()
    }

    pub fn set_param(&self, name: impl Into<String>, value: Value) {
        self.params.write().expect("lock poisoned").insert(name.into(), value);
    }

    /// Dependencies declared on this component's decl that have not yet been bound as a
    /// parameter. Evaluated against a fresh snapshot of the parameter map each call.
    pub fn unbound_dependencies(&self) -> Vec<String> {
        let params = self.params.read().expect("lock poisoned");
        self.decl
            .uses
            .iter()
            .filter(|dep| !matches!(params.get(&dep.name), Some(v) if !v.is_nil()))
            .map(|dep| dep.name.clone())
            .collect()
    }

    pub fn get_arrival_rate(&self, method: &str) -> f64 {
        self.arrival_rates.read().expect("lock poisoned").get(method).copied().unwrap_or(0.0)
    }

    pub fn set_arrival_rate(&self, method: impl Into<String>, rate: f64) {
        self.arrival_rates.write().expect("lock poisoned").insert(method.into(), rate);
    }

    pub fn total_arrival_rate(&self) -> f64 {
        self.arrival_rates.read().expect("lock poisoned").values().sum()
    }

    pub fn get_success_rate(&self, method: &str) -> f64 {
        self.success_rates.read().expect("lock poisoned").get(method).copied().unwrap_or(1.0)
    }

    pub fn set_success_rate(&self, method: impl Into<String>, rate: f64) {
        self.success_rates.write().expect("lock poisoned").insert(method.into(), rate);
    }

    pub fn arrival_rate_snapshot(&self) -> HashMap<String, f64> {
        self.arrival_rates.read().expect("lock poisoned").clone()
    }
}

/// A reference-counted, identity-comparable handle to a [`ComponentInstance`]. Two handles are
/// equal iff they point at the same instance, never by structural comparison.
#[derive(Clone)]
pub struct ComponentHandle(pub Arc<ComponentInstance>);

impl std::ops::Deref for ComponentHandle {
    type Target = ComponentInstance;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Arc<ComponentInstance>> for ComponentHandle {
    fn from(inner: Arc<ComponentInstance>) -> Self {
        Self(inner)
    }
}

impl std::fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComponentHandle({}@{:p})", self.0.decl.name, Arc::as_ptr(&self.0))
    }
}

impl PartialEq for ComponentHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ComponentHandle {}

impl Hash for ComponentHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// A materialized system: the top-level named component instances plus whatever initializer
/// diagnostics were collected while constructing them.
pub struct SystemInstance {
    pub decl: Arc<SystemDecl>,
    pub root_env: Env,
    instances: RwLock<IndexMap<String, ComponentHandle>>,
    uninitialized: RwLock<Vec<UninitializedDependency>>,
}

impl SystemInstance {
    pub fn new(decl: Arc<SystemDecl>, root_env: Env) -> Self {
        Self {
            decl,
            root_env,
            instances: RwLock::new(IndexMap::new()),
            uninitialized: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, handle: ComponentHandle) {
        self.instances.write().expect("lock poisoned").insert(name.into(), handle);
    }

    pub fn get(&self, name: &str) -> Option<ComponentHandle> {
        self.instances.read().expect("lock poisoned").get(name).cloned()
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.instances.read().expect("lock poisoned").keys().cloned().collect()
    }

    pub fn all_instances(&self) -> Vec<(String, ComponentHandle)> {
        self.instances
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn push_diagnostic(&self, diag: UninitializedDependency) {
        self.uninitialized.write().expect("lock poisoned").push(diag);
    }

    /// Walks every reachable instance and reports dependencies that are still unbound. This is
    /// the diagnostics pass described in §4.4: never fatal at construction time, collected here
    /// for the caller to act on at invocation time.
    pub fn uninitialized_dependencies(&self) -> Vec<UninitializedDependency> {
        let mut out = self.uninitialized.read().expect("lock poisoned").clone();
        for (name, handle) in self.all_instances() {
            for dep in handle.unbound_dependencies() {
                out.push(UninitializedDependency { path: format!("{name}.{dep}"), pos: None });
            }
        }
        out
    }
}

/// Caches loaded [`File`]s and hands out fresh [`SystemInstance`]s for a named system within
/// one. Resolvers transparently follow `Import` declarations to the defining file (§4.3), the
/// same name-keyed registry shape as the teacher's `intern.rs`/`heap.rs` tables, which is why it
/// shares their `AHashMap` choice instead of `std::HashMap`.
#[derive(Default)]
pub struct Runtime {
    files: RwLock<AHashMap<String, Arc<File>>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file(&self, file: Arc<File>) {
        self.files.write().expect("lock poisoned").insert(file.name.clone(), file);
    }

    pub fn get_file(&self, name: &str) -> Option<Arc<File>> {
        self.files.read().expect("lock poisoned").get(name).cloned()
    }

    /// Resolves a component declaration by name, first in `file`, then transitively through its
    /// imports.
    pub fn get_component_decl(&self, file: &File, name: &str) -> Option<Arc<ComponentDecl>> {
        if let Some(decl) = file.components.iter().find(|c| c.name == name) {
            return Some(decl.clone());
        }
        for import in &file.imports {
            if let Some(decl) = self.get_component_decl(&import.resolved_file, name) {
                return Some(decl);
            }
        }
        None
    }

    pub fn get_enum_decl(&self, file: &File, name: &str) -> Option<Arc<crate::ast::EnumDecl>> {
        if let Some(decl) = file.enums.iter().find(|e| e.name == name) {
            return Some(decl.clone());
        }
        for import in &file.imports {
            if let Some(decl) = self.get_enum_decl(&import.resolved_file, name) {
                return Some(decl);
            }
        }
        None
    }

    /// Returns a fresh `SystemInstance` for `name` within `file`. The instance is empty; run the
    /// compiled Initializer (§4.4) against it to populate component instances.
    pub fn new_system(&self, file: &File, name: &str) -> Option<SystemInstance> {
        let decl = file.systems.iter().find(|s| s.name == name)?.clone();
        let root_env = Env::root();
        Some(SystemInstance::new(decl, root_env))
    }
}
