//! Lexically scoped environments (§3, §4.2).
//!
//! `Env` is a cheap-to-clone handle onto a chain of frames. `push` creates a child frame without
//! copying the parent; `get` walks up the chain on a miss; `set` always binds in the current
//! (innermost) frame. Because a bound method's "SavedEnv" and a live call frame can both hold a
//! clone of the same chain, frames use interior mutability (`RwLock`) rather than requiring
//! unique ownership.

use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::value::Value;

struct Frame {
    bindings: RwLock<AHashMap<String, Value>>,
    parent: Option<Env>,
}

/// A lexically scoped environment handle. Clones share the same underlying frame chain.
#[derive(Clone)]
pub struct Env(Arc<Frame>);

impl Env {
    /// Creates a fresh root environment with no parent.
    pub fn root() -> Self {
        Self(Arc::new(Frame { bindings: RwLock::new(AHashMap::new()), parent: None }))
    }

    /// Creates a child frame of `self`. The parent is unaffected; lookups miss into it.
    pub fn push(&self) -> Self {
        Self(Arc::new(Frame { bindings: RwLock::new(AHashMap::new()), parent: Some(self.clone()) }))
    }

    /// Binds `name` in the *current* (innermost) frame, shadowing any parent binding.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.write().expect("env lock poisoned").insert(name.into(), value);
    }

    /// Looks up `name`, walking up the frame chain on a miss.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = &self.0;
        loop {
            if let Some(value) = frame.bindings.read().expect("env lock poisoned").get(name) {
                return Some(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = &parent.0,
                None => return None,
            }
        }
    }

    /// True if `name` is bound in this frame or any ancestor.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Rebinds `name` in whichever frame already holds it (used by `Set` on a plain identifier
    /// that is not freshly declared); falls back to binding in the current frame if unbound
    /// anywhere, matching `env.Set` semantics in §4.2.
    pub fn assign(&self, name: &str, value: Value) {
        let mut frame = &self.0;
        loop {
            let mut bindings = frame.bindings.write().expect("env lock poisoned");
            if bindings.contains_key(name) {
                bindings.insert(name.to_string(), value);
                return;
            }
            drop(bindings);
            match &frame.parent {
                Some(parent) => frame = &parent.0,
                None => break,
            }
        }
        self.set(name, value);
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Env(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_bindings() {
        let root = Env::root();
        root.set("x", Value::int(1));
        let child = root.push();
        assert_eq!(child.get("x").unwrap().get_int().unwrap(), 1);
    }

    #[test]
    fn child_shadows_without_mutating_parent() {
        let root = Env::root();
        root.set("x", Value::int(1));
        let child = root.push();
        child.set("x", Value::int(2));
        assert_eq!(child.get("x").unwrap().get_int().unwrap(), 2);
        assert_eq!(root.get("x").unwrap().get_int().unwrap(), 1);
    }

    #[test]
    fn clone_shares_the_same_frame() {
        let root = Env::root();
        let alias = root.clone();
        root.set("x", Value::int(5));
        assert_eq!(alias.get("x").unwrap().get_int().unwrap(), 5);
    }
}
