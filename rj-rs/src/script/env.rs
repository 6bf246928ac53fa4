//! Variable environments.
//!
//! Verification only needs to know which names have been assigned so far;
//! execution needs their values.  The two never mix, so they are separate
//! types behind the small [`Scope`] trait the expression verifier uses.

use std::collections::{HashMap, HashSet};

/// Name lookup shared by both environments.
pub trait Scope {
    fn is_defined(&self, name: &str) -> bool;
}

/// Names assigned so far during [`verify`](super::Engine::verify).
#[derive(Debug, Default)]
pub struct VerifyEnv {
    names: HashSet<String>,
}

impl VerifyEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }
}

impl Scope for VerifyEnv {
    fn is_defined(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Variable values during [`eval`](super::Engine::eval).
#[derive(Debug, Default, Clone)]
pub struct ExecEnv {
    vars: HashMap<String, String>,
}

impl ExecEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Scope for ExecEnv {
    fn is_defined(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExecEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = ExecEnv::new();
        for (k, v) in iter {
            env.set(k, v);
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_env_tracks_names_only() {
        let mut env = VerifyEnv::new();
        assert!(!env.is_defined("a"));
        env.define("a");
        assert!(env.is_defined("a"));
        assert!(!env.is_defined("A"));
    }

    #[test]
    fn exec_env_overwrites() {
        let mut env: ExecEnv = [("a", "1")].into_iter().collect();
        env.set("a", "[1,2]");
        assert_eq!(env.get("a"), Some("[1,2]"));
        assert_eq!(env.len(), 1);
        assert!(env.is_defined("a"));
        assert!(env.get("b").is_none());
    }
}
