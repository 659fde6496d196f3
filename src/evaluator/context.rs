// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Evaluation context: variable tables chained to enclosing scopes

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use super::callable::Callable;
use crate::model::Value;

/// Variable lookup table with an optional enclosing scope
///
/// A context is a fixed table once shared; closure frames are owned child
/// contexts that write only to their own table.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    variables: FxHashMap<String, Value>,
    callables: FxHashMap<String, Callable>,
    unset: FxHashSet<String>,
    parent: Option<Arc<EvaluationContext>>,
}

impl EvaluationContext {
    /// Create an empty root context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a child context whose lookups fall back to `parent`
    pub fn child(parent: Arc<EvaluationContext>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Builder-style variable binding
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_variable(name, value);
        self
    }

    /// Builder-style callable binding
    pub fn with_callable(mut self, name: impl Into<String>, callable: Callable) -> Self {
        self.set_callable(name, callable);
        self
    }

    /// Bind a variable in this table
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.unset.remove(&name);
        self.callables.remove(&name);
        self.variables.insert(name, value.into());
    }

    /// Bind a variable to a callable in this table
    pub fn set_callable(&mut self, name: impl Into<String>, callable: Callable) {
        let name = name.into();
        self.unset.remove(&name);
        self.variables.remove(&name);
        self.callables.insert(name, callable);
    }

    /// Remove a variable, shadowing any binding in enclosing scopes
    pub fn unset_variable(&mut self, name: &str) {
        self.variables.remove(name);
        self.callables.remove(name);
        self.unset.insert(name.to_string());
    }

    /// Look up a value variable through the scope chain
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value);
        }
        if self.unset.contains(name) || self.callables.contains_key(name) {
            return None;
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Look up a callable variable through the scope chain
    pub fn lookup_callable(&self, name: &str) -> Option<&Callable> {
        if let Some(callable) = self.callables.get(name) {
            return Some(callable);
        }
        if self.unset.contains(name) || self.variables.contains_key(name) {
            return None;
        }
        self.parent.as_ref().and_then(|parent| parent.lookup_callable(name))
    }

    /// Check whether a name is bound (to a value or a callable)
    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some() || self.lookup_callable(name).is_some()
    }

    /// Names bound directly in this table
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.variables
            .keys()
            .chain(self.callables.keys())
            .map(String::as_str)
    }

    /// Enclosing scope
    pub fn parent(&self) -> Option<&Arc<EvaluationContext>> {
        self.parent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_falls_back_to_parent() {
        let root = Arc::new(EvaluationContext::new().with_variable("x", 1).with_variable("y", 2));
        let mut frame = EvaluationContext::child(root);
        frame.set_variable("y", 20);

        assert_eq!(frame.lookup("x"), Some(&Value::Int(1)));
        assert_eq!(frame.lookup("y"), Some(&Value::Int(20)));
        assert!(frame.lookup("z").is_none());
    }

    #[test]
    fn test_unset_shadows_parent() {
        let root = Arc::new(EvaluationContext::new().with_variable("x", 1));
        let mut frame = EvaluationContext::child(root);
        frame.unset_variable("x");
        assert!(frame.lookup("x").is_none());
        assert!(!frame.is_bound("x"));
    }

    #[test]
    fn test_callable_binding_is_not_a_value() {
        let context = EvaluationContext::new().with_callable("f", Callable::builtin("strlen"));
        assert!(context.lookup("f").is_none());
        assert!(context.lookup_callable("f").is_some());
        assert!(context.is_bound("f"));
    }
}
