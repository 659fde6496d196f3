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

//! Function registry of pure native functions

use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{QueryError, Result};
use crate::model::Value;

/// Native function implementation
pub type NativeFunction = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Arity signature of a registered function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    /// Function name (lower-case)
    pub name: String,
    /// Minimum number of arguments
    pub min_args: usize,
    /// Maximum number of arguments (None for variadic)
    pub max_args: Option<usize>,
}

impl FunctionSignature {
    /// Check an argument count against the signature
    pub fn check_arity(&self, actual: usize) -> Result<()> {
        if actual < self.min_args || self.max_args.is_some_and(|max| actual > max) {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => format!("{max}"),
                Some(max) => format!("{}-{max}", self.min_args),
                None => format!("at least {}", self.min_args),
            };
            return Err(QueryError::invalid_argument(
                self.name.clone(),
                actual,
                format!("expects {expected} arguments, got {actual}"),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct RegisteredFunction {
    signature: FunctionSignature,
    implementation: NativeFunction,
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Registry mapping function names to native implementations
///
/// Lookups are case-insensitive, like host function names.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the standard builtins
    pub fn standard() -> Self {
        let mut registry = Self::new();
        super::builtins::register_standard(&mut registry);
        registry
    }

    /// Register a function
    pub fn register<F>(&mut self, name: &str, min_args: usize, max_args: Option<usize>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.to_ascii_lowercase();
        log::trace!("registering function {name}");
        self.functions.insert(
            name.clone(),
            RegisteredFunction {
                signature: FunctionSignature {
                    name,
                    min_args,
                    max_args,
                },
                implementation: Arc::new(function),
            },
        );
    }

    /// Check whether a function is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    /// Get the signature of a registered function
    pub fn signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|function| &function.signature)
    }

    /// Names of all registered functions
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Call a registered function after checking its arity
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self
            .functions
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| QueryError::not_a_constant("FunctionCall", format!("{name}()")))?;
        function.signature.check_arity(args.len())?;
        (function.implementation)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_call() {
        let mut registry = FunctionRegistry::new();
        registry.register("Twice", 1, Some(1), |args| {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
        });
        assert!(registry.contains("twice"));
        assert_eq!(registry.call("TWICE", &[Value::Int(4)]).unwrap(), Value::Int(8));
    }

    #[test]
    fn test_arity_is_checked() {
        let registry = FunctionRegistry::standard();
        let err = registry.call("strlen", &[]).unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidOperationArgument { ref method, .. } if method == "strlen"
        ));
    }

    #[test]
    fn test_unknown_function_is_not_constant() {
        let registry = FunctionRegistry::standard();
        assert!(matches!(
            registry.call("file_get_contents", &[Value::from("x")]),
            Err(QueryError::NotAConstantExpression { .. })
        ));
    }
}
