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

//! Query engine: build, cache and execute captured call chains

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::ast::Expr;
use crate::cache::{CacheConfig, NullCache, QueryCache};
use crate::error::Result;
use crate::evaluator::{EvaluationContext, Evaluator};
use crate::model::Value;
use crate::pipeline::SchemePreference;
use crate::query::{ParsedQuery, QueryBuilder, QueryExecutor, ResolvedQuery};

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Iterator scheme selection
    pub scheme: SchemePreference,

    /// Query cache behavior
    pub cache: CacheConfig,

    /// Variables visible while classifying query arguments
    pub variables: IndexMap<String, Value, FxBuildHasher>,
}

impl EngineConfig {
    /// Always use the pull-based scheme
    pub fn lazy() -> Self {
        Self {
            scheme: SchemePreference::Lazy,
            ..Self::default()
        }
    }

    /// Always use the buffering scheme
    pub fn eager() -> Self {
        Self {
            scheme: SchemePreference::Eager,
            ..Self::default()
        }
    }

    /// Configuration for testing
    pub fn testing() -> Self {
        Self {
            cache: CacheConfig::testing(),
            ..Self::default()
        }
    }

    /// Add a build-time variable
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    fn build_context(&self) -> EvaluationContext {
        self.variables
            .iter()
            .fold(EvaluationContext::new(), |context, (name, value)| {
                context.with_variable(name.clone(), value.clone())
            })
    }
}

/// Runs captured call chains against bound sources
///
/// Resolved queries are looked up in the configured [`QueryCache`] by
/// structural hash; runtime arguments are taken from the chain on every
/// call, so chains differing only in closure constants share one entry.
#[derive(Clone)]
pub struct QueryEngine {
    config: EngineConfig,
    builder: QueryBuilder,
    executor: QueryExecutor,
    cache: Arc<dyn QueryCache>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl QueryEngine {
    /// Create an engine without a query cache
    pub fn new(config: EngineConfig) -> Self {
        Self::with_cache(config, Arc::new(NullCache))
    }

    /// Create an engine backed by `cache`
    pub fn with_cache(config: EngineConfig, cache: Arc<dyn QueryCache>) -> Self {
        Self::with_evaluator(config, cache, Evaluator::default())
    }

    /// Create an engine with a custom evaluator
    pub fn with_evaluator(
        config: EngineConfig,
        cache: Arc<dyn QueryCache>,
        evaluator: Evaluator,
    ) -> Self {
        if config.cache.enabled && config.cache.development_mode {
            let prefix = config.cache.prefix();
            log::debug!("development mode: clearing query cache namespace {prefix}");
            if let Err(err) = cache.invalidate_namespace(&prefix) {
                log::warn!("failed to clear query cache namespace {prefix}: {err}");
            }
        }
        Self {
            builder: QueryBuilder::new(evaluator.clone(), config.build_context()),
            executor: QueryExecutor::new(evaluator, config.scheme),
            config,
            cache,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse a call chain without touching the cache
    pub fn parse(&self, chain: &Expr) -> Result<ParsedQuery> {
        self.builder.build(chain)
    }

    /// Structural hash of a call chain
    pub fn hash(&self, chain: &Expr) -> Result<String> {
        Ok(self.parse(chain)?.hash())
    }

    /// Resolved query for a parsed chain, from the cache when possible
    pub fn resolve(&self, parsed: &ParsedQuery) -> Result<Arc<ResolvedQuery>> {
        let hash = parsed.hash();
        if !self.config.cache.enabled {
            return Ok(Arc::new(ResolvedQuery::resolve(parsed)));
        }

        let key = self.config.cache.key(&hash);
        match self.cache.get(&key) {
            Ok(Some(resolved)) => {
                log::debug!("query cache hit for {key}");
                return Ok(resolved);
            }
            Ok(None) => log::debug!("query cache miss for {key}"),
            Err(err) => log::warn!("query cache lookup for {key} failed: {err}"),
        }

        let resolved = Arc::new(ResolvedQuery::resolve(parsed));
        if let Err(err) = self.cache.put(&key, resolved.clone()) {
            log::warn!("failed to store {key} in the query cache: {err}");
        }
        Ok(resolved)
    }

    /// Execute a call chain, reading its source and variables from `context`
    pub fn execute(&self, chain: &Expr, context: Arc<EvaluationContext>) -> Result<Value> {
        let parsed = self.parse(chain)?;
        let resolved = self.resolve(&parsed)?;
        self.executor.execute(&resolved, &parsed.parameters, context)
    }

    /// Execute a call chain whose source variable is bound to `source`
    pub fn execute_with(&self, chain: &Expr, source: impl Into<Value>) -> Result<Value> {
        let parsed = self.parse(chain)?;
        let resolved = self.resolve(&parsed)?;
        let context = Arc::new(
            EvaluationContext::new().with_variable(resolved.query.source.clone(), source),
        );
        self.executor.execute(&resolved, &parsed.parameters, context)
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, Expression};
    use crate::cache::MemoryCache;
    use crate::error::QueryError;
    use pretty_assertions::assert_eq;

    fn over_threshold(threshold: i64) -> Expr {
        let predicate = Expression::arrow(
            &["x"],
            Expression::binary(
                Expression::variable("x"),
                BinaryOperator::GreaterThan,
                Expression::value(threshold),
            ),
        );
        Expression::method_call(Expression::variable("numbers"), "where", vec![predicate])
    }

    #[test]
    fn test_execute_with_source() {
        let engine = QueryEngine::default();
        let result = engine
            .execute_with(&over_threshold(1), Value::list([1, 2, 3].map(Value::Int)))
            .unwrap();
        assert_eq!(
            result
                .as_array()
                .map(|map| map.values().cloned().collect::<Vec<_>>()),
            Some(vec![Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_cache_is_shared_across_runtime_constants() {
        let cache = Arc::new(MemoryCache::new());
        let engine = QueryEngine::with_cache(EngineConfig::testing(), cache.clone());
        let numbers = Value::list([1, 2, 3].map(Value::Int));

        engine.execute_with(&over_threshold(1), numbers.clone()).unwrap();
        let result = engine.execute_with(&over_threshold(2), numbers).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(result.as_array().map(|map| map.len()), Some(1));
    }

    #[test]
    fn test_disabled_cache_is_untouched() {
        let cache = Arc::new(MemoryCache::new());
        let engine = QueryEngine::with_cache(
            EngineConfig {
                cache: CacheConfig::disabled(),
                ..EngineConfig::default()
            },
            cache.clone(),
        );
        engine.execute_with(&over_threshold(0), Value::list([Value::Int(1)])).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_development_mode_clears_namespace_once() {
        let cache = Arc::new(MemoryCache::new());
        let stale = QueryEngine::with_cache(EngineConfig::testing(), cache.clone());
        stale.execute_with(&over_threshold(0), Value::list([Value::Int(1)])).unwrap();
        assert_eq!(cache.len(), 1);

        let engine = QueryEngine::with_cache(EngineConfig::testing(), cache.clone());
        assert!(cache.is_empty());
        engine.execute_with(&over_threshold(0), Value::list([Value::Int(1)])).unwrap();
        engine.execute_with(&over_threshold(0), Value::list([Value::Int(1)])).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unbound_source() {
        let engine = QueryEngine::default();
        let err = engine
            .execute(&over_threshold(0), Arc::new(EvaluationContext::new()))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnboundVariable { name } if name == "numbers"));
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(EngineConfig::lazy().scheme, SchemePreference::Lazy);
        assert_eq!(EngineConfig::eager().scheme, SchemePreference::Eager);
        assert_eq!(EngineConfig::default().scheme, SchemePreference::Auto);
        assert!(EngineConfig::testing().cache.development_mode);
    }
}
