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

//! Expression evaluator
//!
//! Calls are never structurally executed: method calls, static calls, object
//! construction and closures cannot be reduced to a value. Function calls
//! only run registered pure builtins.

use std::convert::Infallible;
use std::sync::Arc;

use super::context::EvaluationContext;
use super::operators::{apply_binary, apply_cast, apply_unary, parse_numeric, Number};
use crate::ast::{
    AssignData, BinaryOpData, BinaryOperator, CastType, ClosureData, Expr, Expression,
    ExpressionKind, ExpressionWalker, FunctionCallData, MethodCallData, NewData, ParameterData,
    StaticMethodCallData, TernaryData, UnaryOperator, Visitor, compile, free_variables,
    walk_children,
};
use crate::error::{QueryError, Result};
use crate::model::{OrderedMap, Value};
use crate::registry::FunctionRegistry;

/// Reduces expressions to values under an evaluation context
#[derive(Debug, Clone)]
pub struct Evaluator {
    functions: Arc<FunctionRegistry>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Arc::new(FunctionRegistry::standard()))
    }
}

impl Evaluator {
    /// Create an evaluator over a function registry
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }

    /// The function registry used for function calls
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Evaluate an expression to a value
    pub fn evaluate(&self, expr: &Expr, context: &EvaluationContext) -> Result<Value> {
        Reducer {
            evaluator: self,
            context,
        }
        .visit_expression(expr)
    }

    /// Evaluate, treating unbound variables and missing elements as absent
    ///
    /// Used by `isset`, `??` and compound assignment.
    pub fn evaluate_quiet(
        &self,
        expr: &Expr,
        context: &EvaluationContext,
    ) -> Result<Option<Value>> {
        match &**expr {
            Expression::Variable { name } => {
                let name = self.evaluate(name, context)?.to_string();
                Ok(context.lookup(&name).cloned())
            }
            Expression::Index {
                value,
                index: Some(index),
            } => {
                let Some(container) = self.evaluate_quiet(value, context)? else {
                    return Ok(None);
                };
                let key = self.array_key(index, context)?;
                Ok(element(&container, &key))
            }
            Expression::Field { value, name } => {
                let Some(container) = self.evaluate_quiet(value, context)? else {
                    return Ok(None);
                };
                let name = self.evaluate(name, context)?;
                Ok(match container {
                    Value::Object(object) => object.properties.get(&name).cloned(),
                    _ => None,
                })
            }
            _ => self.evaluate(expr, context).map(Some),
        }
    }

    /// Reduce an expression to a value without executing calls
    ///
    /// Fails with `NotAConstantExpression` for any construct that would need
    /// to run host code, and with `UnboundVariable` for missing variables.
    pub fn simplify_to_value(&self, expr: &Expr, context: &EvaluationContext) -> Result<Value> {
        self.evaluate(expr, context)
    }

    /// Check whether an expression is a constant: it reads no variables and
    /// reduces to a value under an empty context
    pub fn constant_value(&self, expr: &Expr) -> Option<Value> {
        if !free_variables(expr).is_empty() {
            return None;
        }
        self.evaluate(expr, &EvaluationContext::new()).ok()
    }

    /// Partially evaluate an expression
    ///
    /// Every subtree that reduces to a value under `context` is replaced by a
    /// literal; the rest of the tree is kept. Closure definitions are left
    /// untouched. Returns the input handle when nothing reduces.
    pub fn simplify(&self, expr: &Expr, context: &EvaluationContext) -> Expr {
        let mut simplifier = Simplifier {
            evaluator: self,
            context,
        };
        match simplifier.walk(expr) {
            Ok(simplified) => simplified,
            Err(never) => match never {},
        }
    }

    /// Evaluate an index expression to a normalized array key
    pub fn array_key(&self, index: &Expr, context: &EvaluationContext) -> Result<Value> {
        normalize_key(self.evaluate(index, context)?)
    }
}

/// Normalize a value used as an array key
///
/// Integral numeric strings and floats become integers, booleans become 0/1
/// and null becomes the empty string.
pub fn normalize_key(key: Value) -> Result<Value> {
    Ok(match key {
        Value::Int(_) => key,
        Value::String(s) => match parse_numeric(&s) {
            Some(Number::Int(i)) if i.to_string() == *s => Value::Int(i),
            _ => Value::String(s),
        },
        Value::Float(f) => Value::Int(if f.is_finite() { f as i64 } else { 0 }),
        Value::Bool(b) => Value::Int(i64::from(b)),
        Value::Null => Value::from(""),
        Value::Array(_) | Value::Object(_) => {
            return Err(QueryError::type_mismatch(
                "int or string",
                key.type_name(),
                Some("array offset".to_string()),
            ));
        }
    })
}

fn element(container: &Value, key: &Value) -> Option<Value> {
    match container {
        Value::Array(map) => map.get(key).cloned(),
        Value::Object(object) => object.properties.get(key).cloned(),
        Value::String(s) => {
            let position = key.as_int()?;
            let length = i64::try_from(s.len()).ok()?;
            let position = if position < 0 { length + position } else { position };
            let position = usize::try_from(position).ok()?;
            s.get(position..position + 1).map(Value::from)
        }
        _ => None,
    }
}

fn constant(name: &str) -> Option<Value> {
    Some(match name.to_ascii_uppercase().trim_start_matches('\\') {
        "TRUE" => Value::Bool(true),
        "FALSE" => Value::Bool(false),
        "NULL" => Value::Null,
        "PHP_INT_MAX" => Value::Int(i64::MAX),
        "PHP_INT_MIN" => Value::Int(i64::MIN),
        "PHP_INT_SIZE" => Value::Int(8),
        "PHP_FLOAT_EPSILON" => Value::Float(f64::EPSILON),
        "PHP_EOL" => Value::from("\n"),
        "M_PI" => Value::Float(std::f64::consts::PI),
        "M_E" => Value::Float(std::f64::consts::E),
        "INF" => Value::Float(f64::INFINITY),
        "NAN" => Value::Float(f64::NAN),
        _ => return None,
    })
}

struct Reducer<'a> {
    evaluator: &'a Evaluator,
    context: &'a EvaluationContext,
}

impl Reducer<'_> {
    fn not_constant(&self, kind: ExpressionKind, expr: Expr) -> Result<Value> {
        Err(QueryError::not_a_constant(kind.name(), compile(&expr)))
    }

    fn misplaced(&self, kind: ExpressionKind, message: &str) -> Result<Value> {
        Err(QueryError::structural(kind.name(), message))
    }

    fn values(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.visit_expression(expr)).collect()
    }
}

impl Visitor for Reducer<'_> {
    type Result = Result<Value>;

    fn visit_value(&mut self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn visit_variable(&mut self, name: &Expr) -> Result<Value> {
        let name = self.visit_expression(name)?.to_string();
        match self.context.lookup(&name) {
            Some(value) => Ok(value.clone()),
            None if self.context.lookup_callable(&name).is_some() => Err(QueryError::not_a_constant(
                "Variable",
                format!("${name} (callable)"),
            )),
            None => Err(QueryError::unbound_variable(name)),
        }
    }

    fn visit_parameter(&mut self, _data: &ParameterData) -> Result<Value> {
        self.misplaced(ExpressionKind::Parameter, "parameter outside a parameter list")
    }

    fn visit_unary_op(&mut self, op: UnaryOperator, operand: &Expr) -> Result<Value> {
        apply_unary(op, &self.visit_expression(operand)?)
    }

    fn visit_binary_op(&mut self, data: &BinaryOpData) -> Result<Value> {
        match data.op {
            BinaryOperator::NullCoalesce => {
                match self.evaluator.evaluate_quiet(&data.left, self.context)? {
                    Some(left) if !left.is_null() => Ok(left),
                    _ => self.visit_expression(&data.right),
                }
            }
            BinaryOperator::LogicalAnd => {
                let left = self.visit_expression(&data.left)?;
                Ok(Value::Bool(
                    left.is_truthy() && self.visit_expression(&data.right)?.is_truthy(),
                ))
            }
            BinaryOperator::LogicalOr => {
                let left = self.visit_expression(&data.left)?;
                Ok(Value::Bool(
                    left.is_truthy() || self.visit_expression(&data.right)?.is_truthy(),
                ))
            }
            op => {
                let left = self.visit_expression(&data.left)?;
                let right = match (op, &*data.right) {
                    // `$x instanceof Foo` names the class with a constant
                    (BinaryOperator::InstanceOf, Expression::ConstantRef { name }) => {
                        Value::from(name.as_str())
                    }
                    _ => self.visit_expression(&data.right)?,
                };
                apply_binary(op, &left, &right)
            }
        }
    }

    fn visit_cast(&mut self, cast_type: CastType, value: &Expr) -> Result<Value> {
        apply_cast(cast_type, &self.visit_expression(value)?)
    }

    fn visit_assign(&mut self, data: &AssignData) -> Result<Value> {
        self.not_constant(
            ExpressionKind::Assign,
            Arc::new(Expression::Assign(Box::new(data.clone()))),
        )
    }

    fn visit_index(&mut self, value: &Expr, index: Option<&Expr>) -> Result<Value> {
        let Some(index) = index else {
            return self.misplaced(ExpressionKind::Index, "cannot use [] for reading");
        };
        let container = self.visit_expression(value)?;
        let key = self.evaluator.array_key(index, self.context)?;
        match &container {
            Value::Array(_) | Value::String(_) | Value::Object(_) | Value::Null => {
                Ok(element(&container, &key).unwrap_or_default())
            }
            other => Err(QueryError::type_mismatch(
                "array",
                other.type_name(),
                Some("index access".to_string()),
            )),
        }
    }

    fn visit_field(&mut self, value: &Expr, name: &Expr) -> Result<Value> {
        let container = self.visit_expression(value)?;
        let name = self.visit_expression(name)?;
        match container {
            Value::Object(object) => Ok(object.properties.get(&name).cloned().unwrap_or_default()),
            Value::Null => Ok(Value::Null),
            other => Err(QueryError::type_mismatch(
                "object",
                other.type_name(),
                Some(format!("property access ->{name}")),
            )),
        }
    }

    fn visit_method_call(&mut self, data: &MethodCallData) -> Result<Value> {
        self.not_constant(
            ExpressionKind::MethodCall,
            Arc::new(Expression::MethodCall(Box::new(data.clone()))),
        )
    }

    fn visit_static_method_call(&mut self, data: &StaticMethodCallData) -> Result<Value> {
        self.not_constant(
            ExpressionKind::StaticMethodCall,
            Arc::new(Expression::StaticMethodCall(Box::new(data.clone()))),
        )
    }

    fn visit_function_call(&mut self, data: &FunctionCallData) -> Result<Value> {
        let name = match data.name.as_value().and_then(Value::as_str) {
            Some(name) if self.evaluator.functions.contains(name) => name,
            _ => {
                return self.not_constant(
                    ExpressionKind::FunctionCall,
                    Arc::new(Expression::FunctionCall(Box::new(data.clone()))),
                );
            }
        };
        let args = self.values(&data.args)?;
        self.evaluator.functions.call(name, &args)
    }

    fn visit_new(&mut self, data: &NewData) -> Result<Value> {
        self.not_constant(ExpressionKind::New, Arc::new(Expression::New(Box::new(data.clone()))))
    }

    fn visit_array(&mut self, items: &[Expr]) -> Result<Value> {
        let mut map = OrderedMap::with_capacity(items.len());
        for item in items {
            match &**item {
                Expression::ArrayItem { key, value, .. } => {
                    let value = self.visit_expression(value)?;
                    match key {
                        Some(key) => {
                            map.insert(self.evaluator.array_key(key, self.context)?, value);
                        }
                        None => map.push(value),
                    }
                }
                other => {
                    return self
                        .misplaced(other.kind(), "array literal entries must be array items");
                }
            }
        }
        Ok(Value::array(map))
    }

    fn visit_array_item(
        &mut self,
        _key: Option<&Expr>,
        _value: &Expr,
        _by_ref: bool,
    ) -> Result<Value> {
        self.misplaced(ExpressionKind::ArrayItem, "array item outside an array literal")
    }

    fn visit_ternary(&mut self, data: &TernaryData) -> Result<Value> {
        let condition = self.visit_expression(&data.condition)?;
        if condition.is_truthy() {
            match &data.if_true {
                Some(if_true) => self.visit_expression(if_true),
                None => Ok(condition),
            }
        } else {
            self.visit_expression(&data.if_false)
        }
    }

    fn visit_closure(&mut self, data: &ClosureData) -> Result<Value> {
        self.not_constant(
            ExpressionKind::ClosureDef,
            Arc::new(Expression::ClosureDef(Box::new(data.clone()))),
        )
    }

    fn visit_return(&mut self, _value: Option<&Expr>) -> Result<Value> {
        self.misplaced(ExpressionKind::Return, "control construct is only valid as a statement")
    }

    fn visit_throw(&mut self, _exception: &Expr) -> Result<Value> {
        self.misplaced(ExpressionKind::Throw, "control construct is only valid as a statement")
    }

    fn visit_unset(&mut self, _values: &[Expr]) -> Result<Value> {
        self.misplaced(ExpressionKind::Unset, "control construct is only valid as a statement")
    }

    fn visit_isset(&mut self, values: &[Expr]) -> Result<Value> {
        for value in values {
            match self.evaluator.evaluate_quiet(value, self.context)? {
                Some(value) if !value.is_null() => continue,
                _ => return Ok(Value::Bool(false)),
            }
        }
        Ok(Value::Bool(true))
    }

    fn visit_constant(&mut self, name: &str) -> Result<Value> {
        constant(name).ok_or_else(|| QueryError::not_a_constant("ConstantRef", name))
    }

    fn visit_class_constant(&mut self, class: &Expr, name: &str) -> Result<Value> {
        let class = match class.as_value().and_then(Value::as_str) {
            Some(class) => class.to_string(),
            None => compile(class),
        };
        Err(QueryError::not_a_constant("ClassConstantRef", format!("{class}::{name}")))
    }
}

struct Simplifier<'a> {
    evaluator: &'a Evaluator,
    context: &'a EvaluationContext,
}

impl ExpressionWalker for Simplifier<'_> {
    type Error = Infallible;

    fn walk(&mut self, expr: &Expr) -> std::result::Result<Expr, Infallible> {
        match expr.kind() {
            ExpressionKind::Value
            | ExpressionKind::ClosureDef
            | ExpressionKind::Parameter
            | ExpressionKind::Return
            | ExpressionKind::Throw
            | ExpressionKind::Unset
            | ExpressionKind::Assign => return Ok(expr.clone()),
            _ => {}
        }
        if let Ok(value) = self.evaluator.evaluate(expr, self.context) {
            return Ok(Expression::value(value));
        }
        walk_children(self, expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &Expr, context: &EvaluationContext) -> Result<Value> {
        Evaluator::default().evaluate(expr, context)
    }

    #[test]
    fn test_variables_resolve_or_fail() {
        let context = EvaluationContext::new().with_variable("x", 4);
        let expr = Expression::binary(
            Expression::variable("x"),
            BinaryOperator::Power,
            Expression::value(2),
        );
        assert_eq!(eval(&expr, &context).unwrap(), Value::Int(16));
        assert_eq!(
            eval(&Expression::variable("y"), &context).unwrap_err(),
            QueryError::unbound_variable("y")
        );
    }

    #[test]
    fn test_calls_are_not_executed() {
        let call = Expression::method_call(Expression::value("x"), "foo", vec![]);
        let err = eval(&call, &EvaluationContext::new()).unwrap_err();
        assert_eq!(err, QueryError::not_a_constant("MethodCall", "'x'->foo()"));

        let new = Expression::new_instance("DateTime", vec![]);
        assert!(matches!(
            eval(&new, &EvaluationContext::new()),
            Err(QueryError::NotAConstantExpression { .. })
        ));
    }

    #[test]
    fn test_builtin_function_calls_run() {
        let call = Expression::function_call("strtoupper", vec![Expression::value("abc")]);
        assert_eq!(eval(&call, &EvaluationContext::new()).unwrap(), Value::from("ABC"));
    }

    #[test]
    fn test_array_literal_keys() {
        let expr = Expression::array(vec![
            Expression::array_item(None, Expression::value("a")),
            Expression::array_item(Some(Expression::value("5")), Expression::value("b")),
            Expression::array_item(None, Expression::value("c")),
        ]);
        let value = eval(&expr, &EvaluationContext::new()).unwrap();
        let map = value.as_array().unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![Value::Int(0), Value::Int(5), Value::Int(6)]);
    }

    #[test]
    fn test_null_coalesce_and_isset_are_quiet() {
        let context = EvaluationContext::new().with_variable("row", Value::list([Value::Int(1)]));
        let missing = Expression::index(Expression::variable("row"), Some(Expression::value(3)));
        let expr = Expression::binary(
            missing.clone(),
            BinaryOperator::NullCoalesce,
            Expression::value("none"),
        );
        assert_eq!(eval(&expr, &context).unwrap(), Value::from("none"));
        assert_eq!(
            eval(&Expression::isset(vec![missing]), &context).unwrap(),
            Value::Bool(false)
        );
        let unbound = Expression::binary(
            Expression::variable("nope"),
            BinaryOperator::NullCoalesce,
            Expression::value(1),
        );
        assert_eq!(eval(&unbound, &context).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_simplify_replaces_reducible_subtrees() {
        let evaluator = Evaluator::default();
        let context = EvaluationContext::new().with_variable("limit", 10);
        let expr = Expression::binary(
            Expression::method_call(Expression::variable("row"), "age", vec![]),
            BinaryOperator::GreaterThan,
            Expression::binary(
                Expression::variable("limit"),
                BinaryOperator::Add,
                Expression::value(1),
            ),
        );
        let simplified = evaluator.simplify(&expr, &context);
        assert_eq!(
            simplified,
            Expression::binary(
                Expression::method_call(Expression::variable("row"), "age", vec![]),
                BinaryOperator::GreaterThan,
                Expression::value(11),
            )
        );

        let constant = Expression::value(1);
        assert!(Arc::ptr_eq(&constant, &evaluator.simplify(&constant, &context)));
    }

    #[test]
    fn test_constant_value_requires_no_variables() {
        let evaluator = Evaluator::default();
        assert_eq!(
            evaluator.constant_value(&Expression::unary(
                UnaryOperator::Negate,
                Expression::value(3)
            )),
            Some(Value::Int(-3))
        );
        assert_eq!(evaluator.constant_value(&Expression::variable("x")), None);
        assert_eq!(
            evaluator.constant_value(&Expression::constant("PHP_INT_MAX")),
            Some(Value::Int(i64::MAX))
        );
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(Value::from("7")).unwrap(), Value::Int(7));
        assert_eq!(normalize_key(Value::from("07")).unwrap(), Value::from("07"));
        assert_eq!(normalize_key(Value::Float(2.9)).unwrap(), Value::Int(2));
        assert!(normalize_key(Value::list([])).is_err());
    }
}
