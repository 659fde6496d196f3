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

//! Visitor pattern for AST traversal

use rustc_hash::FxHashSet;

use super::expression::{
    AssignData, BinaryOpData, ClosureData, Expr, Expression, FunctionCallData, MethodCallData,
    NewData, ParameterData, StaticMethodCallData, TernaryData,
};
use super::operator::{CastType, UnaryOperator};
use crate::model::Value;

/// Trait for visiting AST nodes, one method per node kind
pub trait Visitor: Sized {
    /// The result type of visiting a node
    type Result;

    /// Visit an expression node
    fn visit_expression(&mut self, expr: &Expr) -> Self::Result {
        walk_expression(self, expr)
    }

    /// Visit a literal value
    fn visit_value(&mut self, value: &Value) -> Self::Result;

    /// Visit a variable reference
    fn visit_variable(&mut self, name: &Expr) -> Self::Result;

    /// Visit a parameter declaration
    fn visit_parameter(&mut self, data: &ParameterData) -> Self::Result;

    /// Visit a unary operation
    fn visit_unary_op(&mut self, op: UnaryOperator, operand: &Expr) -> Self::Result;

    /// Visit a binary operation
    fn visit_binary_op(&mut self, data: &BinaryOpData) -> Self::Result;

    /// Visit a cast
    fn visit_cast(&mut self, cast_type: CastType, value: &Expr) -> Self::Result;

    /// Visit an assignment
    fn visit_assign(&mut self, data: &AssignData) -> Self::Result;

    /// Visit an index access
    fn visit_index(&mut self, value: &Expr, index: Option<&Expr>) -> Self::Result;

    /// Visit a field access
    fn visit_field(&mut self, value: &Expr, name: &Expr) -> Self::Result;

    /// Visit a method call
    fn visit_method_call(&mut self, data: &MethodCallData) -> Self::Result;

    /// Visit a static method call
    fn visit_static_method_call(&mut self, data: &StaticMethodCallData) -> Self::Result;

    /// Visit a function call
    fn visit_function_call(&mut self, data: &FunctionCallData) -> Self::Result;

    /// Visit an object construction
    fn visit_new(&mut self, data: &NewData) -> Self::Result;

    /// Visit an array literal
    fn visit_array(&mut self, items: &[Expr]) -> Self::Result;

    /// Visit an array item
    fn visit_array_item(&mut self, key: Option<&Expr>, value: &Expr, by_ref: bool)
    -> Self::Result;

    /// Visit a conditional
    fn visit_ternary(&mut self, data: &TernaryData) -> Self::Result;

    /// Visit a closure definition
    fn visit_closure(&mut self, data: &ClosureData) -> Self::Result;

    /// Visit a return statement
    fn visit_return(&mut self, value: Option<&Expr>) -> Self::Result;

    /// Visit a throw statement
    fn visit_throw(&mut self, exception: &Expr) -> Self::Result;

    /// Visit an unset statement
    fn visit_unset(&mut self, values: &[Expr]) -> Self::Result;

    /// Visit an isset check
    fn visit_isset(&mut self, values: &[Expr]) -> Self::Result;

    /// Visit a constant reference
    fn visit_constant(&mut self, name: &str) -> Self::Result;

    /// Visit a class constant reference
    fn visit_class_constant(&mut self, class: &Expr, name: &str) -> Self::Result;
}

/// Default dispatch of an expression to its visit method
pub fn walk_expression<V: Visitor>(visitor: &mut V, expr: &Expr) -> V::Result {
    match &**expr {
        Expression::Value(value) => visitor.visit_value(value),
        Expression::Variable { name } => visitor.visit_variable(name),
        Expression::Parameter(data) => visitor.visit_parameter(data),
        Expression::UnaryOp { op, operand } => visitor.visit_unary_op(*op, operand),
        Expression::BinaryOp(data) => visitor.visit_binary_op(data),
        Expression::Cast { cast_type, value } => visitor.visit_cast(*cast_type, value),
        Expression::Assign(data) => visitor.visit_assign(data),
        Expression::Index { value, index } => visitor.visit_index(value, index.as_ref()),
        Expression::Field { value, name } => visitor.visit_field(value, name),
        Expression::MethodCall(data) => visitor.visit_method_call(data),
        Expression::StaticMethodCall(data) => visitor.visit_static_method_call(data),
        Expression::FunctionCall(data) => visitor.visit_function_call(data),
        Expression::New(data) => visitor.visit_new(data),
        Expression::ArrayLiteral { items } => visitor.visit_array(items),
        Expression::ArrayItem { key, value, by_ref } => {
            visitor.visit_array_item(key.as_ref(), value, *by_ref)
        }
        Expression::Ternary(data) => visitor.visit_ternary(data),
        Expression::ClosureDef(data) => visitor.visit_closure(data),
        Expression::Return { value } => visitor.visit_return(value.as_ref()),
        Expression::Throw { exception } => visitor.visit_throw(exception),
        Expression::Unset { values } => visitor.visit_unset(values),
        Expression::IssetCheck { values } => visitor.visit_isset(values),
        Expression::ConstantRef { name } => visitor.visit_constant(name),
        Expression::ClassConstantRef { class, name } => visitor.visit_class_constant(class, name),
    }
}

/// Transforming walker
///
/// The default `walk` rebuilds each node from its rewritten children, so a
/// walker that overrides nothing returns the input handle unchanged.
pub trait ExpressionWalker {
    /// Error raised while rewriting
    type Error;

    /// Rewrite an expression
    fn walk(&mut self, expr: &Expr) -> Result<Expr, Self::Error> {
        walk_children(self, expr)
    }
}

/// Rewrite every child of `expr` with `walker`
pub fn walk_children<W: ExpressionWalker + ?Sized>(
    walker: &mut W,
    expr: &Expr,
) -> Result<Expr, W::Error> {
    Expression::try_map_children(expr, |child| walker.walk(child))
}

/// Names of variables referenced with a literal name anywhere in `expr`
///
/// Closure parameters and variables assigned by a closure's own statements
/// belong to the closure frame and are not reported.
pub fn free_variables(expr: &Expr) -> FxHashSet<String> {
    let mut found = FxHashSet::default();
    collect_free_variables(expr, &FxHashSet::default(), &mut found);
    found
}

fn collect_free_variables(
    expr: &Expr,
    bound: &FxHashSet<String>,
    found: &mut FxHashSet<String>,
) {
    match &**expr {
        Expression::Variable { .. } => {
            if let Some(name) = expr.as_variable_name() {
                if !bound.contains(name) {
                    found.insert(name.to_string());
                }
            }
        }
        Expression::ClosureDef(data) => {
            let mut inner = bound.clone();
            inner.extend(data.parameter_names().into_iter().map(str::to_string));
            for used in &data.used_variables {
                if !bound.contains(&used.name) {
                    found.insert(used.name.clone());
                }
                inner.insert(used.name.clone());
            }
            for statement in &data.body {
                if let Expression::Assign(assign) = &**statement {
                    if let Some(local) = assign.target.as_variable_name() {
                        inner.insert(local.to_string());
                    }
                }
            }
            for parameter in &data.parameters {
                collect_free_variables(parameter, &inner, found);
            }
            // Without scope capture the body cannot reach outer variables.
            let mut body_found = FxHashSet::default();
            let target = if data.captures_scope { &mut *found } else { &mut body_found };
            for statement in &data.body {
                collect_free_variables(statement, &inner, target);
            }
        }
        _ => {
            for child in expr.children() {
                collect_free_variables(child, bound, found);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::operator::BinaryOperator;
    use crate::ast::UsedVariable;
    use std::convert::Infallible;
    use std::sync::Arc;

    struct NodeCounter;

    impl Visitor for NodeCounter {
        type Result = usize;

        fn visit_value(&mut self, _value: &Value) -> usize {
            1
        }
        fn visit_variable(&mut self, name: &Expr) -> usize {
            1 + self.visit_expression(name)
        }
        fn visit_parameter(&mut self, _data: &ParameterData) -> usize {
            1
        }
        fn visit_unary_op(&mut self, _op: UnaryOperator, operand: &Expr) -> usize {
            1 + self.visit_expression(operand)
        }
        fn visit_binary_op(&mut self, data: &BinaryOpData) -> usize {
            1 + self.visit_expression(&data.left) + self.visit_expression(&data.right)
        }
        fn visit_cast(&mut self, _cast_type: CastType, value: &Expr) -> usize {
            1 + self.visit_expression(value)
        }
        fn visit_assign(&mut self, data: &AssignData) -> usize {
            1 + self.visit_expression(&data.target) + self.visit_expression(&data.value)
        }
        fn visit_index(&mut self, value: &Expr, index: Option<&Expr>) -> usize {
            1 + self.visit_expression(value) + index.map_or(0, |i| self.visit_expression(i))
        }
        fn visit_field(&mut self, value: &Expr, name: &Expr) -> usize {
            1 + self.visit_expression(value) + self.visit_expression(name)
        }
        fn visit_method_call(&mut self, _data: &MethodCallData) -> usize {
            1
        }
        fn visit_static_method_call(&mut self, _data: &StaticMethodCallData) -> usize {
            1
        }
        fn visit_function_call(&mut self, _data: &FunctionCallData) -> usize {
            1
        }
        fn visit_new(&mut self, _data: &NewData) -> usize {
            1
        }
        fn visit_array(&mut self, items: &[Expr]) -> usize {
            1 + items.iter().map(|i| self.visit_expression(i)).sum::<usize>()
        }
        fn visit_array_item(&mut self, _key: Option<&Expr>, value: &Expr, _by_ref: bool) -> usize {
            1 + self.visit_expression(value)
        }
        fn visit_ternary(&mut self, _data: &TernaryData) -> usize {
            1
        }
        fn visit_closure(&mut self, data: &ClosureData) -> usize {
            1 + data.body.iter().map(|s| self.visit_expression(s)).sum::<usize>()
        }
        fn visit_return(&mut self, value: Option<&Expr>) -> usize {
            1 + value.map_or(0, |v| self.visit_expression(v))
        }
        fn visit_throw(&mut self, _exception: &Expr) -> usize {
            1
        }
        fn visit_unset(&mut self, _values: &[Expr]) -> usize {
            1
        }
        fn visit_isset(&mut self, _values: &[Expr]) -> usize {
            1
        }
        fn visit_constant(&mut self, _name: &str) -> usize {
            1
        }
        fn visit_class_constant(&mut self, _class: &Expr, _name: &str) -> usize {
            1
        }
    }

    #[test]
    fn test_visitor_dispatch() {
        // $x + 1 => Binary, Variable, name Value, Value
        let expr = Expression::binary(
            Expression::variable("x"),
            BinaryOperator::Add,
            Expression::value(1),
        );
        assert_eq!(NodeCounter.visit_expression(&expr), 4);
    }

    struct Identity;

    impl ExpressionWalker for Identity {
        type Error = Infallible;
    }

    struct ReplaceOnes;

    impl ExpressionWalker for ReplaceOnes {
        type Error = Infallible;

        fn walk(&mut self, expr: &Expr) -> Result<Expr, Infallible> {
            if expr.as_value() == Some(&Value::Int(1)) {
                return Ok(Expression::value(100));
            }
            walk_children(self, expr)
        }
    }

    #[test]
    fn test_default_walker_preserves_identity() {
        let expr = Expression::arrow(
            &["x"],
            Expression::binary(
                Expression::variable("x"),
                BinaryOperator::Add,
                Expression::value(1),
            ),
        );
        let walked = Identity.walk(&expr).unwrap();
        assert!(Arc::ptr_eq(&expr, &walked));

        let rewritten = ReplaceOnes.walk(&expr).unwrap();
        assert!(!Arc::ptr_eq(&expr, &rewritten));
        assert_ne!(expr, rewritten);
    }

    #[test]
    fn test_free_variables_skip_closure_parameters() {
        let expr = Expression::arrow(
            &["row"],
            Expression::binary(
                Expression::index(Expression::variable("row"), Some(Expression::value("age"))),
                BinaryOperator::GreaterThan,
                Expression::variable("minimum"),
            ),
        );
        let names = free_variables(&expr);
        assert!(names.contains("minimum"));
        assert!(!names.contains("row"));
    }

    #[test]
    fn test_free_variables_of_long_closure_come_from_use() {
        let expr = Expression::closure_with(ClosureData {
            returns_ref: false,
            is_static: false,
            parameters: vec![],
            used_variables: vec![UsedVariable {
                name: "limit".into(),
                by_ref: false,
            }],
            captures_scope: false,
            body: vec![Expression::return_value(Some(Expression::variable("hidden")))],
        });
        let names = free_variables(&expr);
        assert!(names.contains("limit"));
        assert!(!names.contains("hidden"));
    }
}
