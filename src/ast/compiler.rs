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

//! Expression compiler producing canonical host source text
//!
//! Output is deterministic and used for diagnostics and cache-key fragments.
//! Nested operations are emitted exactly as nested: no parentheses are
//! reinserted for precedence, so `(a + b) * c` built as a tree compiles to
//! `a + b * c`.

use super::expression::{
    AssignData, BinaryOpData, ClosureData, Expr, Expression, FunctionCallData, MethodCallData,
    NewData, ParameterData, StaticMethodCallData, TernaryData,
};
use super::operator::{CastType, UnaryOperator};
use super::visitor::Visitor;
use crate::model::Value;

/// Compile an expression to source text
pub fn compile(expr: &Expr) -> String {
    ExpressionCompiler.visit_expression(expr)
}

/// Visitor that renders expressions as host source text
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionCompiler;

impl ExpressionCompiler {
    fn args(&mut self, args: &[Expr]) -> String {
        self.join(args, ", ")
    }

    fn join(&mut self, exprs: &[Expr], separator: &str) -> String {
        exprs
            .iter()
            .map(|expr| self.visit_expression(expr))
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Render a member name: bare when a valid identifier, braced otherwise
    fn member(&mut self, name: &Expr) -> String {
        match name.as_value().and_then(Value::as_str) {
            Some(identifier) if is_identifier(identifier) => identifier.to_string(),
            _ => format!("{{{}}}", self.visit_expression(name)),
        }
    }

    /// Render a class reference: bare name for string literals
    fn class(&mut self, class: &Expr) -> String {
        match class.as_value().and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => self.visit_expression(class),
        }
    }

    fn statement(&mut self, statement: &Expr) -> String {
        format!("{};", self.visit_expression(statement))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

impl Visitor for ExpressionCompiler {
    type Result = String;

    fn visit_value(&mut self, value: &Value) -> String {
        value.describe()
    }

    fn visit_variable(&mut self, name: &Expr) -> String {
        match name.as_value().and_then(Value::as_str) {
            Some(identifier) if is_identifier(identifier) => format!("${identifier}"),
            _ => format!("${{{}}}", self.visit_expression(name)),
        }
    }

    fn visit_parameter(&mut self, data: &ParameterData) -> String {
        let mut out = String::new();
        if let Some(type_hint) = &data.type_hint {
            out.push_str(type_hint);
            out.push(' ');
        }
        if data.by_ref {
            out.push('&');
        }
        if data.variadic {
            out.push_str("...");
        }
        out.push('$');
        out.push_str(&data.name);
        if let Some(default) = &data.default {
            out.push_str(" = ");
            out.push_str(&self.visit_expression(default));
        }
        out
    }

    fn visit_unary_op(&mut self, op: UnaryOperator, operand: &Expr) -> String {
        format!("{op}{}", self.visit_expression(operand))
    }

    fn visit_binary_op(&mut self, data: &BinaryOpData) -> String {
        format!(
            "{} {} {}",
            self.visit_expression(&data.left),
            data.op,
            self.visit_expression(&data.right)
        )
    }

    fn visit_cast(&mut self, cast_type: CastType, value: &Expr) -> String {
        format!("{cast_type}{}", self.visit_expression(value))
    }

    fn visit_assign(&mut self, data: &AssignData) -> String {
        format!(
            "{} {} {}",
            self.visit_expression(&data.target),
            data.op,
            self.visit_expression(&data.value)
        )
    }

    fn visit_index(&mut self, value: &Expr, index: Option<&Expr>) -> String {
        let index = index.map(|i| self.visit_expression(i)).unwrap_or_default();
        format!("{}[{index}]", self.visit_expression(value))
    }

    fn visit_field(&mut self, value: &Expr, name: &Expr) -> String {
        format!("{}->{}", self.visit_expression(value), self.member(name))
    }

    fn visit_method_call(&mut self, data: &MethodCallData) -> String {
        format!(
            "{}->{}({})",
            self.visit_expression(&data.value),
            self.member(&data.name),
            self.args(&data.args)
        )
    }

    fn visit_static_method_call(&mut self, data: &StaticMethodCallData) -> String {
        format!(
            "{}::{}({})",
            self.class(&data.class),
            self.member(&data.name),
            self.args(&data.args)
        )
    }

    fn visit_function_call(&mut self, data: &FunctionCallData) -> String {
        format!("{}({})", self.class(&data.name), self.args(&data.args))
    }

    fn visit_new(&mut self, data: &NewData) -> String {
        format!("new {}({})", self.class(&data.class), self.args(&data.args))
    }

    fn visit_array(&mut self, items: &[Expr]) -> String {
        format!("[{}]", self.join(items, ", "))
    }

    fn visit_array_item(&mut self, key: Option<&Expr>, value: &Expr, by_ref: bool) -> String {
        let mut out = String::new();
        if let Some(key) = key {
            out.push_str(&self.visit_expression(key));
            out.push_str(" => ");
        }
        if by_ref {
            out.push('&');
        }
        out.push_str(&self.visit_expression(value));
        out
    }

    fn visit_ternary(&mut self, data: &TernaryData) -> String {
        let condition = self.visit_expression(&data.condition);
        let if_false = self.visit_expression(&data.if_false);
        match &data.if_true {
            Some(if_true) => {
                format!("{condition} ? {} : {if_false}", self.visit_expression(if_true))
            }
            None => format!("{condition} ?: {if_false}"),
        }
    }

    fn visit_closure(&mut self, data: &ClosureData) -> String {
        let mut out = String::new();
        if data.is_static {
            out.push_str("static ");
        }
        out.push_str("function ");
        if data.returns_ref {
            out.push('&');
        }
        out.push('(');
        out.push_str(&self.args(&data.parameters));
        out.push(')');

        if !data.used_variables.is_empty() {
            let used = data
                .used_variables
                .iter()
                .map(|used| format!("{}${}", if used.by_ref { "&" } else { "" }, used.name))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(" use ({used})"));
        }

        if data.body.is_empty() {
            out.push_str(" {}");
        } else {
            let body = data
                .body
                .iter()
                .map(|statement| self.statement(statement))
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&format!(" {{ {body} }}"));
        }
        out
    }

    fn visit_return(&mut self, value: Option<&Expr>) -> String {
        match value {
            Some(value) => format!("return {}", self.visit_expression(value)),
            None => "return".to_string(),
        }
    }

    fn visit_throw(&mut self, exception: &Expr) -> String {
        format!("throw {}", self.visit_expression(exception))
    }

    fn visit_unset(&mut self, values: &[Expr]) -> String {
        format!("unset({})", self.args(values))
    }

    fn visit_isset(&mut self, values: &[Expr]) -> String {
        format!("isset({})", self.args(values))
    }

    fn visit_constant(&mut self, name: &str) -> String {
        name.to_string()
    }

    fn visit_class_constant(&mut self, class: &Expr, name: &str) -> String {
        format!("{}::{name}", self.class(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::operator::{AssignOperator, BinaryOperator};

    #[test]
    fn test_compile_closure() {
        let expr = Expression::arrow(
            &["row"],
            Expression::binary(
                Expression::index(Expression::variable("row"), Some(Expression::value("age"))),
                BinaryOperator::GreaterThanOrEqual,
                Expression::value(18),
            ),
        );
        assert_eq!(compile(&expr), "function ($row) { return $row['age'] >= 18; }");
        assert_eq!(compile(&Expression::closure(&[], vec![])), "function () {}");
    }

    #[test]
    fn test_compile_calls_and_members() {
        let expr = Expression::method_call(
            Expression::variable("this"),
            "where",
            vec![Expression::static_method_call("Str", "lower", vec![Expression::value("A")])],
        );
        assert_eq!(compile(&expr), "$this->where(Str::lower('A'))");

        let field = Expression::field(Expression::variable("o"), "first name");
        assert_eq!(compile(&field), "$o->{'first name'}");
        assert_eq!(compile(&Expression::variable("var bar")), "${'var bar'}");
        assert_eq!(compile(&Expression::new_instance("Foo", vec![])), "new Foo()");
        assert_eq!(compile(&Expression::class_constant("Foo", "BAR")), "Foo::BAR");
    }

    #[test]
    fn test_compile_does_not_reinsert_parentheses() {
        let sum = Expression::binary(
            Expression::variable("a"),
            BinaryOperator::Add,
            Expression::variable("b"),
        );
        let product = Expression::binary(sum, BinaryOperator::Multiply, Expression::variable("c"));
        assert_eq!(compile(&product), "$a + $b * $c");
    }

    #[test]
    fn test_compile_statements() {
        let expr = Expression::closure(
            &["x"],
            vec![
                Expression::assign(
                    Expression::variable("y"),
                    AssignOperator::Concat,
                    Expression::value("!"),
                ),
                Expression::unset(vec![Expression::variable("x")]),
                Expression::ternary(Expression::variable("y"), None, Expression::value(0.5)),
            ],
        );
        assert_eq!(
            compile(&expr),
            "function ($x) { $y .= '!'; unset($x); $y ?: 0.5; }"
        );
    }
}
