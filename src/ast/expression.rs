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

//! Expression AST node definitions
//!
//! Nodes are immutable and shared through [`Expr`] handles. Rebuilding a node
//! compares child handles by identity, so a walk that changes nothing hands
//! back the very same handle.

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::convert::Infallible;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::operator::{AssignOperator, BinaryOperator, CastType, UnaryOperator};
use crate::error::{QueryError, Result};
use crate::model::Value;

/// Shared handle to an immutable expression node
pub type Expr = Arc<Expression>;

/// Call argument list (SmallVec for the common case of up to 4 arguments)
pub type Args = SmallVec<[Expr; 4]>;

/// AST representation of a host expression
///
/// Large variants are boxed to keep the enum small.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    /// Literal value
    Value(Value),

    /// Variable reference; the name is itself an expression (`${'a b'}`)
    Variable {
        /// Variable name
        name: Expr,
    },

    /// Closure or function parameter declaration
    Parameter(Box<ParameterData>),

    /// Unary operation
    UnaryOp {
        /// The operator
        op: UnaryOperator,
        /// The operand
        operand: Expr,
    },

    /// Binary operation
    BinaryOp(Box<BinaryOpData>),

    /// Type cast
    Cast {
        /// Cast target
        cast_type: CastType,
        /// Expression being cast
        value: Expr,
    },

    /// Assignment (plain or compound)
    Assign(Box<AssignData>),

    /// Index access (`$a[i]`, or `$a[]` without an index)
    Index {
        /// Indexed expression
        value: Expr,
        /// Index expression
        index: Option<Expr>,
    },

    /// Field access (`$a->name`)
    Field {
        /// Object expression
        value: Expr,
        /// Field name
        name: Expr,
    },

    /// Method call (`$a->name(args)`)
    MethodCall(Box<MethodCallData>),

    /// Static method call (`Class::name(args)`)
    StaticMethodCall(Box<StaticMethodCallData>),

    /// Function call (`name(args)`)
    FunctionCall(Box<FunctionCallData>),

    /// Object construction (`new Class(args)`)
    New(Box<NewData>),

    /// Array literal; items are [`Expression::ArrayItem`] nodes
    ArrayLiteral {
        /// Array items
        items: Vec<Expr>,
    },

    /// Item of an array literal
    ArrayItem {
        /// Explicit key
        key: Option<Expr>,
        /// Item value
        value: Expr,
        /// Whether the value is taken by reference
        by_ref: bool,
    },

    /// Conditional expression (`c ? a : b`, or `c ?: b`)
    Ternary(Box<TernaryData>),

    /// Closure definition
    ClosureDef(Box<ClosureData>),

    /// Return statement
    Return {
        /// Returned value
        value: Option<Expr>,
    },

    /// Throw statement
    Throw {
        /// Thrown value
        exception: Expr,
    },

    /// Unset statement
    Unset {
        /// Unset targets
        values: Vec<Expr>,
    },

    /// Isset check
    IssetCheck {
        /// Checked expressions
        values: Vec<Expr>,
    },

    /// Global constant reference
    ConstantRef {
        /// Constant name
        name: String,
    },

    /// Class constant reference (`Class::NAME`)
    ClassConstantRef {
        /// Class expression
        class: Expr,
        /// Constant name
        name: String,
    },
}

/// Fast expression kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExpressionKind {
    /// Literal value
    Value = 0,
    /// Variable reference
    Variable = 1,
    /// Parameter declaration
    Parameter = 2,
    /// Unary operation
    UnaryOp = 3,
    /// Binary operation
    BinaryOp = 4,
    /// Type cast
    Cast = 5,
    /// Assignment
    Assign = 6,
    /// Index access
    Index = 7,
    /// Field access
    Field = 8,
    /// Method call
    MethodCall = 9,
    /// Static method call
    StaticMethodCall = 10,
    /// Function call
    FunctionCall = 11,
    /// Object construction
    New = 12,
    /// Array literal
    ArrayLiteral = 13,
    /// Array item
    ArrayItem = 14,
    /// Conditional
    Ternary = 15,
    /// Closure definition
    ClosureDef = 16,
    /// Return statement
    Return = 17,
    /// Throw statement
    Throw = 18,
    /// Unset statement
    Unset = 19,
    /// Isset check
    IssetCheck = 20,
    /// Constant reference
    ConstantRef = 21,
    /// Class constant reference
    ClassConstantRef = 22,
}

impl ExpressionKind {
    /// Name of the kind used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Value => "Value",
            Self::Variable => "Variable",
            Self::Parameter => "Parameter",
            Self::UnaryOp => "UnaryOp",
            Self::BinaryOp => "BinaryOp",
            Self::Cast => "Cast",
            Self::Assign => "Assign",
            Self::Index => "Index",
            Self::Field => "Field",
            Self::MethodCall => "MethodCall",
            Self::StaticMethodCall => "StaticMethodCall",
            Self::FunctionCall => "FunctionCall",
            Self::New => "New",
            Self::ArrayLiteral => "ArrayLiteral",
            Self::ArrayItem => "ArrayItem",
            Self::Ternary => "Ternary",
            Self::ClosureDef => "ClosureDef",
            Self::Return => "Return",
            Self::Throw => "Throw",
            Self::Unset => "Unset",
            Self::IssetCheck => "IssetCheck",
            Self::ConstantRef => "ConstantRef",
            Self::ClassConstantRef => "ClassConstantRef",
        }
    }

    /// Statement-only constructs that cannot appear where a value is required
    pub fn is_control(self) -> bool {
        matches!(self, Self::Return | Self::Throw | Self::Unset)
    }
}

/// Parameter declaration data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterData {
    /// Parameter name (without sigil)
    pub name: String,
    /// Declared type
    pub type_hint: Option<String>,
    /// Default value expression
    pub default: Option<Expr>,
    /// Passed by reference
    pub by_ref: bool,
    /// Collects remaining arguments
    pub variadic: bool,
}

/// Binary operation data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryOpData {
    /// Left operand
    pub left: Expr,
    /// The operator
    pub op: BinaryOperator,
    /// Right operand
    pub right: Expr,
}

/// Assignment data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignData {
    /// Assignment target
    pub target: Expr,
    /// The operator
    pub op: AssignOperator,
    /// Assigned value
    pub value: Expr,
}

/// Method call data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodCallData {
    /// Receiver
    pub value: Expr,
    /// Method name
    pub name: Expr,
    /// Arguments
    pub args: Args,
}

/// Static method call data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticMethodCallData {
    /// Class expression
    pub class: Expr,
    /// Method name
    pub name: Expr,
    /// Arguments
    pub args: Args,
}

/// Function call data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCallData {
    /// Function name
    pub name: Expr,
    /// Arguments
    pub args: Args,
}

/// Object construction data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewData {
    /// Class expression
    pub class: Expr,
    /// Constructor arguments
    pub args: Args,
}

/// Conditional expression data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TernaryData {
    /// Condition
    pub condition: Expr,
    /// Value when true; absent for the short form `c ?: b`
    pub if_true: Option<Expr>,
    /// Value when false
    pub if_false: Expr,
}

/// Variable captured by a closure's `use` clause
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsedVariable {
    /// Variable name
    pub name: String,
    /// Captured by reference
    pub by_ref: bool,
}

/// Closure definition data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureData {
    /// Returns by reference
    pub returns_ref: bool,
    /// Declared static (no bound `$this`)
    pub is_static: bool,
    /// Parameter declarations ([`Expression::Parameter`] nodes)
    pub parameters: Vec<Expr>,
    /// Variables captured from the defining scope
    pub used_variables: Vec<UsedVariable>,
    /// Sees the whole defining scope, as an arrow function does
    #[serde(default)]
    pub captures_scope: bool,
    /// Body statements
    pub body: Vec<Expr>,
}

impl ClosureData {
    /// Parameter names in declaration order
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter_map(|parameter| match &**parameter {
                Expression::Parameter(data) => Some(data.name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Expression {
    /// Create a literal expression
    pub fn value(value: impl Into<Value>) -> Expr {
        Arc::new(Self::Value(value.into()))
    }

    /// Create a variable reference with a literal name
    pub fn variable(name: impl AsRef<str>) -> Expr {
        Self::variable_named(Self::value(name.as_ref()))
    }

    /// Create a variable reference with a computed name
    pub fn variable_named(name: Expr) -> Expr {
        Arc::new(Self::Variable { name })
    }

    /// Create a plain parameter declaration
    pub fn parameter(name: impl Into<String>) -> Expr {
        Self::parameter_with(ParameterData {
            name: name.into(),
            type_hint: None,
            default: None,
            by_ref: false,
            variadic: false,
        })
    }

    /// Create a parameter declaration from its parts
    pub fn parameter_with(data: ParameterData) -> Expr {
        Arc::new(Self::Parameter(Box::new(data)))
    }

    /// Create a unary operation
    pub fn unary(op: UnaryOperator, operand: Expr) -> Expr {
        Arc::new(Self::UnaryOp { op, operand })
    }

    /// Create a binary operation
    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        Arc::new(Self::BinaryOp(Box::new(BinaryOpData { left, op, right })))
    }

    /// Create a cast
    pub fn cast(cast_type: CastType, value: Expr) -> Expr {
        Arc::new(Self::Cast { cast_type, value })
    }

    /// Create an assignment
    pub fn assign(target: Expr, op: AssignOperator, value: Expr) -> Expr {
        Arc::new(Self::Assign(Box::new(AssignData { target, op, value })))
    }

    /// Create an index access
    pub fn index(value: Expr, index: Option<Expr>) -> Expr {
        Arc::new(Self::Index { value, index })
    }

    /// Create a field access with a literal name
    pub fn field(value: Expr, name: impl AsRef<str>) -> Expr {
        Arc::new(Self::Field {
            value,
            name: Self::value(name.as_ref()),
        })
    }

    /// Create a method call with a literal name
    pub fn method_call(value: Expr, name: impl AsRef<str>, args: impl Into<Args>) -> Expr {
        Self::method_call_named(value, Self::value(name.as_ref()), args)
    }

    /// Create a method call with a computed name
    pub fn method_call_named(value: Expr, name: Expr, args: impl Into<Args>) -> Expr {
        Arc::new(Self::MethodCall(Box::new(MethodCallData {
            value,
            name,
            args: args.into(),
        })))
    }

    /// Create a static method call with literal class and method names
    pub fn static_method_call(
        class: impl AsRef<str>,
        name: impl AsRef<str>,
        args: impl Into<Args>,
    ) -> Expr {
        Arc::new(Self::StaticMethodCall(Box::new(StaticMethodCallData {
            class: Self::value(class.as_ref()),
            name: Self::value(name.as_ref()),
            args: args.into(),
        })))
    }

    /// Create a function call with a literal name
    pub fn function_call(name: impl AsRef<str>, args: impl Into<Args>) -> Expr {
        Arc::new(Self::FunctionCall(Box::new(FunctionCallData {
            name: Self::value(name.as_ref()),
            args: args.into(),
        })))
    }

    /// Create an object construction with a literal class name
    pub fn new_instance(class: impl AsRef<str>, args: impl Into<Args>) -> Expr {
        Arc::new(Self::New(Box::new(NewData {
            class: Self::value(class.as_ref()),
            args: args.into(),
        })))
    }

    /// Create an array literal from items
    pub fn array(items: Vec<Expr>) -> Expr {
        Arc::new(Self::ArrayLiteral { items })
    }

    /// Create an array literal of unkeyed values
    pub fn list(values: impl IntoIterator<Item = Expr>) -> Expr {
        Self::array(
            values
                .into_iter()
                .map(|value| Self::array_item(None, value))
                .collect(),
        )
    }

    /// Create an array item
    pub fn array_item(key: Option<Expr>, value: Expr) -> Expr {
        Arc::new(Self::ArrayItem {
            key,
            value,
            by_ref: false,
        })
    }

    /// Create a conditional
    pub fn ternary(condition: Expr, if_true: Option<Expr>, if_false: Expr) -> Expr {
        Arc::new(Self::Ternary(Box::new(TernaryData {
            condition,
            if_true,
            if_false,
        })))
    }

    /// Create a closure taking the named parameters and running `body`
    pub fn closure(parameters: &[&str], body: Vec<Expr>) -> Expr {
        Self::closure_with(ClosureData {
            returns_ref: false,
            is_static: false,
            parameters: parameters.iter().map(|name| Self::parameter(*name)).collect(),
            used_variables: Vec::new(),
            captures_scope: false,
            body,
        })
    }

    /// Create an arrow closure returning `result`; it sees the defining scope
    pub fn arrow(parameters: &[&str], result: Expr) -> Expr {
        Self::closure_with(ClosureData {
            returns_ref: false,
            is_static: false,
            parameters: parameters.iter().map(|name| Self::parameter(*name)).collect(),
            used_variables: Vec::new(),
            captures_scope: true,
            body: vec![Self::return_value(Some(result))],
        })
    }

    /// Create a closure definition from its parts
    pub fn closure_with(data: ClosureData) -> Expr {
        Arc::new(Self::ClosureDef(Box::new(data)))
    }

    /// Create a return statement
    pub fn return_value(value: Option<Expr>) -> Expr {
        Arc::new(Self::Return { value })
    }

    /// Create a throw statement
    pub fn throw(exception: Expr) -> Expr {
        Arc::new(Self::Throw { exception })
    }

    /// Create an unset statement
    pub fn unset(values: Vec<Expr>) -> Expr {
        Arc::new(Self::Unset { values })
    }

    /// Create an isset check
    pub fn isset(values: Vec<Expr>) -> Expr {
        Arc::new(Self::IssetCheck { values })
    }

    /// Create a constant reference
    pub fn constant(name: impl Into<String>) -> Expr {
        Arc::new(Self::ConstantRef { name: name.into() })
    }

    /// Create a class constant reference with a literal class name
    pub fn class_constant(class: impl AsRef<str>, name: impl Into<String>) -> Expr {
        Arc::new(Self::ClassConstantRef {
            class: Self::value(class.as_ref()),
            name: name.into(),
        })
    }

    /// Kind of this node
    #[inline]
    pub fn kind(&self) -> ExpressionKind {
        match self {
            Self::Value(_) => ExpressionKind::Value,
            Self::Variable { .. } => ExpressionKind::Variable,
            Self::Parameter(_) => ExpressionKind::Parameter,
            Self::UnaryOp { .. } => ExpressionKind::UnaryOp,
            Self::BinaryOp(_) => ExpressionKind::BinaryOp,
            Self::Cast { .. } => ExpressionKind::Cast,
            Self::Assign(_) => ExpressionKind::Assign,
            Self::Index { .. } => ExpressionKind::Index,
            Self::Field { .. } => ExpressionKind::Field,
            Self::MethodCall(_) => ExpressionKind::MethodCall,
            Self::StaticMethodCall(_) => ExpressionKind::StaticMethodCall,
            Self::FunctionCall(_) => ExpressionKind::FunctionCall,
            Self::New(_) => ExpressionKind::New,
            Self::ArrayLiteral { .. } => ExpressionKind::ArrayLiteral,
            Self::ArrayItem { .. } => ExpressionKind::ArrayItem,
            Self::Ternary(_) => ExpressionKind::Ternary,
            Self::ClosureDef(_) => ExpressionKind::ClosureDef,
            Self::Return { .. } => ExpressionKind::Return,
            Self::Throw { .. } => ExpressionKind::Throw,
            Self::Unset { .. } => ExpressionKind::Unset,
            Self::IssetCheck { .. } => ExpressionKind::IssetCheck,
            Self::ConstantRef { .. } => ExpressionKind::ConstantRef,
            Self::ClassConstantRef { .. } => ExpressionKind::ClassConstantRef,
        }
    }

    /// Get the literal value if this is a value expression
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Get the literal name if this is a variable with a constant string name
    pub fn as_variable_name(&self) -> Option<&str> {
        match self {
            Self::Variable { name } => name.as_value().and_then(Value::as_str),
            _ => None,
        }
    }

    /// Child expressions in a fixed order
    ///
    /// The order is the one [`Expression::update`] expects.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Value(_) | Self::ConstantRef { .. } => Vec::new(),
            Self::Variable { name } => vec![name],
            Self::Parameter(data) => data.default.iter().collect(),
            Self::UnaryOp { operand, .. } => vec![operand],
            Self::BinaryOp(data) => vec![&data.left, &data.right],
            Self::Cast { value, .. } => vec![value],
            Self::Assign(data) => vec![&data.target, &data.value],
            Self::Index { value, index } => std::iter::once(value).chain(index).collect(),
            Self::Field { value, name } => vec![value, name],
            Self::MethodCall(data) => [&data.value, &data.name]
                .into_iter()
                .chain(data.args.iter())
                .collect(),
            Self::StaticMethodCall(data) => [&data.class, &data.name]
                .into_iter()
                .chain(data.args.iter())
                .collect(),
            Self::FunctionCall(data) => std::iter::once(&data.name)
                .chain(data.args.iter())
                .collect(),
            Self::New(data) => std::iter::once(&data.class)
                .chain(data.args.iter())
                .collect(),
            Self::ArrayLiteral { items } => items.iter().collect(),
            Self::ArrayItem { key, value, .. } => {
                key.iter().chain(std::iter::once(value)).collect()
            }
            Self::Ternary(data) => std::iter::once(&data.condition)
                .chain(data.if_true.iter())
                .chain(std::iter::once(&data.if_false))
                .collect(),
            Self::ClosureDef(data) => data.parameters.iter().chain(data.body.iter()).collect(),
            Self::Return { value } => value.iter().collect(),
            Self::Throw { exception } => vec![exception],
            Self::Unset { values } | Self::IssetCheck { values } => values.iter().collect(),
            Self::ClassConstantRef { class, .. } => vec![class],
        }
    }

    /// Rebuild `node` with each child replaced by `f(child)`
    ///
    /// Returns `node` itself (same handle) when every replacement is
    /// identical to the child it replaces.
    pub fn try_map_children<E>(
        node: &Expr,
        mut f: impl FnMut(&Expr) -> std::result::Result<Expr, E>,
    ) -> std::result::Result<Expr, E> {
        let mut changed = false;
        let mut child = |expr: &Expr| -> std::result::Result<Expr, E> {
            let mapped = f(expr)?;
            if !Arc::ptr_eq(&mapped, expr) {
                changed = true;
            }
            Ok(mapped)
        };

        let rebuilt = match &**node {
            Self::Value(_) | Self::ConstantRef { .. } => return Ok(node.clone()),
            Self::Variable { name } => Self::Variable { name: child(name)? },
            Self::Parameter(data) => Self::Parameter(Box::new(ParameterData {
                default: data.default.as_ref().map(&mut child).transpose()?,
                ..(**data).clone()
            })),
            Self::UnaryOp { op, operand } => Self::UnaryOp {
                op: *op,
                operand: child(operand)?,
            },
            Self::BinaryOp(data) => Self::BinaryOp(Box::new(BinaryOpData {
                left: child(&data.left)?,
                op: data.op,
                right: child(&data.right)?,
            })),
            Self::Cast { cast_type, value } => Self::Cast {
                cast_type: *cast_type,
                value: child(value)?,
            },
            Self::Assign(data) => Self::Assign(Box::new(AssignData {
                target: child(&data.target)?,
                op: data.op,
                value: child(&data.value)?,
            })),
            Self::Index { value, index } => Self::Index {
                value: child(value)?,
                index: index.as_ref().map(&mut child).transpose()?,
            },
            Self::Field { value, name } => Self::Field {
                value: child(value)?,
                name: child(name)?,
            },
            Self::MethodCall(data) => Self::MethodCall(Box::new(MethodCallData {
                value: child(&data.value)?,
                name: child(&data.name)?,
                args: data.args.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            })),
            Self::StaticMethodCall(data) => {
                Self::StaticMethodCall(Box::new(StaticMethodCallData {
                    class: child(&data.class)?,
                    name: child(&data.name)?,
                    args: data.args.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
                }))
            }
            Self::FunctionCall(data) => Self::FunctionCall(Box::new(FunctionCallData {
                name: child(&data.name)?,
                args: data.args.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            })),
            Self::New(data) => Self::New(Box::new(NewData {
                class: child(&data.class)?,
                args: data.args.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            })),
            Self::ArrayLiteral { items } => Self::ArrayLiteral {
                items: items.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            },
            Self::ArrayItem { key, value, by_ref } => Self::ArrayItem {
                key: key.as_ref().map(&mut child).transpose()?,
                value: child(value)?,
                by_ref: *by_ref,
            },
            Self::Ternary(data) => Self::Ternary(Box::new(TernaryData {
                condition: child(&data.condition)?,
                if_true: data.if_true.as_ref().map(&mut child).transpose()?,
                if_false: child(&data.if_false)?,
            })),
            Self::ClosureDef(data) => Self::ClosureDef(Box::new(ClosureData {
                returns_ref: data.returns_ref,
                is_static: data.is_static,
                parameters: data
                    .parameters
                    .iter()
                    .map(&mut child)
                    .collect::<std::result::Result<_, _>>()?,
                used_variables: data.used_variables.clone(),
                captures_scope: data.captures_scope,
                body: data.body.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            })),
            Self::Return { value } => Self::Return {
                value: value.as_ref().map(&mut child).transpose()?,
            },
            Self::Throw { exception } => Self::Throw {
                exception: child(exception)?,
            },
            Self::Unset { values } => Self::Unset {
                values: values.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            },
            Self::IssetCheck { values } => Self::IssetCheck {
                values: values.iter().map(&mut child).collect::<std::result::Result<_, _>>()?,
            },
            Self::ClassConstantRef { class, name } => Self::ClassConstantRef {
                class: child(class)?,
                name: name.clone(),
            },
        };

        if changed {
            Ok(Arc::new(rebuilt))
        } else {
            Ok(node.clone())
        }
    }

    /// Infallible form of [`Expression::try_map_children`]
    pub fn map_children(node: &Expr, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
        match Self::try_map_children::<Infallible>(node, |child| Ok(f(child))) {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }

    /// Replace the children of `node` (in [`Expression::children`] order)
    ///
    /// Returns `node` itself when every new child is the identical handle.
    pub fn update(node: &Expr, children: &[Expr]) -> Result<Expr> {
        let expected = node.children().len();
        if children.len() != expected {
            return Err(QueryError::structural(
                node.kind().name(),
                format!("update expects {expected} children, {} given", children.len()),
            ));
        }
        let mut replacements = children.iter();
        Ok(Self::map_children(node, |original| {
            replacements.next().cloned().unwrap_or_else(|| original.clone())
        }))
    }

    /// Copy the whole tree into fresh nodes (new identity, equal structure)
    pub fn deep_clone(node: &Expr) -> Expr {
        let rebuilt = Self::map_children(node, Self::deep_clone);
        Arc::new((*rebuilt).clone())
    }

    /// Structural hash: equal for structurally equal trees within a process
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Structural hash rendered as 16 hex digits
    pub fn hash_hex(&self) -> String {
        format!("{:016x}", self.structural_hash())
    }

    /// Serialize to the self-describing JSON tree format
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the JSON tree format and validate the result
    pub fn from_json(json: &str) -> Result<Expr> {
        let expr: Expr = Arc::new(serde_json::from_str::<Expression>(json)?);
        super::validate::validate_expression(&expr)?;
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Expr {
        Expression::binary(
            Expression::variable("x"),
            BinaryOperator::GreaterThan,
            Expression::value(5),
        )
    }

    #[test]
    fn test_independent_trees_hash_equal() {
        let a = sample();
        let b = sample();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
        assert_eq!(a.structural_hash(), b.structural_hash());

        let c = Expression::binary(
            Expression::variable("x"),
            BinaryOperator::GreaterThan,
            Expression::value(6),
        );
        assert_ne!(a.structural_hash(), c.structural_hash());
    }

    #[test]
    fn test_update_with_same_children_is_identity() {
        let node = sample();
        let children: Vec<Expr> = node.children().into_iter().cloned().collect();
        let updated = Expression::update(&node, &children).unwrap();
        assert!(Arc::ptr_eq(&node, &updated));
    }

    #[test]
    fn test_update_with_new_child_rebuilds() {
        let node = sample();
        let children = vec![Expression::variable("x"), Expression::value(7)];
        let updated = Expression::update(&node, &children).unwrap();
        assert!(!Arc::ptr_eq(&node, &updated));
        match &*updated {
            Expression::BinaryOp(data) => {
                assert_eq!(data.op, BinaryOperator::GreaterThan);
                assert_eq!(data.right.as_value(), Some(&Value::Int(7)));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_update_rejects_wrong_arity() {
        let node = sample();
        assert!(Expression::update(&node, &[Expression::value(1)]).is_err());
    }

    #[test]
    fn test_deep_clone_has_new_identity() {
        let node = Expression::arrow(&["x"], sample());
        let copy = Expression::deep_clone(&node);
        assert_eq!(node, copy);
        assert!(!Arc::ptr_eq(&node, &copy));
        assert!(!Arc::ptr_eq(node.children()[0], copy.children()[0]));
    }

    #[test]
    fn test_children_order() {
        let call = Expression::method_call(
            Expression::variable("source"),
            "where",
            vec![Expression::value(1), Expression::value(2)],
        );
        let kinds: Vec<_> = call.children().iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ExpressionKind::Variable,
                ExpressionKind::Value,
                ExpressionKind::Value,
                ExpressionKind::Value
            ]
        );
    }

    #[test]
    fn test_json_round_trip_preserves_structure() {
        let node = Expression::arrow(
            &["row"],
            Expression::index(Expression::variable("row"), Some(Expression::value("age"))),
        );
        let json = node.to_json().unwrap();
        let back = Expression::from_json(&json).unwrap();
        assert_eq!(node, back);
        assert_eq!(node.structural_hash(), back.structural_hash());
    }
}
