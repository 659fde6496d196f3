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

//! Error types for query building and execution
//!
//! Every error is raised synchronously at the point it is detected and carries
//! a description of the offending construct.

use thiserror::Error;

/// Result type alias for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors raised while building, resolving or executing queries
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// An expression has a shape the engine does not support in this position
    #[error("Structural parse error: unsupported {construct}{}: {message}",
        position.as_ref().map(|p| format!(" at {p}")).unwrap_or_default()
    )]
    StructuralParse {
        /// Kind of construct that was found
        construct: String,
        /// Where the construct was found (argument index, statement index, ...)
        position: Option<String>,
        /// Human-readable error message
        message: String,
    },

    /// A variable was referenced that is not bound in the evaluation context
    #[error("Unbound variable ${name}")]
    UnboundVariable {
        /// Variable name
        name: String,
    },

    /// An expression could not be reduced to a value without executing it
    #[error("Expression is not constant: cannot reduce {construct} '{expression}' to a value")]
    NotAConstantExpression {
        /// Kind of construct that blocked the reduction
        construct: String,
        /// Compiled text of the expression
        expression: String,
    },

    /// An operation argument is missing or has the wrong form
    #[error("Invalid argument {index} of '{method}': {message}")]
    InvalidOperationArgument {
        /// Method (verb) name
        method: String,
        /// Zero-based argument index
        index: usize,
        /// Human-readable error message
        message: String,
    },

    /// A value was used as a sequence but cannot be enumerated
    #[error("Invalid argument for {operation}: expecting an iterable, {actual} given")]
    InvalidIterable {
        /// Operation that required an iterable
        operation: String,
        /// Type of the value that was given
        actual: String,
    },

    /// Two keys could not be compared while ordering, grouping or set testing
    #[error("Incomparable keys in {operation}: {left}{}",
        right.as_ref().map(|r| format!(" and {r}")).unwrap_or_default()
    )]
    IncomparableKey {
        /// Operation performing the comparison
        operation: String,
        /// Left key description
        left: String,
        /// Right key description (absent for single-key checks)
        right: Option<String>,
    },

    /// Arithmetic failure such as division by zero
    #[error("Arithmetic error in '{operator}': {message}")]
    Arithmetic {
        /// Operator symbol
        operator: String,
        /// Human-readable error message
        message: String,
    },

    /// Operand or cast type mismatch
    #[error("Type mismatch: expected {expected}, got {actual}{}",
        context.as_ref().map(|c| format!(" in {c}")).unwrap_or_default()
    )]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type received
        actual: String,
        /// Additional context about where the mismatch occurred
        context: Option<String>,
    },

    /// A `throw` construct was executed inside a closure body
    #[error("Thrown: {message}")]
    Thrown {
        /// Message of the thrown value
        message: String,
    },

    /// Failure reported by a cache collaborator
    #[error("Cache error: {message}")]
    Cache {
        /// Human-readable error message
        message: String,
    },

    /// Expression or query (de)serialization failure
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },
}

impl QueryError {
    /// Create a structural parse error
    pub fn structural(construct: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StructuralParse {
            construct: construct.into(),
            position: None,
            message: message.into(),
        }
    }

    /// Create a structural parse error with a position description
    pub fn structural_at(
        construct: impl Into<String>,
        position: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StructuralParse {
            construct: construct.into(),
            position: Some(position.into()),
            message: message.into(),
        }
    }

    /// Create an unbound variable error
    pub fn unbound_variable(name: impl Into<String>) -> Self {
        Self::UnboundVariable { name: name.into() }
    }

    /// Create a not-a-constant error
    pub fn not_a_constant(construct: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::NotAConstantExpression {
            construct: construct.into(),
            expression: expression.into(),
        }
    }

    /// Create an invalid operation argument error
    pub fn invalid_argument(
        method: impl Into<String>,
        index: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidOperationArgument {
            method: method.into(),
            index,
            message: message.into(),
        }
    }

    /// Create an invalid iterable error
    pub fn invalid_iterable(operation: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidIterable {
            operation: operation.into(),
            actual: actual.into(),
        }
    }

    /// Create an incomparable key error for a pair of keys
    pub fn incomparable(
        operation: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self::IncomparableKey {
            operation: operation.into(),
            left: left.into(),
            right: Some(right.into()),
        }
    }

    /// Create an incomparable key error for a single key
    pub fn incomparable_key(operation: impl Into<String>, key: impl Into<String>) -> Self {
        Self::IncomparableKey {
            operation: operation.into(),
            left: key.into(),
            right: None,
        }
    }

    /// Create an arithmetic error
    pub fn arithmetic(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Arithmetic {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        expected: impl Into<String>,
        actual: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
            context,
        }
    }

    /// Create a cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Check whether this error was raised by the evaluator while reducing an
    /// expression (as opposed to by the sequence engine)
    pub fn is_evaluation_error(&self) -> bool {
        matches!(
            self,
            Self::UnboundVariable { .. }
                | Self::NotAConstantExpression { .. }
                | Self::Arithmetic { .. }
                | Self::TypeMismatch { .. }
                | Self::Thrown { .. }
        )
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
