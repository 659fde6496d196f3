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

//! Parsed callable structure

use serde::{Deserialize, Serialize};

use crate::ast::{ClosureData, Expr, Expression, validate_body};
use crate::error::{QueryError, Result};

/// A parsed callable: ordered parameter declarations plus a statement body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionStructure {
    /// Function name, absent for closures
    pub name: Option<String>,
    /// Returns by reference
    pub returns_ref: bool,
    /// Declared static
    pub is_static: bool,
    parameters: Vec<Expr>,
    body: Vec<Expr>,
}

impl FunctionStructure {
    /// Create a structure, validating parameters and body statements
    pub fn new(parameters: Vec<Expr>, body: Vec<Expr>) -> Result<Self> {
        for (index, parameter) in parameters.iter().enumerate() {
            if !matches!(&**parameter, Expression::Parameter(_)) {
                return Err(QueryError::structural_at(
                    parameter.kind().name(),
                    format!("parameter {index}"),
                    "parameter list entries must be parameters",
                ));
            }
        }
        validate_body(&body)?;
        Ok(Self {
            name: None,
            returns_ref: false,
            is_static: false,
            parameters,
            body,
        })
    }

    /// Set the function name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parameter declarations
    pub fn parameters(&self) -> &[Expr] {
        &self.parameters
    }

    /// Body statements
    pub fn body(&self) -> &[Expr] {
        &self.body
    }

    /// Parameter names in order
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter_map(|parameter| match &**parameter {
                Expression::Parameter(data) => Some(data.name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The equivalent closure definition
    pub fn to_closure(&self) -> Expr {
        Expression::closure_with(ClosureData {
            returns_ref: self.returns_ref,
            is_static: self.is_static,
            parameters: self.parameters.clone(),
            used_variables: Vec::new(),
            captures_scope: true,
            body: self.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::compile;

    #[test]
    fn test_structure_validates_body() {
        let body = vec![Expression::list([Expression::return_value(None)])];
        assert!(FunctionStructure::new(vec![], body).is_err());

        let params = vec![Expression::variable("x")];
        assert!(FunctionStructure::new(params, vec![]).is_err());
    }

    #[test]
    fn test_to_closure() {
        let structure = FunctionStructure::new(
            vec![Expression::parameter("row")],
            vec![Expression::return_value(Some(Expression::variable("row")))],
        )
        .unwrap();
        assert_eq!(structure.parameter_names(), vec!["row"]);
        assert_eq!(compile(&structure.to_closure()), "function ($row) { return $row; }");
    }
}
