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

//! Callable reflection and parsed function structures
//!
//! Turning host source text into expressions is the job of a
//! [`FunctionParser`] implementation; this module only memoizes its output.

mod interpreter;
mod reflection;
mod structure;

pub use interpreter::{FunctionCache, FunctionInterpreter, FunctionParser, PreparsedFunctions};
pub use reflection::{FunctionLocation, FunctionReflection};
pub use structure::FunctionStructure;
