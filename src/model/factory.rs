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

//! Collection construction capability
//!
//! Grouping and group joins build sub-collections. The factory lets those
//! results mirror the concrete flavor of the query source without the
//! sequence engine knowing about concrete collection types.

use std::fmt;
use std::sync::Arc;

use super::ordered_map::OrderedMap;
use super::value::{Entry, Value};

/// Builds a collection value of the same flavor as a source
pub trait CollectionFactory: fmt::Debug + Send + Sync {
    /// Construct a new collection holding `elements`
    fn construct_like(&self, elements: Vec<Entry>) -> Value;
}

/// Builds plain arrays
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayFactory;

impl CollectionFactory for ArrayFactory {
    fn construct_like(&self, elements: Vec<Entry>) -> Value {
        Value::array(OrderedMap::from_entries(elements))
    }
}

/// Builds objects of a fixed class whose properties are the elements
#[derive(Debug, Clone)]
pub struct ObjectFactory {
    class: String,
}

impl ObjectFactory {
    /// Create a factory for the given class
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
        }
    }
}

impl CollectionFactory for ObjectFactory {
    fn construct_like(&self, elements: Vec<Entry>) -> Value {
        Value::object(self.class.clone(), OrderedMap::from_entries(elements))
    }
}

/// Pick the factory that mirrors a source instance
pub fn factory_for(source: &Value) -> Arc<dyn CollectionFactory> {
    match source {
        Value::Object(object) => Arc::new(ObjectFactory::new(object.class.clone())),
        _ => Arc::new(ArrayFactory),
    }
}
