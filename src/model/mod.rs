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

//! Data model: host values, ordered maps and collection factories

pub mod factory;
pub mod ordered_map;
pub mod value;

pub use factory::{ArrayFactory, CollectionFactory, ObjectFactory, factory_for};
pub use ordered_map::OrderedMap;
pub use value::{Entry, Object, Value};
