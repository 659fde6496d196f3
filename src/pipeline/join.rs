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

//! Joins and group joins
//!
//! The inner sequence is materialized on the first pull of the join stage;
//! the outer sequence is streamed. Output keys are a running counter.

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::fmt;
use std::sync::Arc;

use super::Function;
use super::sequence::Sequence;
use super::stage::Pull;
use crate::error::Result;
use crate::model::{CollectionFactory, Entry, Value};

/// How outer and inner elements are matched
#[derive(Clone)]
pub enum JoinFilter {
    /// Every inner element matches
    Cross,
    /// Predicate over `(outerValue, innerValue, outerKey, innerKey)`
    On(Function),
    /// Hashed match of `outer(value, key)` against `inner(value, key)`
    OnEquality {
        /// Outer key selector
        outer: Function,
        /// Inner key selector
        inner: Function,
    },
}

impl fmt::Debug for JoinFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cross => write!(f, "Cross"),
            Self::On(_) => write!(f, "On(..)"),
            Self::OnEquality { .. } => write!(f, "OnEquality(..)"),
        }
    }
}

/// A fully configured join stage
#[derive(Clone)]
pub struct JoinSpec {
    /// Outer sequence, streamed
    pub outer: Sequence,
    /// Inner sequence, materialized once
    pub inner: Sequence,
    /// Matching strategy
    pub filter: JoinFilter,
    /// `(key, value)` substituted when an outer element has no match
    pub default: Option<Entry>,
    /// Result projection
    pub projection: Function,
    /// Pass each outer element's matches as one group
    pub grouped: bool,
    /// Builds the group collections of a group join
    pub factory: Arc<dyn CollectionFactory>,
}

impl fmt::Debug for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSpec")
            .field("outer", &self.outer)
            .field("inner", &self.inner)
            .field("filter", &self.filter)
            .field("default", &self.default)
            .field("grouped", &self.grouped)
            .finish_non_exhaustive()
    }
}

enum Matcher {
    All(Arc<Vec<Entry>>),
    Scan(Arc<Vec<Entry>>, Function),
    Lookup(IndexMap<Value, Vec<Entry>, FxBuildHasher>, Function),
}

impl Matcher {
    fn build(inner: Vec<Entry>, filter: &JoinFilter) -> Result<Self> {
        Ok(match filter {
            JoinFilter::Cross => Self::All(Arc::new(inner)),
            JoinFilter::On(predicate) => Self::Scan(Arc::new(inner), predicate.clone()),
            JoinFilter::OnEquality { outer, inner: inner_key } => {
                let mut index: IndexMap<Value, Vec<Entry>, FxBuildHasher> = IndexMap::default();
                for (key, value) in inner {
                    let join_key = inner_key(&[value.clone(), key.clone()])?;
                    join_key.ensure_hashable("join")?;
                    index.entry(join_key).or_default().push((key, value));
                }
                Self::Lookup(index, outer.clone())
            }
        })
    }

    fn matches(&self, outer_key: &Value, outer_value: &Value) -> Result<Vec<Entry>> {
        match self {
            Self::All(inner) => Ok(inner.to_vec()),
            Self::Scan(inner, predicate) => {
                let mut matched = Vec::new();
                for (key, value) in inner.iter() {
                    let args = [outer_value.clone(), value.clone(), outer_key.clone(), key.clone()];
                    if predicate(&args)?.is_truthy() {
                        matched.push((key.clone(), value.clone()));
                    }
                }
                Ok(matched)
            }
            Self::Lookup(index, outer) => {
                let join_key = outer(&[outer_value.clone(), outer_key.clone()])?;
                join_key.ensure_hashable("join")?;
                Ok(index.get(&join_key).cloned().unwrap_or_default())
            }
        }
    }
}

/// Build the pull chain of a join stage
pub fn join_pull(spec: JoinSpec) -> Result<Pull> {
    let inner = spec.inner.to_entries()?;
    let matcher = Matcher::build(inner, &spec.filter)?;
    let JoinSpec {
        outer,
        default,
        projection,
        grouped,
        factory,
        ..
    } = spec;

    let mut count: i64 = 0;
    let rows = outer.iter().flat_map(move |item| -> Vec<Result<Entry>> {
        let (outer_key, outer_value) = match item {
            Ok(entry) => entry,
            Err(err) => return vec![Err(err)],
        };
        let mut matched = match matcher.matches(&outer_key, &outer_value) {
            Ok(matched) => matched,
            Err(err) => return vec![Err(err)],
        };
        if matched.is_empty() {
            if let Some(default) = &default {
                matched.push(default.clone());
            }
        }

        if grouped {
            let group = factory.construct_like(matched);
            let row = projection(&[outer_value, group, outer_key]).map(|value| {
                let key = Value::Int(count);
                count += 1;
                (key, value)
            });
            return vec![row];
        }

        let mut rows = Vec::with_capacity(matched.len());
        for (inner_key, inner_value) in matched {
            let args = [outer_value.clone(), inner_value, outer_key.clone(), inner_key];
            match projection(&args) {
                Ok(value) => {
                    rows.push(Ok((Value::Int(count), value)));
                    count += 1;
                }
                Err(err) => {
                    rows.push(Err(err));
                    break;
                }
            }
        }
        rows
    });
    Ok(Box::new(rows))
}
