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

//! Position-based slicing

use super::stage::Pull;
use crate::error::Result;
use crate::model::Entry;

/// Iterator yielding positions `start..start + amount` of its upstream
///
/// The end bound is checked before pulling, so upstream is never asked for
/// more elements than the slice needs.
pub struct RangeIterator {
    upstream: Pull,
    position: usize,
    start: usize,
    end: Option<usize>,
}

impl RangeIterator {
    /// Slice `upstream` starting at `start`, taking at most `amount` elements
    pub fn new(upstream: Pull, start: usize, amount: Option<usize>) -> Self {
        Self {
            upstream,
            position: 0,
            start,
            end: amount.map(|amount| start.saturating_add(amount)),
        }
    }
}

impl Iterator for RangeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.end.is_some_and(|end| self.position >= end) {
                return None;
            }
            let item = self.upstream.next()?;
            if item.is_err() {
                return Some(item);
            }
            self.position += 1;
            if self.position > self.start {
                return Some(item);
            }
        }
    }
}
