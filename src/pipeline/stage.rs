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

//! Per-stage iteration state machine
//!
//! A stage starts `Unrealized`, builds its upstream pull chain on the first
//! pull, and ends `Exhausted` after the last element or the first error.
//! Exhausted stages never restart; iterating the sequence again builds a new
//! stage.

use std::fmt;

use super::sequence::Sequence;
use crate::error::Result;
use crate::model::Entry;

/// Boxed pull chain of a realized stage
pub type Pull = Box<dyn Iterator<Item = Result<Entry>>>;

/// Observable state of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Nothing pulled yet
    Unrealized,
    /// Pull chain built, elements remain
    Iterating,
    /// Finished (end reached or error raised)
    Exhausted,
}

enum StageState {
    Unrealized(Sequence),
    Iterating(Pull),
    Exhausted,
}

/// Single-pass iterator over a sequence stage
pub struct StageIterator {
    state: StageState,
}

impl StageIterator {
    pub(crate) fn new(sequence: Sequence) -> Self {
        Self {
            state: StageState::Unrealized(sequence),
        }
    }

    /// Current state of the stage
    pub fn status(&self) -> StageStatus {
        match self.state {
            StageState::Unrealized(_) => StageStatus::Unrealized,
            StageState::Iterating(_) => StageStatus::Iterating,
            StageState::Exhausted => StageStatus::Exhausted,
        }
    }
}

impl fmt::Debug for StageIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageIterator")
            .field("status", &self.status())
            .finish()
    }
}

impl Iterator for StageIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, StageState::Exhausted) {
                StageState::Unrealized(sequence) => match sequence.realize() {
                    Ok(pull) => self.state = StageState::Iterating(pull),
                    Err(err) => return Some(Err(err)),
                },
                StageState::Iterating(mut pull) => {
                    return match pull.next() {
                        Some(Ok(entry)) => {
                            self.state = StageState::Iterating(pull);
                            Some(Ok(entry))
                        }
                        Some(Err(err)) => Some(Err(err)),
                        None => None,
                    };
                }
                StageState::Exhausted => return None,
            }
        }
    }
}

impl std::iter::FusedIterator for StageIterator {}
