// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;

use snafu::ensure;

use crate::{
    PayloadQueue, Result,
    error::{ClosedSnafu, RemoveOutOfRangeSnafu},
};

/// Volatile queue used when the disk queue cannot be opened.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    records: VecDeque<Vec<u8>>,
    closed:  bool,
}

impl MemoryQueue {
    pub fn new() -> Self { Self::default() }
}

impl PayloadQueue for MemoryQueue {
    fn size(&self) -> usize { self.records.len() }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        ensure!(!self.closed, ClosedSnafu);
        self.records.push_back(data.to_vec());
        Ok(())
    }

    fn for_each(&mut self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<usize> {
        ensure!(!self.closed, ClosedSnafu);
        Ok(self
            .records
            .iter()
            .take_while(|record| visitor(record.as_slice()))
            .count())
    }

    fn remove(&mut self, n: usize) -> Result<()> {
        ensure!(!self.closed, ClosedSnafu);
        ensure!(
            n <= self.records.len(),
            RemoveOutOfRangeSnafu {
                requested: n,
                available: self.records.len(),
            }
        );
        self.records.drain(..n);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
