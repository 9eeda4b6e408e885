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

//! The [`PayloadQueue`] abstraction shared by the disk and memory queues.

use std::fmt;

use crate::Result;

/// FIFO store of opaque byte records.
///
/// Not internally synchronised: callers serialise access. Removal always
/// takes a contiguous prefix from the front.
pub trait PayloadQueue: fmt::Debug + Send {
    /// Number of records currently held. Never scans.
    fn size(&self) -> usize;

    /// Appends one record at the tail.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Visits records oldest first without removing them.
    ///
    /// Iteration stops as soon as `visitor` returns `false`. Returns the
    /// number of records the visitor accepted.
    fn for_each(&mut self, visitor: &mut dyn FnMut(&[u8]) -> bool) -> Result<usize>;

    /// Discards the oldest `n` records. Fails without side effects when `n`
    /// exceeds [`size`](Self::size).
    fn remove(&mut self, n: usize) -> Result<()>;

    /// Releases underlying resources. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    fn is_empty(&self) -> bool { self.size() == 0 }

    /// Copy of the oldest record, if any.
    fn peek(&mut self) -> Result<Option<Vec<u8>>> {
        let mut first = None;
        self.for_each(&mut |record| {
            first = Some(record.to_vec());
            false
        })?;
        Ok(first)
    }
}
