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

use std::io;

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(display("IO error on queue file: {source}"))]
    Io {
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Neither header slot is valid, or a committed record fails its CRC.
    #[snafu(display("Corrupted queue file at offset {offset}: {reason}"))]
    Corrupted { offset: u64, reason: String },

    /// Asked to remove more records than the queue holds.
    #[snafu(display("Cannot remove {requested} records, queue holds {available}"))]
    RemoveOutOfRange { requested: usize, available: usize },

    /// Record length does not fit the on-disk length prefix.
    #[snafu(display("Record of {len} bytes exceeds the maximum record size"))]
    RecordTooLarge { len: usize },

    /// Operation attempted after `close()`.
    #[snafu(display("Queue is closed"))]
    Closed,
}

/// Result type for queue operations.
pub type Result<T, E = QueueError> = std::result::Result<T, E>;
