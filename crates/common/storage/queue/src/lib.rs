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

//! Durable single-file FIFO queue of opaque byte records.
//!
//! - [`QueueFile`]: crash-safe, append-only queue backed by one file with a
//!   dual-slot header
//! - [`MemoryQueue`]: volatile fallback with the same interface
//! - [`PayloadQueue`]: the trait both implement
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_common_storage_queue::{PayloadQueue, QueueConfig, QueueFile};
//!
//! let mut queue = QueueFile::open(QueueConfig::new("/tmp/beacon/payload_queue")).unwrap();
//! queue.append(br#"{"event":"Application Opened"}"#).unwrap();
//!
//! let staged = queue.for_each(&mut |_record| true).unwrap();
//! queue.remove(staged).unwrap();
//! ```

mod config;
mod crc;
mod error;
mod file;
mod header;
mod memory;
mod queue;
mod record;

pub use config::{DEFAULT_COMPACTION_THRESHOLD, QueueConfig};
pub use error::{QueueError, Result};
pub use file::QueueFile;
pub use memory::MemoryQueue;
pub use queue::PayloadQueue;
