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

use std::path::PathBuf;

use bon::Builder;
use smart_default::SmartDefault;

/// Dead prefix size after which `remove` rewrites the file (1 MiB).
pub const DEFAULT_COMPACTION_THRESHOLD: u64 = 1024 * 1024;

/// Options for opening a [`QueueFile`](crate::QueueFile).
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(on(PathBuf, into))]
pub struct QueueConfig {
    /// Path of the queue file. Parent directories are created on open.
    #[default(PathBuf::from("payload_queue"))]
    pub path: PathBuf,

    /// CRC-check every committed record when the file is opened.
    #[default = true]
    #[builder(default = true)]
    pub verify_on_open: bool,

    /// Rewrite the file once this many bytes of removed records sit in front
    /// of the head.
    #[default(DEFAULT_COMPACTION_THRESHOLD)]
    #[builder(default = DEFAULT_COMPACTION_THRESHOLD)]
    pub compaction_threshold: u64,

    /// `sync_data` after every record and header write. Turning this off
    /// trades crash durability for throughput.
    #[default = true]
    #[builder(default = true)]
    pub sync: bool,
}

impl QueueConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}
