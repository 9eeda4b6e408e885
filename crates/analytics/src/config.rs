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

use std::{path::PathBuf, time::Duration};

use bon::Builder;
use smart_default::SmartDefault;
use snafu::ensure;

use crate::error::{InvalidArgumentSnafu, Result};

/// Hard cap on queued records. Oldest records are evicted past this.
pub const MAX_QUEUE_SIZE: usize = 1000;
/// Serialized payloads above this size are dropped.
pub const MAX_PAYLOAD_SIZE: usize = 32_000;
/// Upper bound on the record bytes staged into one batch. Leaves headroom
/// below the server's 500 KB limit for the envelope.
pub const MAX_BATCH_SIZE: usize = 475_000;

pub const DEFAULT_ENDPOINT: &str = "https://engine.snapyr.com";
pub const DEFAULT_UPLOAD_PATH: &str = "/v1/batch";

fn default_queue_dir() -> PathBuf { std::env::temp_dir().join("beacon-disk-queue") }

/// SDK instance configuration.
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(on(String, into), on(PathBuf, into))]
pub struct AnalyticsConfig {
    /// Project write key, sent as the basic-auth user name.
    #[default = ""]
    pub write_key: String,

    #[default(DEFAULT_ENDPOINT.to_string())]
    #[builder(default = DEFAULT_ENDPOINT.to_string())]
    pub endpoint: String,

    #[default(DEFAULT_UPLOAD_PATH.to_string())]
    #[builder(default = DEFAULT_UPLOAD_PATH.to_string())]
    pub upload_path: String,

    /// Distinguishes instances: names the queue file and labels metrics.
    #[default("beacon".to_string())]
    #[builder(default = "beacon".to_string())]
    pub tag: String,

    #[default(default_queue_dir())]
    #[builder(default = default_queue_dir())]
    pub queue_dir: PathBuf,

    /// Queue length that triggers a flush.
    #[default = 20]
    #[builder(default = 20)]
    pub flush_queue_size: usize,

    /// Period of the time-based flush trigger.
    #[default(Duration::from_secs(30))]
    #[builder(default = Duration::from_secs(30))]
    pub flush_interval: Duration,

    #[default(MAX_QUEUE_SIZE)]
    #[builder(default = MAX_QUEUE_SIZE)]
    pub max_queue_size: usize,

    #[default(MAX_PAYLOAD_SIZE)]
    #[builder(default = MAX_PAYLOAD_SIZE)]
    pub max_payload_size: usize,

    #[default(MAX_BATCH_SIZE)]
    #[builder(default = MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    #[default = false]
    #[builder(default)]
    pub nanosecond_timestamps: bool,

    #[default(Duration::from_secs(15))]
    #[builder(default = Duration::from_secs(15))]
    pub connect_timeout: Duration,

    #[default(Duration::from_secs(20))]
    #[builder(default = Duration::from_secs(20))]
    pub read_timeout: Duration,

    /// Threads of the runtime owned by the instance.
    #[default = 2]
    #[builder(default = 2)]
    pub worker_threads: usize,

    #[default("beacon".to_string())]
    #[builder(default = "beacon".to_string())]
    pub thread_name: String,

    /// Emit Installed/Updated/Opened/Backgrounded events from the lifecycle
    /// hooks.
    #[default = true]
    #[builder(default = true)]
    pub track_lifecycle_events: bool,

    pub app_version: Option<String>,

    pub app_build: Option<i64>,
}

impl AnalyticsConfig {
    /// Checks the fields that have no usable fallback.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.write_key.trim().is_empty(),
            InvalidArgumentSnafu {
                message: "write key must not be empty",
            }
        );
        ensure!(
            !self.tag.trim().is_empty(),
            InvalidArgumentSnafu {
                message: "tag must not be empty",
            }
        );
        ensure!(
            self.flush_queue_size >= 1,
            InvalidArgumentSnafu {
                message: "flush queue size must be at least 1",
            }
        );
        ensure!(
            !self.flush_interval.is_zero(),
            InvalidArgumentSnafu {
                message: "flush interval must be positive",
            }
        );
        ensure!(
            self.max_queue_size >= 1 && self.worker_threads >= 1,
            InvalidArgumentSnafu {
                message: "queue size and worker threads must be at least 1",
            }
        );
        Ok(())
    }

    /// Path of the on-disk queue file for this instance.
    pub fn queue_path(&self) -> PathBuf { self.queue_dir.join(format!("{}-payload_queue", self.tag)) }

    /// Full URL batches are posted to.
    pub fn upload_url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.upload_path.trim_start_matches('/')
        )
    }
}
