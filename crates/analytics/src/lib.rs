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

//! Core of the beacon analytics SDK.
//!
//! Events flow one way:
//!
//! 1. [`Analytics`] validates a call and submits a job to the producer
//!    executor.
//! 2. The job builds an [`EventPayload`] and [`Dispatcher::perform_enqueue`]
//!    serializes it and appends it to the durable queue.
//! 3. A flush, triggered by queue size, the periodic timer or an explicit
//!    [`Analytics::flush`], stages a batch through [`BatchWriter`] and
//!    uploads it with [`UploadClient`] on the network executor.
//! 4. The response decides whether the staged records leave the queue.
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_analytics::{Analytics, AnalyticsConfig};
//!
//! let analytics = Analytics::builder()
//!     .config(AnalyticsConfig::builder().write_key("my-write-key").build())
//!     .build()
//!     .unwrap();
//! analytics.track("Order Completed", None).unwrap();
//! analytics.flush().unwrap();
//! analytics.shutdown();
//! ```

mod actions;
mod analytics;
mod batch;
mod client;
mod collaborators;
mod config;
mod dispatcher;
mod error;
mod executor;
mod lifecycle;
pub mod metrics;
mod payload;
mod preferences;
mod runtime;
mod scheduler;

pub use actions::{ActionHandler, extract_actions};
pub use analytics::Analytics;
pub use batch::BatchWriter;
pub use client::{
    Connection, HttpTransport, Transport, UploadClient, UploadRequest, UploadResponse, authorization_header,
    user_agent,
};
pub use collaborators::{AlwaysConnected, Clock, Connectivity, Crypto, JsonSerializer, NoCrypto, Serializer, SystemClock};
pub use config::{
    AnalyticsConfig, DEFAULT_ENDPOINT, DEFAULT_UPLOAD_PATH, MAX_BATCH_SIZE, MAX_PAYLOAD_SIZE, MAX_QUEUE_SIZE,
};
pub use dispatcher::{Dispatcher, EnqueueOutcome, FlushState};
pub use error::{Error, Result};
pub use executor::{Executor, InlineExecutor, Job, SerialExecutor};
pub use lifecycle::{
    APPLICATION_BACKGROUNDED, APPLICATION_INSTALLED, APPLICATION_OPENED, APPLICATION_UPDATED, PreviousInstall,
};
pub use payload::{EventKind, EventPayload, JsonMap, TimestampPrecision, Traits};
pub use preferences::{FilePreferences, MemoryPreferences, Preferences};
pub use runtime::RuntimeOptions;
pub use scheduler::spawn_periodic_flush;
