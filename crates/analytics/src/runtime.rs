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

use std::sync::atomic::{AtomicUsize, Ordering};

use bon::Builder;
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::runtime::{Builder as TokioBuilder, Runtime};

use crate::{
    config::AnalyticsConfig,
    error::{Result, RuntimeSnafu},
};

/// Shape of the runtime an [`Analytics`](crate::Analytics) instance owns.
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(on(String, into))]
pub struct RuntimeOptions {
    #[default = 2]
    #[builder(default = 2)]
    pub worker_threads: usize,

    #[default("beacon".to_string())]
    #[builder(default = "beacon".to_string())]
    pub thread_name: String,
}

impl From<&AnalyticsConfig> for RuntimeOptions {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            worker_threads: config.worker_threads.max(1),
            thread_name:    config.thread_name.clone(),
        }
    }
}

impl RuntimeOptions {
    /// Builds a multi-thread runtime with IO and time drivers and threads
    /// named `<thread_name>-<n>`.
    pub fn create(self) -> Result<Runtime> {
        let mut builder = TokioBuilder::new_multi_thread();
        builder.worker_threads(self.worker_threads).enable_all();

        let counter = AtomicUsize::new(0);
        let thread_name = self.thread_name;
        builder.thread_name_fn(move || {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            format!("{thread_name}-{idx}")
        });

        builder.build().context(RuntimeSnafu)
    }
}
