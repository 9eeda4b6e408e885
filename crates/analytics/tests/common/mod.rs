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

#![allow(dead_code)]

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use beacon_analytics::{
    AnalyticsConfig, Dispatcher, EventKind, EventPayload, InlineExecutor, JsonMap, Result, Transport,
    UploadClient, UploadRequest, UploadResponse,
};
use beacon_common_storage_queue::{MemoryQueue, PayloadQueue};
use parking_lot::Mutex;
use serde_json::Value;

/// Transport answering from a script of status codes (200 once the script
/// runs out) and keeping every request body.
#[derive(Default)]
pub struct ScriptedTransport {
    statuses: Mutex<VecDeque<u16>>,
    reply:    Mutex<String>,
    requests: Mutex<Vec<UploadRequest>>,
}

impl ScriptedTransport {
    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            reply:    Mutex::default(),
            requests: Mutex::default(),
        }
    }

    /// Body sent back with every response.
    pub fn with_reply(self, body: &str) -> Self {
        *self.reply.lock() = body.to_string();
        self
    }

    pub fn requests(&self) -> usize { self.requests.lock().len() }

    /// Parsed request bodies in send order.
    pub fn batches(&self) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap())
            .collect()
    }

    /// Every event sent so far, flattened across batches.
    pub fn events(&self) -> Vec<Value> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch["batch"].as_array().cloned().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, request: UploadRequest) -> Result<UploadResponse> {
        self.requests.lock().push(request);
        let status = self.statuses.lock().pop_front().unwrap_or(200);
        Ok(UploadResponse {
            status,
            reason: String::new(),
            body: self.reply.lock().clone(),
        })
    }
}

pub fn config() -> AnalyticsConfig {
    AnalyticsConfig::builder()
        .write_key("test-write-key")
        .endpoint("http://127.0.0.1:9")
        .flush_queue_size(100)
        .build()
}

pub fn dispatcher_with(
    config: &AnalyticsConfig,
    queue: Box<dyn PayloadQueue>,
    transport: Arc<ScriptedTransport>,
) -> Arc<Dispatcher> {
    Arc::new(
        Dispatcher::builder()
            .config(config)
            .queue(queue)
            .client(UploadClient::new(config, transport))
            .network(Arc::new(InlineExecutor::new()))
            .build(),
    )
}

pub fn dispatcher(config: &AnalyticsConfig, transport: Arc<ScriptedTransport>) -> Arc<Dispatcher> {
    dispatcher_with(config, Box::new(MemoryQueue::new()), transport)
}

pub fn track(event: &str) -> EventPayload {
    EventPayload::builder()
        .kind(EventKind::Track {
            event:      event.to_string(),
            properties: JsonMap::new(),
        })
        .anonymous_id("anon-1")
        .build()
        .unwrap()
}
