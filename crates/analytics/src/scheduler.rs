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

use std::{sync::Arc, time::Duration};

use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dispatcher::Dispatcher;

/// Time-based flush trigger.
///
/// Calls [`Dispatcher::submit_flush`] every `interval` until `token` is
/// cancelled. The first tick comes early when a full batch is already
/// queued.
pub fn spawn_periodic_flush(
    handle: &Handle,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let start = Instant::now() + dispatcher.initial_flush_delay(interval);
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    dispatcher.submit_flush();
                }
                () = token.cancelled() => break,
            }
        }
        debug!(tag = dispatcher.tag(), "periodic flush stopped");
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use beacon_common_storage_queue::{MemoryQueue, PayloadQueue};
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        client::{Transport, UploadClient, UploadRequest, UploadResponse},
        config::AnalyticsConfig,
        error::Result,
        executor::InlineExecutor,
    };

    #[derive(Default)]
    struct CountingTransport {
        posts: Mutex<usize>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn post(&self, _request: UploadRequest) -> Result<UploadResponse> {
            *self.posts.lock() += 1;
            Ok(UploadResponse {
                status: 200,
                reason: "OK".into(),
                body:   String::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flushes_below_threshold() {
        let config = AnalyticsConfig::builder().write_key("wk").build();
        let transport = Arc::new(CountingTransport::default());
        let mut queue = MemoryQueue::new();
        queue.append(br#"{"event":"a"}"#).unwrap();
        let dispatcher = Arc::new(
            Dispatcher::builder()
                .config(&config)
                .queue(Box::new(queue))
                .client(UploadClient::new(&config, transport.clone()))
                .network(Arc::new(InlineExecutor::new()))
                .build(),
        );

        let token = CancellationToken::new();
        let task = spawn_periodic_flush(
            &Handle::current(),
            Arc::clone(&dispatcher),
            config.flush_interval,
            token.clone(),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*transport.posts.lock(), 0);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(*transport.posts.lock(), 1);
        assert_eq!(dispatcher.size(), 0);

        token.cancel();
        task.await.unwrap();
    }
}
