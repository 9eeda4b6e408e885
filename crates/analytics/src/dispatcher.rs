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

//! Owns the queue: appends payloads, decides when to flush and applies the
//! per-outcome removal policy.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use beacon_common_storage_queue::PayloadQueue;
use bon::bon;
use parking_lot::Mutex;
use serde_json::Value;
use snafu::{ResultExt, ensure};
use tracing::{debug, error, info, warn};

use crate::{
    actions::{ActionHandler, extract_actions},
    batch::BatchWriter,
    client::{Connection, UploadClient},
    collaborators::{AlwaysConnected, Clock, Connectivity, Crypto, JsonSerializer, NoCrypto, Serializer, SystemClock},
    config::AnalyticsConfig,
    error::{Error, IllegalStateSnafu, Result, StorageSnafu},
    executor::Executor,
    metrics,
    payload::{EventPayload, JsonMap, TimestampPrecision},
};

/// Per-instance flush bookkeeping.
#[derive(Debug, Default)]
pub struct FlushState {
    flush_count: AtomicU64,
    in_flight:   AtomicBool,
    shutdown:    AtomicBool,
}

impl FlushState {
    pub fn flush_count(&self) -> u64 { self.flush_count.load(Ordering::Acquire) }

    pub fn is_in_flight(&self) -> bool { self.in_flight.load(Ordering::Acquire) }

    pub fn is_shutdown(&self) -> bool { self.shutdown.load(Ordering::Acquire) }
}

/// Result of handing one payload to [`Dispatcher::perform_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Appended { size: usize },
    Dropped { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    /// Nothing queued.
    Empty,
    /// Records left the queue; another batch may follow.
    Removed,
    /// Upload failed with a retryable error; records stay.
    Retained,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_queue_size:   usize,
    max_payload_size: usize,
    max_batch_size:   usize,
    flush_queue_size: usize,
}

pub struct Dispatcher {
    tag:          String,
    queue:        Mutex<Box<dyn PayloadQueue>>,
    flush_lock:   tokio::sync::Mutex<()>,
    state:        FlushState,
    limits:       Limits,
    precision:    TimestampPrecision,
    client:       UploadClient,
    network:      Arc<dyn Executor>,
    serializer:   Arc<dyn Serializer>,
    crypto:       Arc<dyn Crypto>,
    connectivity: Arc<dyn Connectivity>,
    clock:        Arc<dyn Clock>,
    actions:      Option<Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[bon]
impl Dispatcher {
    #[builder]
    pub fn new(
        config: &AnalyticsConfig,
        queue: Box<dyn PayloadQueue>,
        client: UploadClient,
        network: Arc<dyn Executor>,
        #[builder(default = Arc::new(JsonSerializer))] serializer: Arc<dyn Serializer>,
        #[builder(default = Arc::new(NoCrypto))] crypto: Arc<dyn Crypto>,
        #[builder(default = Arc::new(AlwaysConnected))] connectivity: Arc<dyn Connectivity>,
        #[builder(default = Arc::new(SystemClock))] clock: Arc<dyn Clock>,
        action_handler: Option<Arc<dyn ActionHandler>>,
    ) -> Self {
        let precision = if config.nanosecond_timestamps {
            TimestampPrecision::Nanos
        } else {
            TimestampPrecision::Millis
        };
        metrics::record_queue_size(&config.tag, queue.size());
        Self {
            tag: config.tag.clone(),
            queue: Mutex::new(queue),
            flush_lock: tokio::sync::Mutex::new(()),
            state: FlushState::default(),
            limits: Limits {
                max_queue_size:   config.max_queue_size,
                max_payload_size: config.max_payload_size,
                max_batch_size:   config.max_batch_size,
                flush_queue_size: config.flush_queue_size,
            },
            precision,
            client,
            network,
            serializer,
            crypto,
            connectivity,
            clock,
            actions: action_handler,
        }
    }
}

impl Dispatcher {
    pub fn tag(&self) -> &str { &self.tag }

    pub const fn state(&self) -> &FlushState { &self.state }

    pub fn size(&self) -> usize { self.queue.lock().size() }

    pub fn is_shutdown(&self) -> bool { self.state.is_shutdown() }

    /// Delay before the first periodic flush: none when a full batch is
    /// already waiting.
    pub fn initial_flush_delay(&self, interval: Duration) -> Duration {
        if self.size() >= self.limits.flush_queue_size {
            Duration::ZERO
        } else {
            interval
        }
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Serializes `payload` and appends it, evicting the oldest record when
    /// the queue is at capacity.
    ///
    /// Payloads that do not serialize, serialize to nothing or exceed the
    /// per-item cap are dropped and reported as [`EnqueueOutcome::Dropped`].
    /// Only a failed append or a shut down dispatcher is an error.
    pub async fn perform_enqueue(self: &Arc<Self>, payload: &EventPayload) -> Result<EnqueueOutcome> {
        ensure!(
            !self.is_shutdown(),
            IllegalStateSnafu {
                message: "cannot enqueue after shutdown",
            }
        );

        let map = payload.to_map();
        let Some(json) = self
            .serializer
            .to_json(&map)
            .filter(|json| !json.trim().is_empty())
        else {
            warn!(tag = %self.tag, message_id = payload.message_id(), "payload did not serialize, dropping");
            return Ok(self.dropped("serialization"));
        };
        if json.len() > self.limits.max_payload_size {
            warn!(
                tag = %self.tag,
                message_id = payload.message_id(),
                len = json.len(),
                max = self.limits.max_payload_size,
                "payload exceeds maximum size, dropping"
            );
            return Ok(self.dropped("oversize"));
        }
        let record = match self.crypto.encrypt(json.into_bytes()) {
            Ok(record) => record,
            Err(e) => {
                warn!(tag = %self.tag, error = %e, "payload could not be encrypted, dropping");
                return Ok(self.dropped("encrypt"));
            }
        };

        if self.size() >= self.limits.max_queue_size {
            self.evict_oldest().await;
        }

        let size = {
            let mut queue = self.queue.lock();
            queue.append(&record).context(StorageSnafu)?;
            queue.size()
        };
        metrics::EVENTS_ENQUEUED.with_label_values(&[&self.tag]).inc();
        metrics::record_queue_size(&self.tag, size);
        debug!(tag = %self.tag, queue_size = size, kind = payload.kind().type_name(), "enqueued payload");

        if size >= self.limits.flush_queue_size {
            self.submit_flush();
        }
        Ok(EnqueueOutcome::Appended { size })
    }

    fn dropped(&self, reason: &'static str) -> EnqueueOutcome {
        metrics::record_dropped(&self.tag, reason);
        EnqueueOutcome::Dropped { reason }
    }

    async fn evict_oldest(&self) {
        let flush = self.flush_lock.lock().await;
        {
            let mut queue = self.queue.lock();
            if queue.size() >= self.limits.max_queue_size {
                match queue.remove(1) {
                    Ok(()) => {
                        metrics::EVENTS_EVICTED.with_label_values(&[&self.tag]).inc();
                        warn!(tag = %self.tag, max = self.limits.max_queue_size, "queue at capacity, evicted oldest payload");
                    }
                    Err(e) => error!(tag = %self.tag, error = %e, "failed to evict oldest payload"),
                }
            }
        }
        drop(flush);
        self.close_if_shutdown();
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Requests a flush. Rejected only after shutdown.
    pub fn flush(self: &Arc<Self>) -> Result<()> {
        ensure!(
            !self.is_shutdown(),
            IllegalStateSnafu {
                message: "cannot flush after shutdown",
            }
        );
        self.submit_flush();
        Ok(())
    }

    /// Hands a flush to the network executor when connectivity is available,
    /// the queue is non-empty and no flush is in flight.
    ///
    /// Returns whether a flush job was submitted.
    pub fn submit_flush(self: &Arc<Self>) -> bool {
        if self.is_shutdown() || self.network.is_shutdown() {
            return false;
        }
        if !self.connectivity.is_available() {
            debug!(tag = %self.tag, "no connectivity, skipping flush");
            return false;
        }
        if self.size() == 0 {
            return false;
        }
        if self
            .state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(tag = %self.tag, "flush already in flight");
            return false;
        }

        let this = Arc::clone(self);
        let job = Box::pin(async move {
            this.perform_flush().await;
            this.state.in_flight.store(false, Ordering::Release);
        });
        if let Err(e) = self.network.execute(job) {
            self.state.in_flight.store(false, Ordering::Release);
            warn!(tag = %self.tag, error = %e, "flush not submitted");
            return false;
        }
        true
    }

    /// Uploads batches until the queue is empty or an upload must be retried
    /// later.
    pub async fn perform_flush(&self) {
        let flush = self.flush_lock.lock().await;
        while !self.is_shutdown() {
            if !self.connectivity.is_available() {
                debug!(tag = %self.tag, "connectivity lost, stopping flush");
                break;
            }
            match self.flush_batch().await {
                Ok(BatchOutcome::Removed) if self.size() > 0 => {}
                Ok(_) => break,
                Err(e) => {
                    error!(tag = %self.tag, kind = e.kind(), error = %e, "flush failed, records kept");
                    break;
                }
            }
        }
        drop(flush);
        self.close_if_shutdown();
    }

    async fn flush_batch(&self) -> Result<BatchOutcome> {
        if self.size() == 0 {
            return Ok(BatchOutcome::Empty);
        }
        let (connection, staged, written) = self.stage()?;

        if staged == 0 {
            warn!(
                tag = %self.tag,
                max = self.limits.max_batch_size,
                "oldest payload exceeds batch size, dropping"
            );
            self.remove_front(1)?;
            metrics::record_dropped(&self.tag, "oversize");
            return Ok(BatchOutcome::Removed);
        }
        if written == 0 {
            self.remove_front(staged)?;
            return Ok(BatchOutcome::Removed);
        }

        self.state.flush_count.fetch_add(1, Ordering::AcqRel);
        match connection.close().await {
            Ok(body) => {
                self.remove_front(staged)?;
                metrics::EVENTS_UPLOADED
                    .with_label_values(&[&self.tag])
                    .inc_by(written as u64);
                self.record_flush("success");
                info!(tag = %self.tag, count = written, queue_size = self.size(), "uploaded batch");
                self.dispatch_actions(&body);
                Ok(BatchOutcome::Removed)
            }
            Err(e) if e.should_discard_batch() => {
                self.record_flush(e.kind());
                warn!(tag = %self.tag, count = staged, error = %e, "batch rejected, discarding");
                self.remove_front(staged)?;
                Ok(BatchOutcome::Removed)
            }
            Err(e) => {
                self.record_flush(e.kind());
                if matches!(e, Error::Throttled { .. }) {
                    info!(tag = %self.tag, count = staged, "upload throttled, will retry");
                } else {
                    warn!(tag = %self.tag, count = staged, error = %e, "upload failed, will retry");
                }
                Ok(BatchOutcome::Retained)
            }
        }
    }

    /// Copies the oldest records into a new upload body.
    ///
    /// Returns the connection, how many records were consumed from the queue
    /// and how many of them made it into the body. Records that fail to
    /// decrypt are consumed but not written.
    fn stage(&self) -> Result<(Connection, usize, usize)> {
        let mut writer = BatchWriter::new(self.client.upload(), self.limits.max_batch_size)?;
        let mut failure = None;
        let staged = self
            .queue
            .lock()
            .for_each(&mut |record| {
                let plain = match self.crypto.decrypt(record) {
                    Ok(plain) => plain,
                    Err(e) => {
                        warn!(tag = %self.tag, error = %e, "queued payload could not be decrypted, dropping");
                        metrics::record_dropped(&self.tag, "decrypt");
                        return true;
                    }
                };
                writer.try_emit(&plain).unwrap_or_else(|e| {
                    failure = Some(e);
                    false
                })
            })
            .context(StorageSnafu)?;
        if let Some(e) = failure {
            return Err(e);
        }

        let mut metadata = JsonMap::new();
        metadata.insert(
            "sentAt".into(),
            Value::from(self.precision.format(&self.clock.now())),
        );
        let (connection, written) = writer.finish(&metadata)?;
        Ok((connection, staged, written))
    }

    /// Hands every action in a successful response to the action handler.
    /// A malformed body or a panicking handler is logged and skipped.
    fn dispatch_actions(&self, body: &str) {
        let Some(handler) = &self.actions else {
            return;
        };
        if body.trim().is_empty() {
            return;
        }
        let actions = match extract_actions(body) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(tag = %self.tag, error = %e, "could not parse upload response");
                return;
            }
        };
        for action in actions {
            let name = action.get("action").and_then(Value::as_str).unwrap_or_default().to_string();
            let handled = panic::catch_unwind(AssertUnwindSafe(|| handler.handle_action(action)));
            if handled.is_err() {
                error!(tag = %self.tag, action = %name, "action handler panicked");
            }
        }
    }

    fn remove_front(&self, count: usize) -> Result<()> {
        let size = {
            let mut queue = self.queue.lock();
            queue.remove(count).context(StorageSnafu)?;
            queue.size()
        };
        metrics::record_queue_size(&self.tag, size);
        Ok(())
    }

    fn record_flush(&self, outcome: &str) {
        metrics::FLUSHES
            .with_label_values(&[self.tag.as_str(), outcome])
            .inc();
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stops accepting work and closes the queue. An in-flight flush runs to
    /// completion and closes the queue when it releases the flush lock.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.state.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.flush_lock.try_lock().is_err() {
            debug!(tag = %self.tag, "flush in flight, queue closes when it completes");
        }
        self.close_if_shutdown();
        info!(tag = %self.tag, "dispatcher shut down");
    }

    /// Closes the queue once shut down, unless another holder of the flush
    /// lock will do it on release.
    fn close_if_shutdown(&self) {
        if !self.is_shutdown() {
            return;
        }
        if let Ok(_flush) = self.flush_lock.try_lock() {
            self.close_queue();
        }
    }

    fn close_queue(&self) {
        if let Err(e) = self.queue.lock().close() {
            error!(tag = %self.tag, error = %e, "failed to close queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use beacon_common_storage_queue::MemoryQueue;
    use serde_json::json;

    use super::*;
    use crate::{
        client::{Transport, UploadRequest, UploadResponse},
        executor::InlineExecutor,
        payload::EventKind,
    };

    #[derive(Default)]
    struct StubTransport {
        bodies: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn post(&self, request: UploadRequest) -> Result<UploadResponse> {
            self.bodies
                .lock()
                .push(serde_json::from_slice(&request.body).unwrap());
            Ok(UploadResponse {
                status: 200,
                reason: "OK".into(),
                body:   String::new(),
            })
        }
    }

    fn dispatcher(config: &AnalyticsConfig, transport: Arc<StubTransport>) -> Arc<Dispatcher> {
        Arc::new(
            Dispatcher::builder()
                .config(config)
                .queue(Box::new(MemoryQueue::new()))
                .client(UploadClient::new(config, transport))
                .network(Arc::new(InlineExecutor::new()))
                .build(),
        )
    }

    fn track(event: &str) -> EventPayload {
        EventPayload::builder()
            .kind(EventKind::Track {
                event:      event.into(),
                properties: JsonMap::new(),
            })
            .anonymous_id("anon")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_flush_at_threshold_uploads_in_order() {
        let config = AnalyticsConfig::builder()
            .write_key("wk")
            .flush_queue_size(3)
            .build();
        let transport = Arc::new(StubTransport::default());
        let dispatcher = dispatcher(&config, transport.clone());

        for event in ["a", "b", "c"] {
            dispatcher.perform_enqueue(&track(event)).await.unwrap();
        }

        assert_eq!(dispatcher.size(), 0);
        assert_eq!(dispatcher.state().flush_count(), 1);
        let bodies = transport.bodies.lock();
        let events: Vec<_> = bodies[0]["batch"]
            .as_array()
            .unwrap()
            .iter()
            .map(|event| event["event"].clone())
            .collect();
        assert_eq!(events, vec![json!("a"), json!("b"), json!("c")]);
        assert!(bodies[0]["sentAt"].is_string());
    }

    #[tokio::test]
    async fn test_oversize_head_is_dropped_without_upload() {
        let config = AnalyticsConfig::builder()
            .write_key("wk")
            .max_batch_size(10)
            .build();
        let transport = Arc::new(StubTransport::default());
        let dispatcher = dispatcher(&config, transport.clone());

        dispatcher.perform_enqueue(&track("big")).await.unwrap();
        dispatcher.perform_flush().await;

        assert_eq!(dispatcher.size(), 0);
        assert!(transport.bodies.lock().is_empty());
    }

    #[test]
    fn test_initial_flush_delay() {
        let config = AnalyticsConfig::builder()
            .write_key("wk")
            .flush_queue_size(1)
            .build();
        let mut queue = MemoryQueue::new();
        queue.append(b"{}").unwrap();
        let dispatcher = Dispatcher::builder()
            .config(&config)
            .queue(Box::new(queue))
            .client(UploadClient::new(&config, Arc::new(StubTransport::default())))
            .network(Arc::new(InlineExecutor::new()))
            .build();

        let interval = Duration::from_secs(30);
        assert_eq!(dispatcher.initial_flush_delay(interval), Duration::ZERO);
    }
}
