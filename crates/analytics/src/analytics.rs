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

//! The public SDK handle.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use beacon_common_storage_queue::{MemoryQueue, PayloadQueue, QueueConfig, QueueFile};
use bon::bon;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use snafu::ensure;
use tokio::{runtime::Runtime, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    actions::ActionHandler,
    client::{HttpTransport, Transport, UploadClient},
    collaborators::{AlwaysConnected, Clock, Connectivity, Crypto, JsonSerializer, NoCrypto, Serializer, SystemClock},
    config::AnalyticsConfig,
    dispatcher::Dispatcher,
    error::{IllegalStateSnafu, InvalidArgumentSnafu, Result},
    executor::{Executor, SerialExecutor},
    payload::{EventKind, EventPayload, JsonMap, TimestampPrecision, Traits},
    preferences::{FilePreferences, MemoryPreferences, Preferences, opt_out_key, traits_key},
    runtime::RuntimeOptions,
    scheduler,
};

pub(crate) const PUSH_TOKEN_EVENT: &str = "snapyr.hidden.fcmTokenSet";
pub(crate) const PUSH_RECEIVED_EVENT: &str = "snapyr.observation.event.Impression";
pub(crate) const PUSH_CLICKED_EVENT: &str = "snapyr.observation.event.Behavior";

/// State shared between the handle and the jobs it submits.
pub(crate) struct Shared {
    pub(crate) config:      AnalyticsConfig,
    pub(crate) dispatcher:  Arc<Dispatcher>,
    pub(crate) preferences: Arc<dyn Preferences>,
    clock:                  Arc<dyn Clock>,
    precision:              TimestampPrecision,
    context:                JsonMap,
    traits:                 Mutex<Traits>,
    push_token:             Mutex<Option<String>>,
    opted_out:              AtomicBool,
    pub(crate) foregrounded: AtomicBool,
}

impl Shared {
    /// Builds the payload against the current identity and appends it.
    async fn produce(&self, kind: EventKind, timestamp: DateTime<Utc>, user_id: Option<String>) {
        let traits = self.traits.lock().clone();
        let mut context = self.context.clone();
        context.insert("traits".into(), Value::Object(traits.to_map()));

        let payload = EventPayload::builder()
            .kind(kind)
            .timestamp(timestamp)
            .precision(self.precision)
            .context(context)
            .anonymous_id(traits.anonymous_id)
            .maybe_user_id(user_id.or(traits.user_id))
            .build();
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!(tag = %self.config.tag, error = %e, "dropping invalid payload");
                return;
            }
        };

        if self.opted_out.load(Ordering::Acquire) {
            debug!(tag = %self.config.tag, kind = payload.kind().type_name(), "opted out, not enqueueing");
            return;
        }
        if let Err(e) = self.dispatcher.perform_enqueue(&payload).await {
            error!(tag = %self.config.tag, kind = e.kind(), error = %e, "failed to enqueue payload");
        }
    }

    fn persist_traits(&self, traits: &Traits) {
        if let Err(e) = self
            .preferences
            .set(&traits_key(&self.config.tag), Value::Object(traits.to_map()))
        {
            warn!(tag = %self.config.tag, error = %e, "failed to persist traits");
        }
    }
}

/// An SDK instance.
///
/// Public calls validate their arguments and return immediately; the event
/// is built and queued on the producer executor, and uploads happen on the
/// network executor.
pub struct Analytics {
    pub(crate) shared: Arc<Shared>,
    producer:          Arc<dyn Executor>,
    network:           Arc<dyn Executor>,
    scheduler:         CancellationToken,
    shutdown:          AtomicBool,
    runtime:           Option<Runtime>,
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("tag", &self.shared.config.tag)
            .field("dispatcher", &self.shared.dispatcher)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

#[bon]
impl Analytics {
    /// Creates an instance.
    ///
    /// Collaborators left unset get the production defaults: reqwest
    /// transport, on-disk queue and preferences under `queue_dir`, and
    /// serial executors on a runtime owned by the instance.
    #[builder]
    pub fn new(
        config: AnalyticsConfig,
        transport: Option<Arc<dyn Transport>>,
        queue: Option<Box<dyn PayloadQueue>>,
        preferences: Option<Arc<dyn Preferences>>,
        producer: Option<Arc<dyn Executor>>,
        network: Option<Arc<dyn Executor>>,
        #[builder(default = Arc::new(JsonSerializer))] serializer: Arc<dyn Serializer>,
        #[builder(default = Arc::new(NoCrypto))] crypto: Arc<dyn Crypto>,
        #[builder(default = Arc::new(AlwaysConnected))] connectivity: Arc<dyn Connectivity>,
        #[builder(default = Arc::new(SystemClock))] clock: Arc<dyn Clock>,
        // Receives actions returned by successful uploads.
        action_handler: Option<Arc<dyn ActionHandler>>,
        // Merged into every payload context.
        #[builder(default)]
        context: JsonMap,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = RuntimeOptions::from(&config).create()?;
        let producer = producer.unwrap_or_else(|| Arc::new(SerialExecutor::new("producer", runtime.handle())));
        let network = network.unwrap_or_else(|| Arc::new(SerialExecutor::new("network", runtime.handle())));

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        let queue = queue.unwrap_or_else(|| open_queue(&config));
        let preferences = preferences.unwrap_or_else(|| open_preferences(&config));

        let dispatcher = Arc::new(
            Dispatcher::builder()
                .config(&config)
                .queue(queue)
                .client(UploadClient::new(&config, transport))
                .network(Arc::clone(&network))
                .serializer(serializer)
                .crypto(crypto)
                .connectivity(connectivity)
                .clock(Arc::clone(&clock))
                .maybe_action_handler(action_handler)
                .build(),
        );

        let traits = preferences
            .get(&traits_key(&config.tag))
            .and_then(|value| match value {
                Value::Object(map) => Traits::from_map(map),
                _ => None,
            })
            .unwrap_or_default();
        let opted_out = preferences
            .get(&opt_out_key(&config.tag))
            .and_then(|value| value.as_bool())
            .unwrap_or(false);

        let precision = if config.nanosecond_timestamps {
            TimestampPrecision::Nanos
        } else {
            TimestampPrecision::Millis
        };
        let shared = Arc::new(Shared {
            context: base_context(&config, context),
            config,
            dispatcher,
            preferences,
            clock,
            precision,
            traits: Mutex::new(traits.clone()),
            push_token: Mutex::new(None),
            opted_out: AtomicBool::new(opted_out),
            foregrounded: AtomicBool::new(false),
        });
        shared.persist_traits(&traits);

        let token = CancellationToken::new();
        scheduler::spawn_periodic_flush(
            runtime.handle(),
            Arc::clone(&shared.dispatcher),
            shared.config.flush_interval,
            token.clone(),
        );

        info!(
            tag = %shared.config.tag,
            queue_size = shared.dispatcher.size(),
            anonymous_id = %traits.anonymous_id,
            "analytics instance started"
        );
        Ok(Self {
            shared,
            producer,
            network,
            scheduler: token,
            shutdown: AtomicBool::new(false),
            runtime: Some(runtime),
        })
    }
}

fn open_queue(config: &AnalyticsConfig) -> Box<dyn PayloadQueue> {
    match QueueFile::open_or_recreate(QueueConfig::new(config.queue_path())) {
        Ok(queue) => Box::new(queue),
        Err(e) => {
            error!(tag = %config.tag, error = %e, "could not open disk queue, falling back to memory queue");
            Box::new(MemoryQueue::new())
        }
    }
}

fn open_preferences(config: &AnalyticsConfig) -> Arc<dyn Preferences> {
    let path = config.queue_dir.join(format!("{}-preferences.json", config.tag));
    match FilePreferences::open(path) {
        Ok(preferences) => Arc::new(preferences),
        Err(e) => {
            error!(tag = %config.tag, error = %e, "could not open preferences, keeping them in memory");
            Arc::new(MemoryPreferences::default())
        }
    }
}

fn base_context(config: &AnalyticsConfig, extra: JsonMap) -> JsonMap {
    let mut context = JsonMap::new();
    context.insert(
        "library".into(),
        json!({ "name": "beacon", "version": env!("CARGO_PKG_VERSION") }),
    );
    context.insert(
        "app".into(),
        json!({ "version": config.app_version, "build": config.app_build }),
    );
    context.extend(extra);
    context
}

fn non_blank(value: Option<&str>) -> Option<&str> { value.filter(|v| !v.trim().is_empty()) }

impl Analytics {
    // ========================================================================
    // Events
    // ========================================================================

    /// Associates the current user with `user_id` and/or `traits`.
    ///
    /// Traits merge into the stored ones and are persisted. The push token,
    /// if any, is sent again afterwards.
    pub fn identify(&self, user_id: Option<&str>, traits: Option<JsonMap>) -> Result<()> {
        self.ensure_running()?;
        let user_id = non_blank(user_id);
        let update = traits.unwrap_or_default();
        ensure!(
            user_id.is_some() || !update.is_empty(),
            InvalidArgumentSnafu {
                message: "either userId or some traits must be provided",
            }
        );

        let merged = {
            let mut current = self.shared.traits.lock();
            if let Some(user_id) = user_id {
                current.user_id = Some(user_id.to_string());
            }
            current.merge(&update);
            current.clone()
        };
        self.shared.persist_traits(&merged);

        self.submit(
            EventKind::Identify {
                traits: merged.to_map(),
            },
            None,
        )?;

        let token = self.shared.push_token.lock().clone();
        if let Some(token) = token {
            self.submit(push_token_event(&token), None)?;
        }
        Ok(())
    }

    pub fn track(&self, event: &str, properties: Option<JsonMap>) -> Result<()> {
        self.submit(
            EventKind::Track {
                event:      event.to_string(),
                properties: properties.unwrap_or_default(),
            },
            None,
        )
    }

    /// Records a screen view. At least one of `category` and `name` is
    /// required.
    pub fn screen(&self, category: Option<&str>, name: Option<&str>, properties: Option<JsonMap>) -> Result<()> {
        self.submit(
            EventKind::Screen {
                name:       non_blank(name).map(str::to_string),
                category:   non_blank(category).map(str::to_string),
                properties: properties.unwrap_or_default(),
            },
            None,
        )
    }

    pub fn group(&self, group_id: &str, traits: Option<JsonMap>) -> Result<()> {
        self.submit(
            EventKind::Group {
                group_id: group_id.to_string(),
                traits:   traits.unwrap_or_default(),
            },
            None,
        )
    }

    /// Links the current identity to `new_id`.
    pub fn alias(&self, new_id: &str) -> Result<()> {
        ensure!(
            non_blank(Some(new_id)).is_some(),
            InvalidArgumentSnafu {
                message: "new id must not be empty",
            }
        );
        let previous_id = self.shared.traits.lock().current_id().to_string();
        self.submit(EventKind::Alias { previous_id }, Some(new_id.to_string()))
    }

    // ========================================================================
    // Push notifications
    // ========================================================================

    pub fn set_push_token(&self, token: &str) -> Result<()> {
        ensure!(
            non_blank(Some(token)).is_some(),
            InvalidArgumentSnafu {
                message: "push token must not be empty",
            }
        );
        *self.shared.push_token.lock() = Some(token.to_string());
        self.submit(push_token_event(token), None)
    }

    pub fn push_notification_received(&self, properties: Option<JsonMap>) -> Result<()> {
        self.track(PUSH_RECEIVED_EVENT, properties)
    }

    pub fn push_notification_clicked(&self, properties: Option<JsonMap>) -> Result<()> {
        self.track(PUSH_CLICKED_EVENT, properties)
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Requests an upload of everything queued so far.
    pub fn flush(&self) -> Result<()> {
        self.ensure_running()?;
        let dispatcher = Arc::clone(&self.shared.dispatcher);
        self.producer.execute(Box::pin(async move {
            if let Err(e) = dispatcher.flush() {
                debug!(error = %e, "flush skipped");
            }
        }))
    }

    /// Resolves once every job submitted to the producer before this call
    /// has run.
    pub async fn barrier(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.producer.execute(Box::pin(async move {
            let _ = tx.send(());
        }))?;
        rx.await.map_err(|_| {
            IllegalStateSnafu {
                message: "producer stopped before the barrier ran",
            }
            .build()
        })
    }

    /// While opted out, events are built but never queued.
    pub fn opt_out(&self, opt_out: bool) -> Result<()> {
        self.ensure_running()?;
        self.shared.opted_out.store(opt_out, Ordering::Release);
        self.shared
            .preferences
            .set(&opt_out_key(&self.shared.config.tag), Value::Bool(opt_out))
    }

    pub fn is_opted_out(&self) -> bool { self.shared.opted_out.load(Ordering::Acquire) }

    /// Forgets the user: stored traits and user id are replaced by a fresh
    /// anonymous identity. Queued events are kept.
    pub fn reset(&self) -> Result<()> {
        self.ensure_running()?;
        let fresh = Traits::anonymous();
        *self.shared.traits.lock() = fresh.clone();
        self.shared.persist_traits(&fresh);
        info!(tag = %self.shared.config.tag, anonymous_id = %fresh.anonymous_id, "identity reset");
        Ok(())
    }

    /// Stops the instance. Events submitted before this call are still
    /// queued; every later call fails. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.cancel();

        let dispatcher = Arc::clone(&self.shared.dispatcher);
        let last = Box::pin(async move { dispatcher.shutdown() });
        if let Err(e) = self.producer.execute(last) {
            debug!(error = %e, "producer already stopped");
            self.shared.dispatcher.shutdown();
        }
        self.producer.shutdown();
        self.network.shutdown();
        info!(tag = %self.shared.config.tag, "analytics instance shut down");
    }

    pub fn is_shutdown(&self) -> bool { self.shutdown.load(Ordering::Acquire) }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn queue_size(&self) -> usize { self.shared.dispatcher.size() }

    pub fn flush_count(&self) -> u64 { self.shared.dispatcher.state().flush_count() }

    pub fn traits(&self) -> Traits { self.shared.traits.lock().clone() }

    pub fn config(&self) -> &AnalyticsConfig { &self.shared.config }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn ensure_running(&self) -> Result<()> {
        ensure!(
            !self.is_shutdown(),
            IllegalStateSnafu {
                message: "analytics instance is shut down",
            }
        );
        Ok(())
    }

    /// Validates `kind` and hands it to the producer executor.
    pub(crate) fn submit(&self, kind: EventKind, user_id: Option<String>) -> Result<()> {
        self.ensure_running()?;
        kind.validate()?;
        let timestamp = self.shared.clock.now();
        let shared = Arc::clone(&self.shared);
        self.producer
            .execute(Box::pin(async move { shared.produce(kind, timestamp, user_id).await }))
    }
}

impl Drop for Analytics {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn push_token_event(token: &str) -> EventKind {
    let mut properties = JsonMap::new();
    properties.insert("token".into(), Value::from(token));
    EventKind::Track {
        event: PUSH_TOKEN_EVENT.to_string(),
        properties,
    }
}
