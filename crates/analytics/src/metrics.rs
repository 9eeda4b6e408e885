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

use std::sync::LazyLock;

use prometheus::{IntCounterVec, IntGaugeVec, register_int_counter_vec, register_int_gauge_vec};

pub const TAG_LABEL: &str = "tag";
pub const REASON_LABEL: &str = "reason";
pub const OUTCOME_LABEL: &str = "outcome";

pub static EVENTS_ENQUEUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "beacon_events_enqueued_total",
        "Total number of events appended to the queue",
        &[TAG_LABEL]
    )
    .unwrap()
});

pub static EVENTS_DROPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "beacon_events_dropped_total",
        "Total number of events dropped before or after queueing",
        &[TAG_LABEL, REASON_LABEL]
    )
    .unwrap()
});

pub static EVENTS_EVICTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "beacon_events_evicted_total",
        "Total number of queued events evicted at capacity",
        &[TAG_LABEL]
    )
    .unwrap()
});

pub static FLUSHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "beacon_flushes_total",
        "Total number of batch uploads by outcome",
        &[TAG_LABEL, OUTCOME_LABEL]
    )
    .unwrap()
});

pub static EVENTS_UPLOADED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "beacon_events_uploaded_total",
        "Total number of events accepted by the server",
        &[TAG_LABEL]
    )
    .unwrap()
});

pub static QUEUE_SIZE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "beacon_queue_size",
        "Number of events currently queued",
        &[TAG_LABEL]
    )
    .unwrap()
});

pub(crate) fn record_dropped(tag: &str, reason: &str) {
    EVENTS_DROPPED.with_label_values(&[tag, reason]).inc();
}

pub(crate) fn record_queue_size(tag: &str, size: usize) {
    QUEUE_SIZE
        .with_label_values(&[tag])
        .set(i64::try_from(size).unwrap_or(i64::MAX));
}
