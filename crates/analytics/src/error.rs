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

use beacon_common_storage_queue::QueueError;
use snafu::Snafu;

/// Result type for SDK operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the SDK.
///
/// Only [`Error::IllegalState`] and [`Error::InvalidArgument`] reach the
/// public call surface. Everything else is caught at the dispatcher, logged
/// and counted.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Queue storage failed: {source}"))]
    Storage {
        source: QueueError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Could not serialize payload: {reason}"))]
    Serialization { reason: String },

    #[snafu(display("Batch envelope could not be completed: {source}"))]
    IncompleteDocument {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// 3xx and 4xx other than 429. The batch is dropped.
    #[snafu(display("Batch rejected with HTTP {status} {reason}: {body}"))]
    RejectedBatch {
        status: u16,
        reason: String,
        body:   String,
    },

    /// 429. The batch is kept for the next flush.
    #[snafu(display("Upload throttled (HTTP 429): {body}"))]
    Throttled { body: String },

    /// 5xx. The batch is kept for the next flush.
    #[snafu(display("Server error HTTP {status} {reason}: {body}"))]
    Server {
        status: u16,
        reason: String,
        body:   String,
    },

    #[snafu(display("HTTP request failed: {source}"))]
    Http {
        source: reqwest::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Upload transport failed: {message}"))]
    Transport { message: String },

    #[snafu(display("Illegal state: {message}"))]
    IllegalState { message: String },

    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument { message: String },

    #[snafu(display("Failed to build runtime: {source}"))]
    Runtime { source: std::io::Error },

    #[snafu(display("Preferences I/O failed at {}: {source}", path.display()))]
    PreferencesIo {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Preferences file {} is not valid JSON: {source}", path.display()))]
    PreferencesFormat {
        path:   PathBuf,
        source: serde_json::Error,
    },
}

impl Error {
    /// Whether a failed upload should leave its records queued.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Server { .. } | Self::Http { .. } | Self::Transport { .. }
        )
    }

    /// Whether a failed upload should still remove its staged records.
    pub const fn should_discard_batch(&self) -> bool { matches!(self, Self::RejectedBatch { .. }) }

    /// Short label used for metrics and structured logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "storage",
            Self::Serialization { .. } => "serialization",
            Self::IncompleteDocument { .. } => "incomplete_document",
            Self::RejectedBatch { .. } => "rejected",
            Self::Throttled { .. } => "throttled",
            Self::Server { .. } => "server",
            Self::Http { .. } | Self::Transport { .. } => "transport",
            Self::IllegalState { .. } => "illegal_state",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::Runtime { .. } => "runtime",
            Self::PreferencesIo { .. } | Self::PreferencesFormat { .. } => "preferences",
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn rejected() -> Error {
        Error::RejectedBatch {
            status: 400,
            reason: "Bad Request".into(),
            body:   String::new(),
        }
    }

    fn server() -> Error {
        Error::Server {
            status: 503,
            reason: "Service Unavailable".into(),
            body:   String::new(),
        }
    }

    #[test_case(rejected(), false, true ; "rejected batch is dropped")]
    #[test_case(Error::Throttled { body: String::new() }, true, false ; "throttled is kept")]
    #[test_case(server(), true, false ; "server error is kept")]
    #[test_case(Error::Transport { message: "reset".into() }, true, false ; "transport is kept")]
    #[test_case(Error::IllegalState { message: "shutdown".into() }, false, false ; "illegal state")]
    fn test_retry_classification(err: Error, retryable: bool, discard: bool) {
        assert_eq!(err.is_retryable(), retryable);
        assert_eq!(err.should_discard_batch(), discard);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            rejected().to_string(),
            "Batch rejected with HTTP 400 Bad Request: "
        );
        assert_eq!(rejected().kind(), "rejected");
    }
}
