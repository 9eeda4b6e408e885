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

//! HTTP upload of batch documents.

use std::{io, sync::Arc};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    config::AnalyticsConfig,
    error::{HttpSnafu, RejectedBatchSnafu, Result, ServerSnafu, ThrottledSnafu},
};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Value of the `User-Agent` header on every upload.
pub fn user_agent() -> String { format!("beacon/{}", env!("CARGO_PKG_VERSION")) }

/// `Basic base64("<write_key>:")`.
pub fn authorization_header(write_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{write_key}:")))
}

/// One fully buffered POST.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url:           String,
    pub authorization: String,
    pub body:          Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub reason: String,
    pub body:   String,
}

/// Sends an upload and hands back whatever the server answered.
///
/// Implementations return `Err` only when no response was obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: UploadRequest) -> Result<UploadResponse>;
}

/// [`Transport`] over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &AnalyticsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(user_agent())
            .build()
            .context(HttpSnafu)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: UploadRequest) -> Result<UploadResponse> {
        let response = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(AUTHORIZATION, request.authorization)
            .body(request.body)
            .send()
            .await
            .context(HttpSnafu)?;

        let status = response.status();
        // The body is diagnostic only; a failed read must not mask the status.
        let body = response.text().await.unwrap_or_default();
        Ok(UploadResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// Opens [`Connection`]s against the configured batch endpoint.
#[derive(Clone)]
pub struct UploadClient {
    transport:     Arc<dyn Transport>,
    url:           String,
    authorization: String,
}

impl std::fmt::Debug for UploadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadClient").field("url", &self.url).finish_non_exhaustive()
    }
}

impl UploadClient {
    pub fn new(config: &AnalyticsConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            url: config.upload_url(),
            authorization: authorization_header(&config.write_key),
        }
    }

    pub fn url(&self) -> &str { &self.url }

    /// Starts a new upload. Bytes written to the connection form the body.
    pub fn upload(&self) -> Connection {
        Connection {
            transport:     Arc::clone(&self.transport),
            url:           self.url.clone(),
            authorization: self.authorization.clone(),
            body:          Vec::new(),
        }
    }
}

/// Writable upload body plus the request it will be sent with.
pub struct Connection {
    transport:     Arc<dyn Transport>,
    url:           String,
    authorization: String,
    body:          Vec<u8>,
}

impl Connection {
    pub const fn body_len(&self) -> usize { self.body.len() }

    /// Sends the body and classifies the response.
    ///
    /// 2xx succeeds with the response body. 429 is
    /// [`Throttled`](crate::Error::Throttled), other 3xx and 4xx are
    /// [`RejectedBatch`](crate::Error::RejectedBatch), and every other status
    /// is a [`Server`](crate::Error::Server) error.
    pub async fn close(self) -> Result<String> {
        let response = self
            .transport
            .post(UploadRequest {
                url:           self.url,
                authorization: self.authorization,
                body:          Bytes::from(self.body),
            })
            .await?;
        classify(response)
    }
}

impl io::Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

fn classify(response: UploadResponse) -> Result<String> {
    let UploadResponse {
        status,
        reason,
        body,
    } = response;
    if (200..300).contains(&status) {
        if !body.trim().is_empty() {
            debug!(status, %body, "upload accepted with response body");
        }
        return Ok(body);
    }
    ensure!(status != 429, ThrottledSnafu { body });
    ensure!(
        !(300..500).contains(&status),
        RejectedBatchSnafu {
            status,
            reason,
            body,
        }
    );
    ServerSnafu {
        status,
        reason,
        body,
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_case::test_case;

    use super::*;
    use crate::error::Error;

    fn response(status: u16) -> UploadResponse {
        UploadResponse {
            status,
            reason: String::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(authorization_header("foo"), "Basic Zm9vOg==");
    }

    #[test_case(200, None ; "ok")]
    #[test_case(204, None ; "no content")]
    #[test_case(302, Some("rejected") ; "redirect is rejected")]
    #[test_case(400, Some("rejected") ; "bad request")]
    #[test_case(413, Some("rejected") ; "payload too large")]
    #[test_case(429, Some("throttled") ; "too many requests")]
    #[test_case(500, Some("server") ; "internal error")]
    #[test_case(503, Some("server") ; "unavailable")]
    fn test_classify(status: u16, expected: Option<&str>) {
        let result = classify(response(status));
        assert_eq!(result.err().as_ref().map(Error::kind), expected);
    }

    #[test]
    fn test_success_returns_body() {
        let body = classify(UploadResponse {
            status: 200,
            reason: "OK".into(),
            body:   r#"{"actions":[]}"#.into(),
        })
        .unwrap();
        assert_eq!(body, r#"{"actions":[]}"#);
    }

    struct Recording(parking_lot::Mutex<Vec<UploadRequest>>);

    #[async_trait]
    impl Transport for Recording {
        async fn post(&self, request: UploadRequest) -> Result<UploadResponse> {
            self.0.lock().push(request);
            Ok(response(200))
        }
    }

    #[tokio::test]
    async fn test_connection_sends_written_bytes() {
        let transport = Arc::new(Recording(parking_lot::Mutex::new(Vec::new())));
        let config = AnalyticsConfig::builder()
            .write_key("wk")
            .endpoint("http://localhost:1")
            .build();
        let client = UploadClient::new(&config, transport.clone());

        let mut connection = client.upload();
        connection.write_all(b"{\"batch\":[]}").unwrap();
        assert_eq!(connection.body_len(), 12);
        connection.close().await.unwrap();

        let sent = transport.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "http://localhost:1/v1/batch");
        assert_eq!(sent[0].authorization, authorization_header("wk"));
        assert_eq!(&sent[0].body[..], b"{\"batch\":[]}");
    }
}
