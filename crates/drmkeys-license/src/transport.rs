//! Transport abstraction for license requests.
//!
//! License requests go straight to an HTTP client rather than through the
//! generic loader: they need custom headers and bodies, and a request that is
//! superseded must be abortable. Aborting is done by dropping the future, so
//! implementations must be cancel-safe.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{LicenseError, Result};

/// An outgoing license request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl LicenseRequest {
    pub fn new(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Set a header, replacing any existing value (names compare
    /// case-insensitively).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A license server response. Any status is returned as a response; only
/// failures to complete the exchange are errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Bytes,
}

/// Transport trait for license HTTP requests.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LicenseTransport: Send + Sync {
    /// POST `request` and return the binary response.
    async fn post(&self, request: LicenseRequest) -> Result<LicenseResponse>;
}

/// `reqwest`-backed license transport.
#[derive(Clone, Default)]
pub struct HttpLicenseTransport {
    client: reqwest::Client,
}

impl HttpLicenseTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LicenseTransport for HttpLicenseTransport {
    async fn post(&self, request: LicenseRequest) -> Result<LicenseResponse> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| LicenseError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LicenseError::Transport(e.to_string()))?;

        Ok(LicenseResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// A scripted license server for testing.
pub mod memory {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// One scripted reply.
    #[derive(Clone, Debug)]
    pub struct ScriptedResponse {
        pub status: u16,
        pub body: Bytes,
        pub delay: Option<Duration>,
    }

    impl ScriptedResponse {
        pub fn ok(body: impl Into<Bytes>) -> Self {
            Self {
                status: 200,
                body: body.into(),
                delay: None,
            }
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                body: Bytes::new(),
                delay: None,
            }
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    struct Inner {
        queue: VecDeque<ScriptedResponse>,
        fallback: ScriptedResponse,
        requests: Vec<LicenseRequest>,
    }

    /// Replies from a queue, then with the fallback, recording every attempt.
    pub struct ScriptedLicenseServer {
        inner: Mutex<Inner>,
    }

    impl ScriptedLicenseServer {
        /// A server answering every request with `200 license`.
        pub fn new() -> Self {
            Self::always(ScriptedResponse::ok(Bytes::from_static(b"license")))
        }

        pub fn always(response: ScriptedResponse) -> Self {
            Self {
                inner: Mutex::new(Inner {
                    queue: VecDeque::new(),
                    fallback: response,
                    requests: Vec::new(),
                }),
            }
        }

        /// Queue a reply used before the fallback.
        pub fn push(&self, response: ScriptedResponse) {
            self.inner.lock().unwrap().queue.push_back(response);
        }

        pub fn set_fallback(&self, response: ScriptedResponse) {
            self.inner.lock().unwrap().fallback = response;
        }

        /// Number of POSTs received, including ones later aborted.
        pub fn attempts(&self) -> usize {
            self.inner.lock().unwrap().requests.len()
        }

        pub fn requests(&self) -> Vec<LicenseRequest> {
            self.inner.lock().unwrap().requests.clone()
        }
    }

    impl Default for ScriptedLicenseServer {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LicenseTransport for ScriptedLicenseServer {
        async fn post(&self, request: LicenseRequest) -> Result<LicenseResponse> {
            let reply = {
                let mut inner = self.inner.lock().unwrap();
                inner.requests.push(request);
                inner
                    .queue
                    .pop_front()
                    .unwrap_or_else(|| inner.fallback.clone())
            };

            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }

            Ok(LicenseResponse {
                status: reply.status,
                status_text: if reply.status == 200 {
                    "OK".into()
                } else {
                    "scripted failure".into()
                },
                body: reply.body,
            })
        }
    }
}
