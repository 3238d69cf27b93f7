//! License round trip: request shaping, retry policy, response transform.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use drmkeys_core::{unwrap_key_message, KeySystem, MessageType};

use crate::error::{LicenseError, Result};
use crate::transport::{LicenseRequest, LicenseResponse, LicenseTransport};

/// Retry and timeout bounds for one kind of network load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPolicy {
    /// Retries after the first attempt.
    pub max_num_retry: u32,
    /// Per-attempt timeout in milliseconds.
    pub max_load_time_ms: u64,
}

impl LoadPolicy {
    pub fn max_load_time(&self) -> Duration {
        Duration::from_millis(self.max_load_time_ms)
    }
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            max_num_retry: 0,
            max_load_time_ms: 20_000,
        }
    }
}

/// What a license request is for; handed to site callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseContext {
    pub key_system: KeySystem,
    pub key_id: Option<String>,
    pub session_id: String,
    pub message_type: MessageType,
}

/// Site callback shaping the outgoing request (URL, headers, body).
pub type RequestSetup =
    Arc<dyn Fn(&mut LicenseRequest, &LicenseContext) -> anyhow::Result<()> + Send + Sync>;

/// Site callback rewriting the license bytes before they reach the CDM.
pub type ResponseTransform =
    Arc<dyn Fn(Bytes, &LicenseContext) -> anyhow::Result<Bytes> + Send + Sync>;

/// Optional site callbacks for the license round trip.
#[derive(Clone, Default)]
pub struct LicenseHooks {
    pub request_setup: Option<RequestSetup>,
    pub response_transform: Option<ResponseTransform>,
}

impl std::fmt::Debug for LicenseHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseHooks")
            .field("request_setup", &self.request_setup.is_some())
            .field("response_transform", &self.response_transform.is_some())
            .finish()
    }
}

/// Performs license round trips against one transport.
#[derive(Clone)]
pub struct LicenseClient {
    transport: Arc<dyn LicenseTransport>,
    policy: LoadPolicy,
    hooks: LicenseHooks,
    strict: bool,
}

impl LicenseClient {
    pub fn new(transport: Arc<dyn LicenseTransport>, policy: LoadPolicy) -> Self {
        Self {
            transport,
            policy,
            hooks: LicenseHooks::default(),
            strict: false,
        }
    }

    pub fn with_hooks(mut self, hooks: LicenseHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Surface request-setup failures instead of falling back.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// POST `challenge` to `url` and return the license bytes.
    ///
    /// A 200 succeeds. Any 4xx fails at once. Other statuses, transport
    /// errors and timeouts are retried until `max_num_retry` retries have
    /// been spent, so at most `max_num_retry + 1` attempts are made.
    pub async fn request(
        &self,
        context: &LicenseContext,
        url: &str,
        challenge: Bytes,
    ) -> Result<Bytes> {
        let request = self.build_request(context, url, challenge)?;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            tracing::debug!(
                "license request {} for {} attempt {}",
                context.message_type,
                context.key_system,
                attempts
            );

            let response = self.attempt(request.clone()).await;
            if response.status == 200 {
                return Ok(self.transform(response.body, context));
            }

            let client_error = (400..500).contains(&response.status);
            if client_error || attempts > self.policy.max_num_retry {
                tracing::warn!(
                    "license request failed: {} {} after {} attempt(s)",
                    response.status,
                    response.status_text,
                    attempts
                );
                return Err(LicenseError::RequestFailed {
                    status: response.status,
                    status_text: response.status_text,
                    attempts,
                });
            }

            tracing::warn!(
                "license request returned {} ({}), retrying ({}/{})",
                response.status,
                response.status_text,
                attempts,
                self.policy.max_num_retry
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn build_request(
        &self,
        context: &LicenseContext,
        url: &str,
        challenge: Bytes,
    ) -> Result<LicenseRequest> {
        let mut request = LicenseRequest::new(url, challenge);
        if let Some(setup) = &self.hooks.request_setup {
            let mut shaped = request.clone();
            match setup(&mut shaped, context) {
                Ok(()) => request = shaped,
                Err(e) if self.strict => return Err(LicenseError::Setup(e.to_string())),
                Err(e) => {
                    tracing::warn!("license request setup failed, sending unshaped request: {e:#}")
                }
            }
        }

        // Setup may replace the challenge; unwrap whatever it left.
        if context.key_system == KeySystem::PlayReady {
            let unwrapped = unwrap_key_message(&request.body)
                .map_err(|e| LicenseError::KeyMessage(e.to_string()))?;
            request.body = unwrapped.body;
            for (name, value) in unwrapped.headers {
                request.set_header(name, value);
            }
        }
        Ok(request)
    }

    /// One bounded attempt. Failures to complete map to status 0.
    async fn attempt(&self, request: LicenseRequest) -> LicenseResponse {
        let timeout = self.policy.max_load_time();
        match tokio::time::timeout(timeout, self.transport.post(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => LicenseResponse {
                status: 0,
                status_text: e.to_string(),
                body: Bytes::new(),
            },
            Err(_) => LicenseResponse {
                status: 0,
                status_text: format!("timed out after {:?}", timeout),
                body: Bytes::new(),
            },
        }
    }

    fn transform(&self, body: Bytes, context: &LicenseContext) -> Bytes {
        let Some(transform) = &self.hooks.response_transform else {
            return body;
        };
        match transform(body.clone(), context) {
            Ok(transformed) => transformed,
            Err(e) => {
                tracing::warn!("license response transform failed, using raw response: {e:#}");
                body
            }
        }
    }
}
