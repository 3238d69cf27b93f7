//! Generic loader contract used for certificate fetches.
//!
//! Mirrors the player's pluggable loader: a context describing what to fetch,
//! a config bounding the attempt, and an outcome that is either the payload or
//! one of error / timeout / abort.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LoaderError;

/// Expected response type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
    ArrayBuffer,
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderContext {
    pub url: String,
    pub response_type: ResponseType,
}

impl LoaderContext {
    pub fn binary(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            response_type: ResponseType::ArrayBuffer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    pub timeout: Duration,
    pub max_retry: u32,
    pub retry_delay: Duration,
}

impl LoaderConfig {
    /// Single attempt bounded by `timeout`.
    pub fn single_attempt(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retry: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Pluggable loader.
#[async_trait]
pub trait CertificateLoader: Send + Sync {
    async fn load(
        &self,
        context: LoaderContext,
        config: LoaderConfig,
    ) -> Result<Bytes, LoaderError>;
}

/// `reqwest`-backed loader. Retries are honoured as configured, though
/// certificate fetches always ask for a single attempt.
#[derive(Clone, Default)]
pub struct HttpLoader {
    client: reqwest::Client,
}

impl HttpLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn attempt(&self, url: &str) -> Result<Bytes, LoaderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoaderError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(LoaderError::Http {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        response
            .bytes()
            .await
            .map_err(|e| LoaderError::Transport(e.to_string()))
    }
}

#[async_trait]
impl CertificateLoader for HttpLoader {
    async fn load(
        &self,
        context: LoaderContext,
        config: LoaderConfig,
    ) -> Result<Bytes, LoaderError> {
        let mut retries = 0;
        loop {
            let outcome = match tokio::time::timeout(config.timeout, self.attempt(&context.url)).await
            {
                Ok(result) => result,
                Err(_) => Err(LoaderError::Timeout),
            };
            match outcome {
                Err(e) if retries < config.max_retry => {
                    retries += 1;
                    tracing::debug!("loader retry {} for {}: {}", retries, context.url, e);
                    tokio::time::sleep(config.retry_delay).await;
                }
                other => return other,
            }
        }
    }
}

/// An in-memory loader for testing.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned outcomes by URL and records every load.
    #[derive(Default)]
    pub struct MemoryLoader {
        routes: Mutex<HashMap<String, Result<Bytes, LoaderError>>>,
        loads: Mutex<Vec<(LoaderContext, LoaderConfig)>>,
    }

    impl MemoryLoader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(&self, url: impl Into<String>, outcome: Result<Bytes, LoaderError>) {
            self.routes.lock().unwrap().insert(url.into(), outcome);
        }

        pub fn load_count(&self) -> usize {
            self.loads.lock().unwrap().len()
        }

        pub fn loads(&self) -> Vec<(LoaderContext, LoaderConfig)> {
            self.loads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CertificateLoader for MemoryLoader {
        async fn load(
            &self,
            context: LoaderContext,
            config: LoaderConfig,
        ) -> Result<Bytes, LoaderError> {
            self.loads
                .lock()
                .unwrap()
                .push((context.clone(), config));
            self.routes
                .lock()
                .unwrap()
                .get(&context.url)
                .cloned()
                .unwrap_or(Err(LoaderError::Http {
                    status: 404,
                    text: "Not Found".into(),
                }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryLoader;
    use super::*;

    #[tokio::test]
    async fn test_memory_loader_routes() {
        let loader = MemoryLoader::new();
        loader.serve("https://cert", Ok(Bytes::from_static(b"cert")));

        let config = LoaderConfig::single_attempt(Duration::from_secs(1));
        let ok = loader
            .load(LoaderContext::binary("https://cert"), config.clone())
            .await;
        let missing = loader
            .load(LoaderContext::binary("https://missing"), config)
            .await;

        assert_eq!(ok.unwrap().as_ref(), b"cert");
        assert!(matches!(missing, Err(LoaderError::Http { status: 404, .. })));
        assert_eq!(loader.load_count(), 2);
    }
}
