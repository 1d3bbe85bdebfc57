//! Network boundary: one plain HTTP GET per fetch, JSON body expected.

use crate::config::Config;
use crate::error::{FetchError, PollerError};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Source of JSON documents keyed by URL.
///
/// Implementations report every failure as a `FetchError` value; the manager
/// stores its text in the cache and never propagates it further.
#[async_trait]
pub trait HttpSource: Send + Sync + 'static {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

/// `HttpSource` backed by a shared `reqwest::Client`. No auth, no custom
/// headers beyond the user agent, no retries.
#[derive(Debug, Clone)]
pub struct ReqwestSource {
    client: Client,
}

impl ReqwestSource {
    pub fn new(request_timeout: Duration, user_agent: &str) -> Result<Self, PollerError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn from_config(config: &Config) -> Result<Self, PollerError> {
        Self::new(
            Duration::from_secs(config.request_timeout_secs),
            &config.user_agent,
        )
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSource for ReqwestSource {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
            ));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
