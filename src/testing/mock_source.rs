//! Scriptable in-memory `HttpSource`
//!
//! Serves canned JSON, status errors, transport failures or malformed
//! bodies per URL, optionally after an artificial latency, and counts every
//! call so tests can assert on request collapsing.

use crate::data::HttpSource;
use crate::error::FetchError;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// What a mocked URL answers with
#[derive(Debug, Clone)]
pub enum MockResponse {
    Json(Value),
    Status(u16, String),
    Transport(String),
    /// A 200 whose body is not valid JSON
    Malformed(String),
}

#[derive(Debug, Default)]
pub struct MockHttpSource {
    responses: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockHttpSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = latency;
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn set_response(&self, url: &str, response: MockResponse) {
        lock(&self.responses).insert(url.to_string(), response);
    }

    pub fn set_json(&self, url: &str, value: Value) {
        self.set_response(url, MockResponse::Json(value));
    }

    pub fn call_count(&self, url: &str) -> usize {
        lock(&self.calls).get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }
}

#[async_trait]
impl HttpSource for MockHttpSource {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        *lock(&self.calls).entry(url.to_string()).or_insert(0) += 1;
        let latency = *lock(&self.latency);
        debug!("mock GET {} (latency {:?})", url, latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        // Looked up after the delay so a test can change the answer mid-flight.
        let response = lock(&self.responses).get(url).cloned();
        match response {
            Some(MockResponse::Json(value)) => Ok(value),
            Some(MockResponse::Status(status, reason)) => Err(FetchError::status(status, reason)),
            Some(MockResponse::Transport(message)) => Err(FetchError::Transport(message)),
            Some(MockResponse::Malformed(body)) => Ok(serde_json::from_str(&body)?),
            None => Err(FetchError::status(404, "Not Found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn serves_scripted_responses_and_counts_calls() {
        let source = MockHttpSource::new();
        source.set_json("a", json!({"ok": true}));
        source.set_response("b", MockResponse::Malformed("{oops".into()));

        assert_eq!(source.get_json("a").await.unwrap(), json!({"ok": true}));
        assert!(matches!(source.get_json("b").await, Err(FetchError::Decode(_))));
        assert_eq!(
            source.get_json("c").await.unwrap_err().to_string(),
            "HTTP 404: Not Found"
        );
        assert_eq!(source.call_count("a"), 1);
        assert_eq!(source.total_calls(), 3);
    }
}
