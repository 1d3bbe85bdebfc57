//! URL-keyed store of the last known fetch result and of who is watching it.

use super::subscriptions::SubscriptionId;
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Cache entry for one URL
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub data: Option<Value>,
    pub error: Option<String>,
    /// `None` until the first fetch for this URL completes
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub subscribers: BTreeSet<SubscriptionId>,
}

impl CacheEntry {
    /// A URL in the "never fetched" state has neither data nor error.
    pub fn has_result(&self) -> bool {
        self.last_fetch_time.is_some()
    }

    pub fn snapshot(&self) -> CachedData {
        CachedData {
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetch_time: self.last_fetch_time,
        }
    }

    fn record(&mut self, outcome: Result<Value, FetchError>, at: DateTime<Utc>) {
        match outcome {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(err) => {
                self.data = None;
                self.error = Some(err.to_string());
            }
        }
        self.last_fetch_time = Some(at);
    }
}

/// Read-only copy of a cache entry handed out by `get_cached_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedData {
    pub data: Option<Value>,
    pub error: Option<String>,
    pub last_fetch_time: Option<DateTime<Utc>>,
}

/// How many subscriber-less results are kept before the oldest is evicted.
pub const DEFAULT_ORPHAN_LIMIT: usize = 256;

#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    /// Subscriber-less URLs, oldest first
    orphans: VecDeque<String>,
    orphan_limit: usize,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_orphan_limit(DEFAULT_ORPHAN_LIMIT)
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orphan_limit(orphan_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            orphans: VecDeque::new(),
            orphan_limit,
        }
    }

    /// Registers interest, creating the entry on first use.
    pub fn add_subscriber(&mut self, url: &str, id: SubscriptionId) {
        self.entries
            .entry(url.to_string())
            .or_default()
            .subscribers
            .insert(id);
    }

    /// Drops interest. Returns `true` when this was the last subscriber and
    /// the entry itself was deleted.
    pub fn remove_subscriber(&mut self, url: &str, id: SubscriptionId) -> bool {
        let Some(entry) = self.entries.get_mut(url) else {
            return false;
        };
        entry.subscribers.remove(&id);
        if entry.subscribers.is_empty() {
            self.entries.remove(url);
            return true;
        }
        false
    }

    /// Stores a completed fetch. A URL nobody subscribes to (a force-fetch of
    /// an unknown URL, or a fetch that outlived its last subscriber) still gets
    /// an entry so the result stays readable.
    /// Subscriber-less entries are bounded by the orphan limit.
    pub fn record(&mut self, url: &str, outcome: Result<Value, FetchError>) {
        let entry = self.entries.entry(url.to_string()).or_default();
        entry.record(outcome, Utc::now());
        if entry.subscribers.is_empty() {
            self.track_orphan(url);
        }
    }

    fn track_orphan(&mut self, url: &str) {
        let entries = &self.entries;
        self.orphans.retain(|u| {
            u != url && entries.get(u).is_some_and(|entry| entry.subscribers.is_empty())
        });
        self.orphans.push_back(url.to_string());

        while self.orphans.len() > self.orphan_limit {
            let Some(oldest) = self.orphans.pop_front() else {
                break;
            };
            debug!("Evicting unsubscribed cache entry for {}", oldest);
            self.entries.remove(&oldest);
        }
    }

    pub fn get(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    pub fn snapshot(&self, url: &str) -> Option<CachedData> {
        self.entries.get(url).map(CacheEntry::snapshot)
    }

    pub fn has_result(&self, url: &str) -> bool {
        self.entries.get(url).is_some_and(CacheEntry::has_result)
    }

    pub fn subscribers(&self, url: &str) -> Vec<SubscriptionId> {
        self.entries
            .get(url)
            .map(|entry| entry.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub fn subscriber_counts(&self) -> BTreeMap<String, usize> {
        self.entries
            .iter()
            .map(|(url, entry)| (url.clone(), entry.subscribers.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.orphans.clear();
    }
}
