//! Subscription registry: who wants which URL(s), how often, and where to
//! deliver it.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;

/// Callback for a single-source subscription: `(data, error)`.
pub type SingleSourceCallback = Arc<dyn Fn(Option<&Value>, Option<&str>) + Send + Sync>;

/// Callback for a multi-source subscription: `(data_by_url, error_by_url)`.
/// The error map is `None` unless at least one source currently has an error.
pub type MultiSourceCallback =
    Arc<dyn Fn(&HashMap<String, Value>, Option<&HashMap<String, String>>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Single,
    Multi,
}

/// Handle returned by `subscribe` / `subscribe_multiple`.
///
/// Sequence numbers are shared by both kinds, so ordering by ID is ordering
/// by registration time. Renders as `single_<n>` / `multi_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId {
    seq: u64,
    kind: SubscriptionKind,
}

impl SubscriptionId {
    pub fn new(seq: u64, kind: SubscriptionKind) -> Self {
        Self { seq, kind }
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SubscriptionKind::Single => write!(f, "single_{}", self.seq),
            SubscriptionKind::Multi => write!(f, "multi_{}", self.seq),
        }
    }
}

impl Serialize for SubscriptionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Longest pacing interval accepted; larger requests are clamped to it.
pub const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Converts a requested frequency in seconds into a pacing interval.
/// Negative or NaN requests collapse to zero (always due); anything past
/// `MAX_UPDATE_INTERVAL`, infinity included, saturates to it.
pub fn frequency_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs < 0.0 {
        log::warn!("Invalid update frequency {}s, treating it as 0s", secs);
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_UPDATE_INTERVAL)
        .min(MAX_UPDATE_INTERVAL)
}

pub struct SingleSourceSubscription {
    pub url: String,
    pub frequency: Duration,
    pub callback: SingleSourceCallback,
    pub last_notified_at: Option<Instant>,
}

pub struct MultiSourceSubscription {
    /// Registration order, duplicates removed
    pub urls: Vec<String>,
    pub frequency: Duration,
    pub callback: MultiSourceCallback,
    pub last_notified_at_by_url: HashMap<String, Instant>,
}

impl MultiSourceSubscription {
    pub fn references(&self, url: &str) -> bool {
        self.urls.iter().any(|u| u == url)
    }
}

/// A subscription taken out of the registry by `remove`.
pub enum RemovedSubscription {
    Single(SingleSourceSubscription),
    Multi(MultiSourceSubscription),
}

impl RemovedSubscription {
    pub fn urls(&self) -> Vec<String> {
        match self {
            RemovedSubscription::Single(sub) => vec![sub.url.clone()],
            RemovedSubscription::Multi(sub) => sub.urls.clone(),
        }
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_seq: u64,
    single: HashMap<SubscriptionId, SingleSourceSubscription>,
    multi: HashMap<SubscriptionId, MultiSourceSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self, kind: SubscriptionKind) -> SubscriptionId {
        self.next_seq += 1;
        SubscriptionId::new(self.next_seq, kind)
    }

    pub fn insert_single(
        &mut self,
        url: String,
        frequency: Duration,
        callback: SingleSourceCallback,
    ) -> SubscriptionId {
        let id = self.next_id(SubscriptionKind::Single);
        self.single.insert(
            id,
            SingleSourceSubscription {
                url,
                frequency,
                callback,
                last_notified_at: None,
            },
        );
        id
    }

    pub fn insert_multi(
        &mut self,
        urls: Vec<String>,
        frequency: Duration,
        callback: MultiSourceCallback,
    ) -> SubscriptionId {
        let id = self.next_id(SubscriptionKind::Multi);
        let mut seen = BTreeSet::new();
        let urls = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();
        self.multi.insert(
            id,
            MultiSourceSubscription {
                urls,
                frequency,
                callback,
                last_notified_at_by_url: HashMap::new(),
            },
        );
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<RemovedSubscription> {
        match id.kind() {
            SubscriptionKind::Single => self.single.remove(&id).map(RemovedSubscription::Single),
            SubscriptionKind::Multi => self.multi.remove(&id).map(RemovedSubscription::Multi),
        }
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        match id.kind() {
            SubscriptionKind::Single => self.single.contains_key(&id),
            SubscriptionKind::Multi => self.multi.contains_key(&id),
        }
    }

    pub fn single(&self, id: SubscriptionId) -> Option<&SingleSourceSubscription> {
        self.single.get(&id)
    }

    pub fn single_mut(&mut self, id: SubscriptionId) -> Option<&mut SingleSourceSubscription> {
        self.single.get_mut(&id)
    }

    pub fn multi(&self, id: SubscriptionId) -> Option<&MultiSourceSubscription> {
        self.multi.get(&id)
    }

    pub fn multi_mut(&mut self, id: SubscriptionId) -> Option<&mut MultiSourceSubscription> {
        self.multi.get_mut(&id)
    }

    /// Requested frequency of `id`, provided the subscription actually
    /// references `url`.
    pub fn frequency_for(&self, id: SubscriptionId, url: &str) -> Option<Duration> {
        match id.kind() {
            SubscriptionKind::Single => self
                .single
                .get(&id)
                .filter(|sub| sub.url == url)
                .map(|sub| sub.frequency),
            SubscriptionKind::Multi => self
                .multi
                .get(&id)
                .filter(|sub| sub.references(url))
                .map(|sub| sub.frequency),
        }
    }

    /// Every URL referenced by any live subscription.
    pub fn all_urls(&self) -> BTreeSet<String> {
        self.single
            .values()
            .map(|sub| sub.url.clone())
            .chain(self.multi.values().flat_map(|sub| sub.urls.iter().cloned()))
            .collect()
    }

    pub fn single_count(&self) -> usize {
        self.single.len()
    }

    pub fn multi_count(&self) -> usize {
        self.multi.len()
    }

    pub fn clear(&mut self) {
        self.single.clear();
        self.multi.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_single() -> SingleSourceCallback {
        Arc::new(|_, _| {})
    }

    fn noop_multi() -> MultiSourceCallback {
        Arc::new(|_, _| {})
    }

    #[test]
    fn ids_are_unique_across_kinds_and_render_with_prefix() {
        let mut registry = SubscriptionRegistry::new();
        let a = registry.insert_single("https://x/a".into(), Duration::from_secs(1), noop_single());
        let b = registry.insert_multi(vec!["https://x/b".into()], Duration::from_secs(1), noop_multi());
        assert_eq!(a.to_string(), "single_1");
        assert_eq!(b.to_string(), "multi_2");
        assert!(a < b);
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"multi_2\"");
    }

    #[test]
    fn multi_urls_are_deduplicated_in_order() {
        let mut registry = SubscriptionRegistry::new();
        let id = registry.insert_multi(
            vec!["b".into(), "a".into(), "b".into(), "c".into()],
            Duration::from_secs(2),
            noop_multi(),
        );
        assert_eq!(registry.multi(id).unwrap().urls, vec!["b", "a", "c"]);
    }

    #[test]
    fn frequency_lookup_requires_matching_url() {
        let mut registry = SubscriptionRegistry::new();
        let id = registry.insert_single("a".into(), Duration::from_millis(1500), noop_single());
        assert_eq!(registry.frequency_for(id, "a"), Some(Duration::from_millis(1500)));
        assert_eq!(registry.frequency_for(id, "b"), None);
    }

    #[test]
    fn remove_returns_touched_urls() {
        let mut registry = SubscriptionRegistry::new();
        let id = registry.insert_multi(vec!["a".into(), "b".into()], Duration::ZERO, noop_multi());
        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.urls(), vec!["a", "b"]);
        assert!(registry.remove(id).is_none());
        assert!(!registry.contains(id));
    }

    #[test]
    fn all_urls_is_the_union() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert_single("a".into(), Duration::ZERO, noop_single());
        registry.insert_multi(vec!["a".into(), "c".into()], Duration::ZERO, noop_multi());
        let urls: Vec<String> = registry.all_urls().into_iter().collect();
        assert_eq!(urls, vec!["a", "c"]);
    }

    #[test]
    fn invalid_frequencies_collapse_to_zero() {
        assert_eq!(frequency_from_secs(-1.0), Duration::ZERO);
        assert_eq!(frequency_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(frequency_from_secs(0.25), Duration::from_millis(250));
    }

    #[test]
    fn huge_frequencies_saturate_instead_of_polling_fast() {
        assert_eq!(frequency_from_secs(f64::INFINITY), MAX_UPDATE_INTERVAL);
        assert_eq!(frequency_from_secs(1e19), MAX_UPDATE_INTERVAL);
        assert_eq!(frequency_from_secs(1e30), MAX_UPDATE_INTERVAL);
        assert_eq!(frequency_from_secs(86_400.0), Duration::from_secs(86_400));
    }
}
