//! Notification fan-out.
//!
//! Planning happens under the manager lock and produces owned
//! `Notification`s; delivery happens after the lock is released, so a
//! callback may call back into the manager.

use super::cache::CacheStore;
use super::mode::FetchMode;
use super::subscriptions::{
    MultiSourceCallback, MultiSourceSubscription, SingleSourceCallback, SubscriptionId,
    SubscriptionKind, SubscriptionRegistry,
};
use log::error;
use serde_json::Value;
use std::{
    any::Any,
    collections::{BTreeSet, HashMap},
    panic::{catch_unwind, AssertUnwindSafe},
    time::Duration,
};
use tokio::time::Instant;

/// Which subscribers a completed fetch should consider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyScope {
    /// Shared fetch: every subscriber of the URL, subject to pacing
    All,
    /// Per-subscriber fetches (async mode timers) that collapsed onto one request
    Only(BTreeSet<SubscriptionId>),
}

impl NotifyScope {
    pub fn subscriber(id: SubscriptionId) -> Self {
        NotifyScope::Only(BTreeSet::from([id]))
    }

    pub fn includes(&self, id: SubscriptionId) -> bool {
        match self {
            NotifyScope::All => true,
            NotifyScope::Only(ids) => ids.contains(&id),
        }
    }

    /// Widens this scope to also cover `other`.
    pub fn merge(&mut self, other: NotifyScope) {
        match (&mut *self, other) {
            (NotifyScope::All, _) => {}
            (_, NotifyScope::All) => *self = NotifyScope::All,
            (NotifyScope::Only(mine), NotifyScope::Only(theirs)) => mine.extend(theirs),
        }
    }
}

/// One callback invocation, with everything it needs already copied out of
/// the cache.
pub enum Notification {
    Single {
        id: SubscriptionId,
        callback: SingleSourceCallback,
        data: Option<Value>,
        error: Option<String>,
    },
    Multi {
        id: SubscriptionId,
        callback: MultiSourceCallback,
        data_by_url: HashMap<String, Value>,
        error_by_url: Option<HashMap<String, String>>,
    },
}

impl Notification {
    pub fn subscription(&self) -> SubscriptionId {
        match self {
            Notification::Single { id, .. } | Notification::Multi { id, .. } => *id,
        }
    }

    /// Invokes the callback. A panicking subscriber is logged and swallowed.
    pub fn deliver(self) {
        let id = self.subscription();
        let result = match self {
            Notification::Single {
                callback,
                data,
                error,
                ..
            } => catch_unwind(AssertUnwindSafe(|| callback(data.as_ref(), error.as_deref())))
                .map_err(|panic| ("single-source", panic)),
            Notification::Multi {
                callback,
                data_by_url,
                error_by_url,
                ..
            } => catch_unwind(AssertUnwindSafe(|| callback(&data_by_url, error_by_url.as_ref())))
                .map_err(|panic| ("multi-source", panic)),
        };

        if let Err((kind, panic)) = result {
            error!(
                "Error in {} callback {}: {}",
                kind,
                id,
                panic_message(panic.as_ref())
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Pacing test. Async mode never debounces because each subscriber's own
/// timer already paces it.
fn is_due(mode: FetchMode, last: Option<Instant>, frequency: Duration, now: Instant) -> bool {
    mode == FetchMode::Async
        || last.map_or(true, |last| now.saturating_duration_since(last) >= frequency)
}

/// Builds the combined payload for a multi-source subscription, or `None`
/// while any of its URLs has never been fetched.
pub fn combined_notification(
    cache: &CacheStore,
    id: SubscriptionId,
    sub: &MultiSourceSubscription,
) -> Option<Notification> {
    let mut data_by_url = HashMap::new();
    let mut error_by_url = HashMap::new();

    for url in &sub.urls {
        let entry = cache.get(url).filter(|entry| entry.has_result())?;
        if let Some(data) = &entry.data {
            data_by_url.insert(url.clone(), data.clone());
        }
        if let Some(err) = &entry.error {
            error_by_url.insert(url.clone(), err.clone());
        }
    }

    Some(Notification::Multi {
        id,
        callback: sub.callback.clone(),
        data_by_url,
        error_by_url: (!error_by_url.is_empty()).then_some(error_by_url),
    })
}

/// Decides who hears about a fresh result for `url`, updating their pacing
/// timestamps as it goes.
pub fn plan_for_update(
    cache: &CacheStore,
    registry: &mut SubscriptionRegistry,
    mode: FetchMode,
    url: &str,
    scope: &NotifyScope,
    now: Instant,
) -> Vec<Notification> {
    let Some(entry) = cache.get(url) else {
        return Vec::new();
    };

    let mut notifications = Vec::new();
    for id in entry.subscribers.iter().copied().filter(|id| scope.includes(*id)) {
        match id.kind() {
            SubscriptionKind::Single => {
                let Some(sub) = registry.single_mut(id).filter(|sub| sub.url == url) else {
                    continue;
                };
                if !is_due(mode, sub.last_notified_at, sub.frequency, now) {
                    continue;
                }
                sub.last_notified_at = Some(now);
                notifications.push(Notification::Single {
                    id,
                    callback: sub.callback.clone(),
                    data: entry.data.clone(),
                    error: entry.error.clone(),
                });
            }
            SubscriptionKind::Multi => {
                let Some(sub) = registry.multi_mut(id).filter(|sub| sub.references(url)) else {
                    continue;
                };
                let last = sub.last_notified_at_by_url.get(url).copied();
                if !is_due(mode, last, sub.frequency, now) {
                    continue;
                }
                if let Some(notification) = combined_notification(cache, id, sub) {
                    notifications.push(notification);
                }
                sub.last_notified_at_by_url.insert(url.to_string(), now);
            }
        }
    }
    notifications
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type SingleLog = Arc<Mutex<Vec<(Option<Value>, Option<String>)>>>;
    type MultiLog = Arc<Mutex<Vec<(HashMap<String, Value>, Option<HashMap<String, String>>)>>>;

    fn single_recorder() -> (SingleSourceCallback, SingleLog) {
        let log: SingleLog = Arc::default();
        let sink = log.clone();
        let cb: SingleSourceCallback = Arc::new(move |data, err| {
            sink.lock().unwrap().push((data.cloned(), err.map(str::to_string)));
        });
        (cb, log)
    }

    fn multi_recorder() -> (MultiSourceCallback, MultiLog) {
        let log: MultiLog = Arc::default();
        let sink = log.clone();
        let cb: MultiSourceCallback = Arc::new(move |data, errors| {
            sink.lock().unwrap().push((data.clone(), errors.cloned()));
        });
        (cb, log)
    }

    fn deliver_all(notifications: Vec<Notification>) {
        notifications.into_iter().for_each(Notification::deliver);
    }

    #[test]
    fn scope_merge_widens() {
        let a = SubscriptionId::new(1, SubscriptionKind::Single);
        let b = SubscriptionId::new(2, SubscriptionKind::Single);

        let mut scope = NotifyScope::subscriber(a);
        scope.merge(NotifyScope::subscriber(b));
        assert!(scope.includes(a) && scope.includes(b));

        scope.merge(NotifyScope::All);
        assert_eq!(scope, NotifyScope::All);

        scope.merge(NotifyScope::subscriber(a));
        assert_eq!(scope, NotifyScope::All);
    }

    #[tokio::test(start_paused = true)]
    async fn single_source_is_paced_in_sync_mode() {
        let mut cache = CacheStore::new();
        let mut registry = SubscriptionRegistry::new();
        let (cb, log) = single_recorder();
        let id = registry.insert_single("a".into(), Duration::from_secs(2), cb);
        cache.add_subscriber("a", id);
        cache.record("a", Ok(json!(1)));

        let t0 = Instant::now();
        let plan = plan_for_update(&cache, &mut registry, FetchMode::Sync, "a", &NotifyScope::All, t0);
        deliver_all(plan);

        let plan = plan_for_update(
            &cache,
            &mut registry,
            FetchMode::Sync,
            "a",
            &NotifyScope::All,
            t0 + Duration::from_secs(1),
        );
        assert!(plan.is_empty());

        let plan = plan_for_update(
            &cache,
            &mut registry,
            FetchMode::Sync,
            "a",
            &NotifyScope::All,
            t0 + Duration::from_secs(2),
        );
        deliver_all(plan);

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(log.lock().unwrap()[0], (Some(json!(1)), None));
    }

    #[tokio::test(start_paused = true)]
    async fn async_mode_skips_pacing() {
        let mut cache = CacheStore::new();
        let mut registry = SubscriptionRegistry::new();
        let (cb, log) = single_recorder();
        let id = registry.insert_single("a".into(), Duration::from_secs(60), cb);
        cache.add_subscriber("a", id);
        cache.record("a", Ok(json!("x")));

        let now = Instant::now();
        for _ in 0..3 {
            deliver_all(plan_for_update(
                &cache,
                &mut registry,
                FetchMode::Async,
                "a",
                &NotifyScope::All,
                now,
            ));
        }
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_restricts_recipients() {
        let mut cache = CacheStore::new();
        let mut registry = SubscriptionRegistry::new();
        let (cb1, log1) = single_recorder();
        let (cb2, log2) = single_recorder();
        let id1 = registry.insert_single("a".into(), Duration::ZERO, cb1);
        let id2 = registry.insert_single("a".into(), Duration::ZERO, cb2);
        cache.add_subscriber("a", id1);
        cache.add_subscriber("a", id2);
        cache.record("a", Ok(json!(true)));

        deliver_all(plan_for_update(
            &cache,
            &mut registry,
            FetchMode::Async,
            "a",
            &NotifyScope::subscriber(id2),
            Instant::now(),
        ));
        assert!(log1.lock().unwrap().is_empty());
        assert_eq!(log2.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn multi_source_waits_for_every_url_then_reports_partial_failure() {
        let mut cache = CacheStore::new();
        let mut registry = SubscriptionRegistry::new();
        let (cb, log) = multi_recorder();
        let id = registry.insert_multi(vec!["a".into(), "b".into()], Duration::ZERO, cb);
        cache.add_subscriber("a", id);
        cache.add_subscriber("b", id);

        cache.record("a", Ok(json!({"rate": 3})));
        let now = Instant::now();
        deliver_all(plan_for_update(&cache, &mut registry, FetchMode::Sync, "a", &NotifyScope::All, now));
        assert!(log.lock().unwrap().is_empty());
        // the attempt still counts against "a"'s pacing clock
        assert_eq!(
            registry.multi(id).unwrap().last_notified_at_by_url.get("a"),
            Some(&now)
        );

        cache.record("b", Err(FetchError::status(502, "Bad Gateway")));
        deliver_all(plan_for_update(&cache, &mut registry, FetchMode::Sync, "b", &NotifyScope::All, now));

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let (data, errors) = &log[0];
        assert_eq!(data, &HashMap::from([("a".to_string(), json!({"rate": 3}))]));
        assert_eq!(
            errors.as_ref(),
            Some(&HashMap::from([("b".to_string(), "HTTP 502: Bad Gateway".to_string())]))
        );
    }

    #[test]
    fn combined_error_map_is_none_when_all_sources_succeed() {
        let mut cache = CacheStore::new();
        let mut registry = SubscriptionRegistry::new();
        let (cb, _log) = multi_recorder();
        let id = registry.insert_multi(vec!["a".into(), "b".into()], Duration::ZERO, cb);
        cache.record("a", Ok(json!(1)));
        cache.record("b", Ok(json!(2)));

        let Some(Notification::Multi { data_by_url, error_by_url, .. }) =
            combined_notification(&cache, id, registry.multi(id).unwrap())
        else {
            panic!("expected a combined notification");
        };
        assert_eq!(data_by_url.len(), 2);
        assert!(error_by_url.is_none());
    }

    #[test]
    fn panicking_callback_is_contained() {
        let id = SubscriptionId::new(1, SubscriptionKind::Single);
        let callback: SingleSourceCallback = Arc::new(|_, _| panic!("subscriber blew up"));
        Notification::Single {
            id,
            callback,
            data: None,
            error: Some("boom".into()),
        }
        .deliver();
    }
}
