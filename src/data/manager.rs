//! Data fetch manager
//!
//! Owns the URL-keyed cache, the subscription registry and the timer table,
//! and exposes the subscribe / unsubscribe / force-fetch / mode API that
//! figures use. All state sits behind one mutex; a lock is only ever held
//! for a single synchronous step and never across an `.await`, which keeps
//! every mutation linearized. Callbacks run after the lock is released.

use super::cache::{CachedData, CacheStore};
use super::dispatch::{self, combined_notification, Notification, NotifyScope};
use super::http::{HttpSource, ReqwestSource};
use super::mode::FetchMode;
use super::scheduler::{desired_timers, spawn_ticker, TimerKey, TimerTable, DEFAULT_MIN_INTERVAL};
use super::subscriptions::{
    frequency_from_secs, MultiSourceCallback, SingleSourceCallback, SubscriptionId,
    SubscriptionRegistry,
};
use crate::config::Config;
use crate::error::{FetchError, PollerError};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
    time::Duration,
};
use tokio::{runtime::Handle, task::AbortHandle, time::Instant};

/// Tunables for a manager instance
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub mode: FetchMode,
    /// Floor applied to every timer period
    pub min_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            mode: FetchMode::Sync,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl From<&Config> for ManagerOptions {
    fn from(config: &Config) -> Self {
        Self {
            mode: config.mode,
            min_interval: Duration::from_millis(config.min_interval_ms),
        }
    }
}

/// Awaitable handle on a (possibly shared) in-flight fetch.
///
/// Dropping it does not cancel anything: the request and its cache update
/// run to completion regardless.
#[derive(Clone)]
pub struct FetchHandle(Shared<BoxFuture<'static, ()>>);

impl Future for FetchHandle {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle")
            .field("completed", &self.0.peek().is_some())
            .finish()
    }
}

/// One timer as reported by `get_debug_info`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerInfo {
    pub url: String,
    /// `None` for a shared (sync mode) timer
    pub subscription: Option<SubscriptionId>,
    pub period_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugInfo {
    pub mode: FetchMode,
    pub cached_urls: Vec<String>,
    pub active_timers: Vec<TimerInfo>,
    pub in_flight: Vec<String>,
    pub single_source_subscribers: usize,
    pub multi_source_subscribers: usize,
    pub subscriber_counts: BTreeMap<String, usize>,
}

impl DebugInfo {
    /// Period of the shared timer for `url`, if one is running.
    pub fn shared_timer_period(&self, url: &str) -> Option<f64> {
        self.active_timers
            .iter()
            .find(|t| t.subscription.is_none() && t.url == url)
            .map(|t| t.period_secs)
    }

    pub fn shared_timer_count(&self) -> usize {
        self.active_timers
            .iter()
            .filter(|t| t.subscription.is_none())
            .count()
    }

    pub fn subscriber_timer_count(&self) -> usize {
        self.active_timers
            .iter()
            .filter(|t| t.subscription.is_some())
            .count()
    }
}

struct InFlight {
    ticket: u64,
    handle: FetchHandle,
    scope: NotifyScope,
    abort: AbortHandle,
}

struct ManagerState {
    mode: FetchMode,
    cache: CacheStore,
    registry: SubscriptionRegistry,
    timers: TimerTable,
    in_flight: HashMap<String, InFlight>,
    next_ticket: u64,
}

struct Inner {
    state: Mutex<ManagerState>,
    source: Arc<dyn HttpSource>,
    runtime: Handle,
    min_interval: Duration,
}

/// Shared, cloneable front of the fetch manager.
#[derive(Clone)]
pub struct DataFetchManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for DataFetchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFetchManager")
            .field("mode", &self.get_mode())
            .field("min_interval", &self.inner.min_interval)
            .field("source", &"<dyn HttpSource>")
            .finish()
    }
}

impl DataFetchManager {
    /// Builds a manager on the current tokio runtime with default options.
    pub fn new(source: Arc<dyn HttpSource>) -> Result<Self, PollerError> {
        Self::with_options(source, ManagerOptions::default())
    }

    pub fn with_options(
        source: Arc<dyn HttpSource>,
        options: ManagerOptions,
    ) -> Result<Self, PollerError> {
        let runtime = Handle::try_current().map_err(|e| PollerError::NoRuntime(e.to_string()))?;
        info!(
            "Initializing data fetch manager (mode: {}, min interval: {:?})",
            options.mode, options.min_interval
        );
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ManagerState {
                    mode: options.mode,
                    cache: CacheStore::new(),
                    registry: SubscriptionRegistry::new(),
                    timers: TimerTable::new(),
                    in_flight: HashMap::new(),
                    next_ticket: 0,
                }),
                source,
                runtime,
                min_interval: options.min_interval,
            }),
        })
    }

    /// Production manager talking to the network through `reqwest`.
    pub fn from_config(config: &Config) -> Result<Self, PollerError> {
        let source = ReqwestSource::from_config(config)?;
        Self::with_options(Arc::new(source), ManagerOptions::from(config))
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Subscribes to one URL.
    ///
    /// If the URL already has a result the callback runs before this returns;
    /// otherwise a fetch is started and the callback runs when it lands.
    pub fn subscribe<F>(&self, url: impl Into<String>, frequency_secs: f64, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&Value>, Option<&str>) + Send + Sync + 'static,
    {
        let url = url.into();
        let callback: SingleSourceCallback = Arc::new(callback);

        let (id, immediate) = {
            let mut state = self.inner.lock_state();
            let id = state.registry.insert_single(
                url.clone(),
                frequency_from_secs(frequency_secs),
                callback.clone(),
            );
            state.cache.add_subscriber(&url, id);
            self.inner.reconcile_timers(&mut state, &url);

            let immediate = match state.cache.get(&url) {
                Some(entry) if entry.has_result() => Some(Notification::Single {
                    id,
                    callback,
                    data: entry.data.clone(),
                    error: entry.error.clone(),
                }),
                _ => None,
            };
            if immediate.is_some() {
                if let Some(sub) = state.registry.single_mut(id) {
                    sub.last_notified_at = Some(Instant::now());
                }
            }
            (id, immediate)
        };

        debug!("Subscribed {} to {} every {}s", id, url, frequency_secs);
        match immediate {
            Some(notification) => notification.deliver(),
            None => {
                self.inner.fetch(&url, NotifyScope::All);
            }
        }
        id
    }

    /// Subscribes to a coordinated set of URLs delivered together.
    ///
    /// The callback fires once every URL has some result; the error map is
    /// `None` unless at least one URL currently holds an error.
    pub fn subscribe_multiple<I, S, F>(&self, urls: I, frequency_secs: f64, callback: F) -> SubscriptionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&HashMap<String, Value>, Option<&HashMap<String, String>>) + Send + Sync + 'static,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        let callback: MultiSourceCallback = Arc::new(callback);

        let (id, initial, missing) = {
            let mut state = self.inner.lock_state();
            let id = state
                .registry
                .insert_multi(urls, frequency_from_secs(frequency_secs), callback);
            let urls = state
                .registry
                .multi(id)
                .map(|sub| sub.urls.clone())
                .unwrap_or_default();

            for url in &urls {
                state.cache.add_subscriber(url, id);
                self.inner.reconcile_timers(&mut state, url);
            }

            let initial = state
                .registry
                .multi(id)
                .and_then(|sub| combined_notification(&state.cache, id, sub));
            let missing: Vec<String> = urls
                .into_iter()
                .filter(|url| !state.cache.has_result(url))
                .collect();
            (id, initial, missing)
        };

        debug!("Subscribed {} (multi-source) every {}s", id, frequency_secs);
        if let Some(notification) = initial {
            notification.deliver();
        }
        for url in &missing {
            self.inner.fetch(url, NotifyScope::All);
        }
        id
    }

    /// Removes a subscription of either kind. Unknown IDs are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.inner.lock_state();
        let Some(removed) = state.registry.remove(id) else {
            debug!("Unsubscribe for unknown subscription {} ignored", id);
            return;
        };

        state.timers.cancel_subscriber(id);
        for url in removed.urls() {
            if state.cache.remove_subscriber(&url, id) {
                debug!("Last subscriber left {}, dropping cache entry", url);
            }
            self.inner.reconcile_timers(&mut state, &url);
        }
        debug!("Unsubscribed {}", id);
    }

    pub fn get_cached_data(&self, url: &str) -> Option<CachedData> {
        self.inner.lock_state().cache.snapshot(url)
    }

    /// Fetches `url` now, outside of any timer. Joins the in-flight request
    /// if there is one.
    pub fn force_fetch(&self, url: &str) -> FetchHandle {
        self.inner.fetch(url, NotifyScope::All)
    }

    pub fn force_fetch_multiple<I, S>(&self, urls: I) -> Vec<FetchHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .map(|url| self.inner.fetch(url.as_ref(), NotifyScope::All))
            .collect()
    }

    /// Switches the scheduling policy, rebuilding every timer. Subscriptions
    /// and in-flight requests are left alone.
    pub fn set_mode(&self, mode: FetchMode) {
        let mut state = self.inner.lock_state();
        if state.mode == mode {
            return;
        }
        info!("Switching fetch mode {} -> {}", state.mode, mode);
        state.mode = mode;
        state.timers.clear();
        for url in state.registry.all_urls() {
            self.inner.reconcile_timers(&mut state, &url);
        }
    }

    pub fn get_mode(&self) -> FetchMode {
        self.inner.lock_state().mode
    }

    /// Whether `id` is still registered.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.lock_state().registry.contains(id)
    }

    pub fn get_debug_info(&self) -> DebugInfo {
        let state = self.inner.lock_state();
        let mut in_flight: Vec<String> = state.in_flight.keys().cloned().collect();
        in_flight.sort();
        DebugInfo {
            mode: state.mode,
            cached_urls: state.cache.urls(),
            active_timers: state
                .timers
                .entries()
                .into_iter()
                .map(|(key, period)| TimerInfo {
                    url: key.url().to_string(),
                    subscription: key.subscription(),
                    period_secs: period.as_secs_f64(),
                })
                .collect(),
            in_flight,
            single_source_subscribers: state.registry.single_count(),
            multi_source_subscribers: state.registry.multi_count(),
            subscriber_counts: state.cache.subscriber_counts(),
        }
    }

    /// Cancels every timer and in-flight request and forgets all state.
    pub fn destroy(&self) {
        let mut state = self.inner.lock_state();
        if !state.timers.is_empty() {
            debug!("Cancelling {} timers", state.timers.len());
        }
        state.timers.clear();
        for (_, flight) in state.in_flight.drain() {
            flight.abort.abort();
        }
        let dropped = state.cache.len();
        state.cache.clear();
        state.registry.clear();
        info!("Data fetch manager destroyed ({} cached URLs dropped)", dropped);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        // Callbacks never run under this lock, so poisoning can only come
        // from a bug in here; the state is still structurally sound.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Aligns the timers for `url` with the current subscribers and mode.
    fn reconcile_timers(self: &Arc<Self>, state: &mut ManagerState, url: &str) {
        let subscribers: Vec<(SubscriptionId, Duration)> = state
            .cache
            .subscribers(url)
            .into_iter()
            .filter_map(|id| state.registry.frequency_for(id, url).map(|f| (id, f)))
            .collect();
        let desired = desired_timers(state.mode, url, &subscribers, self.min_interval);

        state.timers.reconcile(url, &desired, |key, period| {
            debug!("Starting timer {:?} every {:?}", key, period);
            self.spawn_timer(key, period)
        });
    }

    fn spawn_timer(self: &Arc<Self>, key: &TimerKey, period: Duration) -> AbortHandle {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let url = key.url().to_string();
        let scope = match key.subscription() {
            Some(id) => NotifyScope::subscriber(id),
            None => NotifyScope::All,
        };
        spawn_ticker(&self.runtime, period, move || match weak.upgrade() {
            Some(inner) => {
                inner.fetch(&url, scope.clone());
                true
            }
            None => false,
        })
    }

    /// Starts a fetch for `url`, or joins the one already in flight and
    /// widens its notification scope.
    fn fetch(self: &Arc<Self>, url: &str, scope: NotifyScope) -> FetchHandle {
        let mut state = self.lock_state();
        if let Some(flight) = state.in_flight.get_mut(url) {
            debug!("Joining in-flight fetch for {}", url);
            flight.scope.merge(scope);
            return flight.handle.clone();
        }

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let inner = Arc::clone(self);
        let source = Arc::clone(&self.source);
        let task_url = url.to_string();

        // The task cannot complete before the in-flight entry exists: its
        // completion handler needs the lock held here.
        let join = self.runtime.spawn(async move {
            let outcome = source.get_json(&task_url).await;
            inner.complete_fetch(&task_url, ticket, outcome);
        });
        let abort = join.abort_handle();
        let handle = FetchHandle(join.map(|_| ()).boxed().shared());

        state.in_flight.insert(
            url.to_string(),
            InFlight {
                ticket,
                handle: handle.clone(),
                scope,
                abort,
            },
        );
        handle
    }

    fn complete_fetch(&self, url: &str, ticket: u64, outcome: Result<Value, FetchError>) {
        let notifications = {
            let mut state = self.lock_state();
            let current = state
                .in_flight
                .get(url)
                .is_some_and(|flight| flight.ticket == ticket);
            if !current {
                debug!("Discarding stale fetch result for {}", url);
                return;
            }
            let scope = state
                .in_flight
                .remove(url)
                .map(|flight| flight.scope)
                .unwrap_or(NotifyScope::All);

            if let Err(err) = &outcome {
                warn!("Fetch error for {}: {}", url, err);
            }
            state.cache.record(url, outcome);

            let ManagerState {
                cache,
                registry,
                mode,
                ..
            } = &mut *state;
            dispatch::plan_for_update(cache, registry, *mode, url, &scope, Instant::now())
        };

        self.deliver_all(notifications);
    }

    /// Delivers a planned batch. A callback earlier in the batch may have
    /// unsubscribed a later recipient, so each one is re-checked first.
    fn deliver_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let id = notification.subscription();
            if !self.lock_state().registry.contains(id) {
                debug!("Skipping delivery to {}, unsubscribed mid-batch", id);
                continue;
            }
            notification.deliver();
        }
    }
}
