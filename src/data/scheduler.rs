//! Fetch scheduling: which periodic timers exist, and at what period.
//!
//! Timers are tokio tasks that own nothing but a tick closure; the table
//! here only keeps their `AbortHandle`s and periods so they can be
//! reconciled, listed and cancelled.

use super::mode::FetchMode;
use super::subscriptions::{SubscriptionId, MAX_UPDATE_INTERVAL};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use tokio::{
    runtime::Handle,
    task::AbortHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Lower bound on any timer period.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Identifies one timer: a shared per-URL timer (sync mode) or a
/// per-subscriber timer for one of its URLs (async mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    Shared(String),
    Subscriber(SubscriptionId, String),
}

impl TimerKey {
    pub fn url(&self) -> &str {
        match self {
            TimerKey::Shared(url) | TimerKey::Subscriber(_, url) => url,
        }
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        match self {
            TimerKey::Shared(_) => None,
            TimerKey::Subscriber(id, _) => Some(*id),
        }
    }
}

#[derive(Debug)]
struct ActiveTimer {
    period: Duration,
    abort: AbortHandle,
}

/// Period of the single shared timer for a URL in sync mode: the fastest
/// requested frequency, floored. `None` when nobody asks for the URL.
pub fn shared_period(
    frequencies: impl IntoIterator<Item = Duration>,
    floor: Duration,
) -> Option<Duration> {
    frequencies.into_iter().min().map(|f| f.max(floor))
}

/// Timers a URL should have under `mode`, given `(subscriber, frequency)`
/// pairs for everyone currently referencing it.
pub fn desired_timers(
    mode: FetchMode,
    url: &str,
    subscribers: &[(SubscriptionId, Duration)],
    floor: Duration,
) -> BTreeMap<TimerKey, Duration> {
    match mode {
        FetchMode::Sync => shared_period(subscribers.iter().map(|(_, f)| *f), floor)
            .map(|period| (TimerKey::Shared(url.to_string()), period))
            .into_iter()
            .collect(),
        FetchMode::Async => subscribers
            .iter()
            .map(|(id, f)| (TimerKey::Subscriber(*id, url.to_string()), (*f).max(floor)))
            .collect(),
    }
}

#[derive(Debug, Default)]
pub struct TimerTable {
    timers: HashMap<TimerKey, ActiveTimer>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn period(&self, key: &TimerKey) -> Option<Duration> {
        self.timers.get(key).map(|t| t.period)
    }

    /// Brings the timers for `url` in line with `desired`. Timers whose key
    /// and period already match are left running untouched, so calling this
    /// twice with the same input changes nothing. `spawn` is called for every
    /// timer that has to be (re)started.
    pub fn reconcile(
        &mut self,
        url: &str,
        desired: &BTreeMap<TimerKey, Duration>,
        mut spawn: impl FnMut(&TimerKey, Duration) -> AbortHandle,
    ) {
        self.timers.retain(|key, timer| {
            if key.url() != url {
                return true;
            }
            if desired.get(key) == Some(&timer.period) {
                return true;
            }
            timer.abort.abort();
            false
        });

        for (key, period) in desired {
            if self.timers.contains_key(key) {
                continue;
            }
            let abort = spawn(key, *period);
            self.timers.insert(
                key.clone(),
                ActiveTimer {
                    period: *period,
                    abort,
                },
            );
        }
    }

    /// Cancels every per-subscriber timer belonging to `id`.
    pub fn cancel_subscriber(&mut self, id: SubscriptionId) {
        self.timers.retain(|key, timer| {
            if key.subscription() == Some(id) {
                timer.abort.abort();
                return false;
            }
            true
        });
    }

    pub fn clear(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort.abort();
        }
    }

    /// `(key, period)` for every running timer, sorted by key.
    pub fn entries(&self) -> Vec<(TimerKey, Duration)> {
        let mut entries: Vec<_> = self
            .timers
            .iter()
            .map(|(key, timer)| (key.clone(), timer.period))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Spawns a periodic task that calls `on_tick` every `period`, first after
/// one full period. The task ends on its own once `on_tick` returns `false`.
pub(crate) fn spawn_ticker(
    runtime: &Handle,
    period: Duration,
    mut on_tick: impl FnMut() -> bool + Send + 'static,
) -> AbortHandle {
    // tokio panics on a zero period
    let period = period.clamp(Duration::from_millis(1), MAX_UPDATE_INTERVAL);
    runtime
        .spawn(async move {
            let now = Instant::now();
            let start = now.checked_add(period).unwrap_or(now);
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        })
        .abort_handle()
}
