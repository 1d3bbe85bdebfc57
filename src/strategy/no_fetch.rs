use super::{FetchStrategy, Figure, FigureStatus};
use crate::data::scheduler::spawn_ticker;
use crate::data::subscriptions::frequency_from_secs;
use crate::data::DEFAULT_MIN_INTERVAL;
use log::debug;
use std::sync::Arc;
use tokio::{runtime::Handle, task::AbortHandle};

/// Drives a figure that renders from local state only.
pub struct NoFetchStrategy {
    figure: Arc<dyn Figure>,
    runtime: Handle,
    ticker: Option<AbortHandle>,
}

impl NoFetchStrategy {
    pub fn new(figure: Arc<dyn Figure>, runtime: Handle) -> Self {
        Self {
            figure,
            runtime,
            ticker: None,
        }
    }
}

impl FetchStrategy for NoFetchStrategy {
    fn subscribe(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let period = frequency_from_secs(self.figure.update_frequency()).max(DEFAULT_MIN_INTERVAL);
        debug!("Starting local ticker every {:?}", period);

        let figure = Arc::clone(&self.figure);
        self.ticker = Some(spawn_ticker(&self.runtime, period, move || {
            figure.on_local_tick();
            true
        }));
        self.figure.set_status(FigureStatus::ready());
    }

    fn unsubscribe(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.ticker.is_some()
    }
}

impl Drop for NoFetchStrategy {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
