//! Fetch strategies
//!
//! A figure is a live panel that consumes data. How it gets that data
//! depends on how many URLs it declares: none means it renders locally on a
//! ticker, one means a plain subscription, several means a coordinated
//! multi-source subscription.

pub mod multi_source;
pub mod no_fetch;
pub mod single_source;

pub use multi_source::MultiSourceStrategy;
pub use no_fetch::NoFetchStrategy;
pub use single_source::SingleSourceStrategy;

use crate::data::DataFetchManager;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Loading / error state a figure displays alongside its data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FigureStatus {
    pub loading: bool,
    pub error: Option<String>,
}

impl FigureStatus {
    pub fn ready() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            loading: false,
            error: Some(error.into()),
        }
    }
}

/// A data consumer. Hooks are called from whatever task delivered the
/// update, so implementations use interior mutability.
pub trait Figure: Send + Sync + 'static {
    fn data_urls(&self) -> Vec<String>;

    /// Desired refresh interval in seconds
    fn update_frequency(&self) -> f64;

    fn set_status(&self, status: FigureStatus);

    fn on_data_received(&self, _data: &Value) {}

    fn on_data_error(&self, _error: &str) {}

    fn on_multi_data_received(&self, _data: &HashMap<String, Value>) {}

    fn on_multi_data_error(&self, _errors: &HashMap<String, String>) {}

    fn on_local_tick(&self) {}
}

pub trait FetchStrategy: Send {
    fn subscribe(&mut self);

    /// Safe to call repeatedly, and before `subscribe`.
    fn unsubscribe(&mut self);

    fn is_active(&self) -> bool;
}

/// Picks the strategy matching the number of URLs the figure declares.
pub fn strategy_for(figure: Arc<dyn Figure>, manager: &DataFetchManager) -> Box<dyn FetchStrategy> {
    let mut urls = figure.data_urls();
    match urls.len() {
        0 => Box::new(NoFetchStrategy::new(figure, manager.runtime().clone())),
        1 => {
            let url = urls.remove(0);
            Box::new(SingleSourceStrategy::new(figure, manager.clone(), url))
        }
        _ => Box::new(MultiSourceStrategy::new(figure, manager.clone(), urls)),
    }
}
