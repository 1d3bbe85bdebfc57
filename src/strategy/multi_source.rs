use super::{FetchStrategy, Figure, FigureStatus};
use crate::data::{DataFetchManager, SubscriptionId};
use log::debug;
use std::{collections::HashMap, sync::Arc};

/// Feeds a figure from several URLs delivered together.
pub struct MultiSourceStrategy {
    figure: Arc<dyn Figure>,
    manager: DataFetchManager,
    urls: Vec<String>,
    subscription: Option<SubscriptionId>,
}

/// `"<url>: <error>"` pairs joined with `"; "`, in subscription order.
pub fn combined_error(urls: &[String], errors: &HashMap<String, String>) -> String {
    urls.iter()
        .filter_map(|url| errors.get(url).map(|err| format!("{}: {}", url, err)))
        .collect::<Vec<_>>()
        .join("; ")
}

impl MultiSourceStrategy {
    pub fn new(figure: Arc<dyn Figure>, manager: DataFetchManager, urls: Vec<String>) -> Self {
        Self {
            figure,
            manager,
            urls,
            subscription: None,
        }
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }
}

impl FetchStrategy for MultiSourceStrategy {
    fn subscribe(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let figure = Arc::clone(&self.figure);
        let urls = self.urls.clone();
        let id = self.manager.subscribe_multiple(
            self.urls.clone(),
            self.figure.update_frequency(),
            move |data, errors| match errors {
                Some(errors) => {
                    figure.set_status(FigureStatus::failed(combined_error(&urls, errors)));
                    figure.on_multi_data_error(errors);
                }
                None => {
                    figure.set_status(FigureStatus::ready());
                    figure.on_multi_data_received(data);
                }
            },
        );
        debug!("Figure subscribed to {} URLs as {}", self.urls.len(), id);
        self.subscription = Some(id);
    }

    fn unsubscribe(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.manager.unsubscribe(id);
        }
    }

    fn is_active(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for MultiSourceStrategy {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
