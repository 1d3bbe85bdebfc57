use super::{FetchStrategy, Figure, FigureStatus};
use crate::data::{DataFetchManager, SubscriptionId};
use log::debug;
use std::sync::Arc;

/// Feeds a figure from exactly one URL.
pub struct SingleSourceStrategy {
    figure: Arc<dyn Figure>,
    manager: DataFetchManager,
    url: String,
    subscription: Option<SubscriptionId>,
}

impl SingleSourceStrategy {
    pub fn new(figure: Arc<dyn Figure>, manager: DataFetchManager, url: impl Into<String>) -> Self {
        Self {
            figure,
            manager,
            url: url.into(),
            subscription: None,
        }
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }
}

impl FetchStrategy for SingleSourceStrategy {
    fn subscribe(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let figure = Arc::clone(&self.figure);
        // A cached result is delivered before `subscribe` returns, so there
        // is no separate cache check here.
        let id = self.manager.subscribe(
            self.url.clone(),
            self.figure.update_frequency(),
            move |data, error| match (data, error) {
                (_, Some(error)) => {
                    figure.set_status(FigureStatus::failed(error));
                    figure.on_data_error(error);
                }
                (Some(data), None) => {
                    figure.set_status(FigureStatus::ready());
                    figure.on_data_received(data);
                }
                (None, None) => {}
            },
        );
        debug!("Figure subscribed to {} as {}", self.url, id);
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

impl Drop for SingleSourceStrategy {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{Event, RecordingFigure};
    use crate::testing::{MockHttpSource, MockResponse};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn data_clears_status_and_reaches_figure() {
        let source = Arc::new(MockHttpSource::new());
        source.set_json("a", json!([1, 2, 3]));
        let manager = DataFetchManager::new(source).unwrap();
        let figure = RecordingFigure::new(&["a"], 1.0);

        let mut strategy = SingleSourceStrategy::new(figure.clone(), manager.clone(), "a");
        strategy.subscribe();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            figure.events(),
            vec![
                Event::Status(FigureStatus::ready()),
                Event::Data(json!([1, 2, 3])),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_sets_status_and_calls_error_hook() {
        let source = Arc::new(MockHttpSource::new());
        source.set_response("a", MockResponse::Status(500, "Internal Server Error".into()));
        let manager = DataFetchManager::new(source).unwrap();
        let figure = RecordingFigure::new(&["a"], 1.0);

        let mut strategy = SingleSourceStrategy::new(figure.clone(), manager, "a");
        strategy.subscribe();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let message = "HTTP 500: Internal Server Error".to_string();
        assert_eq!(
            figure.events(),
            vec![
                Event::Status(FigureStatus::failed(message.clone())),
                Event::Error(message),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cached_result_is_delivered_once_on_subscribe() {
        let source = Arc::new(MockHttpSource::new());
        source.set_json("a", json!(7));
        let manager = DataFetchManager::new(source.clone()).unwrap();
        manager.force_fetch("a").await;

        let figure = RecordingFigure::new(&["a"], 1.0);
        let mut strategy = SingleSourceStrategy::new(figure.clone(), manager, "a");
        strategy.subscribe();

        assert_eq!(
            figure.events(),
            vec![Event::Status(FigureStatus::ready()), Event::Data(json!(7))]
        );
        assert_eq!(source.call_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_is_idempotent() {
        let manager = DataFetchManager::new(Arc::new(MockHttpSource::new())).unwrap();
        let figure = RecordingFigure::new(&["a"], 1.0);
        let mut strategy = SingleSourceStrategy::new(figure, manager.clone(), "a");

        strategy.unsubscribe();
        strategy.subscribe();
        let id = strategy.subscription().unwrap();
        strategy.unsubscribe();
        strategy.unsubscribe();

        assert!(!manager.is_subscribed(id));
        assert!(manager.get_cached_data("a").is_none());
    }
    #[tokio::test(start_paused = true)]
    async fn dropping_the_strategy_releases_subscription_and_figure() {
        let manager = DataFetchManager::new(Arc::new(MockHttpSource::new())).unwrap();
        let figure = RecordingFigure::new(&["a"], 1.0);
        let mut strategy = SingleSourceStrategy::new(figure.clone(), manager.clone(), "a");
        strategy.subscribe();
        let id = strategy.subscription().unwrap();

        drop(strategy);

        assert!(!manager.is_subscribed(id));
        assert_eq!(Arc::strong_count(&figure), 1);
    }
}
