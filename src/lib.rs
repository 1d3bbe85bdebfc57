pub mod config;
pub mod data; // Cache, subscriptions, scheduling and the fetch manager
pub mod error;
pub mod strategy; // Figure-facing fetch strategies
pub mod testing; // Testing infrastructure
pub mod utils;

pub use config::Config;
pub use data::{
    CachedData, DataFetchManager, DebugInfo, FetchHandle, FetchMode, HttpSource, ManagerOptions,
    ReqwestSource, SubscriptionId,
};
pub use error::{FetchError, PollerError};
pub use strategy::{strategy_for, FetchStrategy, Figure, FigureStatus};
