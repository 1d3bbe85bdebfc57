//! Data module root
//!
//! The data fetch manager and its parts: cache store, subscription registry,
//! fetch scheduler, HTTP boundary and notification dispatch.

pub mod cache;
pub mod dispatch;
pub mod http;
pub mod manager;
pub mod mode;
pub mod scheduler;
pub mod subscriptions;

pub use cache::{CacheEntry, CachedData};
pub use http::{HttpSource, ReqwestSource};
pub use manager::{DataFetchManager, DebugInfo, FetchHandle, ManagerOptions, TimerInfo};
pub use mode::FetchMode;
pub use scheduler::DEFAULT_MIN_INTERVAL;
pub use subscriptions::{SubscriptionId, SubscriptionKind, MAX_UPDATE_INTERVAL};
