//! Testing infrastructure
//!
//! In-memory stand-ins for the network so the scheduler can be exercised on
//! tokio's paused clock without real HTTP.

pub mod mock_source;

pub use mock_source::{MockHttpSource, MockResponse};
