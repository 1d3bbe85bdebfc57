use crate::error::PollerError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Global scheduling policy.
///
/// `Sync` shares one fetch timer per URL across all of its subscribers,
/// paced by the fastest of them. `Async` gives every subscriber its own
/// timer at its own pace, trading extra requests for exact timing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Sync,
    Async,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Sync => "sync",
            FetchMode::Async => "async",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMode {
    type Err = PollerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(FetchMode::Sync),
            "async" => Ok(FetchMode::Async),
            other => Err(PollerError::InvalidMode(other.to_string())),
        }
    }
}
