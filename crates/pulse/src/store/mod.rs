//! Event store abstraction.
//!
//! The hub itself keeps nothing: ingested events are recorded here for the
//! stats and recent-events queries, then published live.

mod error;
mod memory;
mod traits;

use serde::{Deserialize, Serialize};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryEventStore;
pub use traits::{EventStats, EventStore, MAX_RECENT_LIMIT, RecentEventsQuery, SessionSummary};

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Events retained for the recent-events query.
    pub max_events: usize,
    /// Sessions listed in the stats response.
    pub recent_sessions_limit: usize,
    /// Session summaries and agents kept for stats.
    pub max_sessions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            recent_sessions_limit: 20,
            max_sessions: 1_000,
        }
    }
}
