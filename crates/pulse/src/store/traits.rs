//! Event store trait definitions.

use async_trait::async_trait;
use pulse_protocol::{EventKind, EventRecord, SubscriptionFilter};
use serde::Serialize;

use super::StoreResult;

/// Largest page the recent-events query returns.
pub const MAX_RECENT_LIMIT: usize = 500;

/// Parameters of a recent-events lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEventsQuery {
    pub limit: usize,
    pub filter: SubscriptionFilter,
}

impl RecentEventsQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.min(MAX_RECENT_LIMIT),
            filter: SubscriptionFilter::all(),
        }
    }

    pub fn with_filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl Default for RecentEventsQuery {
    fn default() -> Self {
        Self::new(50)
    }
}

/// Per-session rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub project_id: String,
    pub session_id: String,
    pub event_count: u64,
    pub first_event_ms: i64,
    pub last_event_ms: i64,
    pub last_kind: EventKind,
    pub estimated_tokens: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
}

/// Aggregates over everything recorded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: u64,
    pub unique_sessions: u64,
    pub unique_agents: u64,
    pub total_tokens_estimated: u64,
    pub avg_duration_ms: f64,
    /// Most recently active first.
    pub recent_sessions: Vec<SessionSummary>,
}

/// Durable side of event ingestion.
///
/// The hub never reads from the store; it only serves the query endpoints.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one validated event.
    async fn record(&self, event: &EventRecord) -> StoreResult<()>;

    /// Aggregate counters plus up to `recent_limit` session summaries.
    async fn stats(&self, recent_limit: usize) -> StoreResult<EventStats>;

    /// Most recent matching events, newest first.
    async fn recent_events(&self, query: &RecentEventsQuery) -> StoreResult<Vec<EventRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_limit_is_capped() {
        assert_eq!(RecentEventsQuery::new(10_000).limit, MAX_RECENT_LIMIT);
        assert_eq!(RecentEventsQuery::default().limit, 50);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_value(EventStats::default()).unwrap();
        assert_eq!(json["totalEvents"], 0);
        assert_eq!(json["avgDurationMs"], 0.0);
        assert!(json["recentSessions"].as_array().unwrap().is_empty());
    }
}
