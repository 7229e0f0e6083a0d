//! In-process event store.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use async_trait::async_trait;
use log::debug;
use pulse_protocol::EventRecord;
use tokio::sync::RwLock;

use super::{StoreError, StoreResult};
use super::traits::{EventStats, EventStore, RecentEventsQuery, SessionSummary};

#[derive(Default)]
struct Inner {
    events: VecDeque<EventRecord>,
    sessions: HashMap<(String, String), SessionSummary>,
    /// Agent id to its latest event timestamp.
    agents: HashMap<String, i64>,
    sessions_seen: u64,
    agents_seen: u64,
    total_events: u64,
    total_tokens: u64,
    duration_sum_ms: u64,
    duration_samples: u64,
}

/// Drop the entry with the smallest `last_ms` until `map` fits in `max`.
fn evict_oldest<K: Clone + Eq + Hash, V>(
    map: &mut HashMap<K, V>,
    max: usize,
    last_ms: impl Fn(&V) -> i64,
) {
    while map.len() > max {
        let Some(oldest) = map
            .iter()
            .min_by_key(|(_, v)| last_ms(v))
            .map(|(k, _)| k.clone())
        else {
            break;
        };
        map.remove(&oldest);
    }
}

impl Inner {
    fn apply(&mut self, event: &EventRecord, max_sessions: usize) {
        self.total_events += 1;
        let tokens = event.estimated_tokens().unwrap_or(0);
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        if let Some(duration) = event.payload().duration_ms() {
            self.duration_sum_ms = self.duration_sum_ms.saturating_add(duration);
            self.duration_samples += 1;
        }
        let ts = event.timestamp_ms();
        if let Some(agent) = event.agent_id() {
            match self.agents.get_mut(agent) {
                Some(last) => *last = (*last).max(ts),
                None => {
                    self.agents_seen += 1;
                    self.agents.insert(agent.to_string(), ts);
                }
            }
        }

        let key = (
            event.project_id().to_string(),
            event.session_id().to_string(),
        );
        if !self.sessions.contains_key(&key) {
            self.sessions_seen += 1;
        }
        let session = self
            .sessions
            .entry(key)
            .or_insert_with(|| SessionSummary {
                project_id: event.project_id().to_string(),
                session_id: event.session_id().to_string(),
                event_count: 0,
                first_event_ms: ts,
                last_event_ms: ts,
                last_kind: event.kind(),
                estimated_tokens: 0,
                agents: Vec::new(),
            });
        session.event_count += 1;
        session.estimated_tokens = session.estimated_tokens.saturating_add(tokens);
        session.first_event_ms = session.first_event_ms.min(ts);
        if ts >= session.last_event_ms {
            session.last_event_ms = ts;
            session.last_kind = event.kind();
        }
        if let Some(agent) = event.agent_id()
            && !session.agents.iter().any(|a| a == agent)
        {
            session.agents.push(agent.to_string());
        }

        evict_oldest(&mut self.sessions, max_sessions, |s| s.last_event_ms);
        evict_oldest(&mut self.agents, max_sessions, |last| *last);
    }
}

/// Event store that keeps a bounded window of events in memory.
///
/// Session summaries and known agents are capped too; the least recently
/// active ones go first. Totals and unique counts are cumulative, so a
/// session that comes back after eviction is counted again.
pub struct MemoryEventStore {
    max_events: usize,
    max_sessions: usize,
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            max_sessions: super::StoreConfig::default().max_sessions,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Cap on tracked session summaries and agents.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Number of events currently retained.
    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.events.is_empty()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(super::StoreConfig::default().max_events)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record(&self, event: &EventRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.apply(event, self.max_sessions);
        inner.events.push_back(event.clone());
        while inner.events.len() > self.max_events {
            if let Some(evicted) = inner.events.pop_front() {
                debug!(
                    "Evicted {} event for {}/{} from memory store",
                    evicted.kind(),
                    evicted.project_id(),
                    evicted.session_id()
                );
            }
        }
        Ok(())
    }

    async fn stats(&self, recent_limit: usize) -> StoreResult<EventStats> {
        let inner = self.inner.read().await;

        let mut recent_sessions: Vec<SessionSummary> = inner.sessions.values().cloned().collect();
        recent_sessions.sort_by(|a, b| b.last_event_ms.cmp(&a.last_event_ms));
        recent_sessions.truncate(recent_limit);

        let avg_duration_ms = if inner.duration_samples == 0 {
            0.0
        } else {
            inner.duration_sum_ms as f64 / inner.duration_samples as f64
        };

        Ok(EventStats {
            total_events: inner.total_events,
            unique_sessions: inner.sessions_seen,
            unique_agents: inner.agents_seen,
            total_tokens_estimated: inner.total_tokens,
            avg_duration_ms,
            recent_sessions,
        })
    }

    async fn recent_events(&self, query: &RecentEventsQuery) -> StoreResult<Vec<EventRecord>> {
        if query.limit == 0 {
            return Err(StoreError::InvalidQuery(
                "limit must be at least 1".to_string(),
            ));
        }
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|event| query.filter.matches(event))
            .take(query.limit)
            .cloned()
            .collect())
    }
}
