//! Live event broadcast hub.
//!
//! ```text
//!  event source                 Stream endpoint
//!       │ publish                 │ subscribe / lease drop
//!       ▼                         ▼
//!  BroadcastRouter ──snapshot──▶ ClientRegistry ◀──snapshot── HeartbeatScheduler
//!       │                                                        │
//!       └──── enqueue ──▶ per-client queue ◀──── enqueue ping ───┘
//!                               │ writer task (push bounded by timeout)
//!                               ▼
//!                         per-client sink ──▶ SubscriberStream ──▶ SSE body
//! ```
//!
//! The registry map is the only shared state. Publishing and pinging only
//! enqueue; each client's writer task does the pushing, so a slow consumer
//! delays its own frames and nobody else's.

mod dispatch;
mod error;
mod heartbeat;
mod metrics;
mod registry;
mod router;
mod sink;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{info, warn};
use pulse_protocol::{EventRecord, Frame, SubscriptionFilter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dispatch::Dispatcher;

pub use dispatch::MAX_CONSECUTIVE_MISSES;
pub use error::{DeliveryError, RegistrationError, SubscribeError};
pub use heartbeat::{HeartbeatReport, HeartbeatScheduler};
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use registry::{ClientConnection, ClientRegistry, ConnectionState};
pub use router::{BroadcastRouter, PublishReport};
pub use sink::{ChannelSink, FrameSink};
pub use stream::{ClientLease, SubscriberStream, Subscription};

/// Hub tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Period of the ping loop.
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a single push to one client.
    pub push_timeout_ms: u64,
    /// Frames buffered per client, both in the delivery queue and in the
    /// stream buffer. A full queue counts as a missed delivery.
    pub sink_capacity: usize,
    /// Optional cap on concurrent subscribers.
    pub max_clients: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            push_timeout_ms: 5_000,
            sink_capacity: 64,
            max_clients: None,
        }
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms.max(1))
    }
}

/// Registry, router and heartbeat wired together.
pub struct Hub {
    config: HubConfig,
    registry: Arc<ClientRegistry>,
    router: BroadcastRouter,
    heartbeat: Arc<HeartbeatScheduler>,
    metrics: Arc<HubMetrics>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let metrics = Arc::new(HubMetrics::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.push_timeout(),
            config.sink_capacity,
        );
        let router = BroadcastRouter::new(dispatcher.clone());
        let heartbeat = Arc::new(HeartbeatScheduler::new(dispatcher));

        Self {
            config,
            registry,
            router,
            heartbeat,
            metrics,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatScheduler> {
        &self.heartbeat
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn client_count(&self) -> usize {
        self.registry.size()
    }

    /// Start the ping loop at the configured interval. Must run inside a
    /// tokio runtime; later calls are no-ops.
    pub fn start_heartbeat(&self) -> bool {
        self.heartbeat.start(self.config.heartbeat_interval())
    }

    /// Queue `event` for every matching subscriber. Returns without waiting
    /// on any sink. Must run inside a tokio runtime.
    pub fn publish(&self, event: &EventRecord) -> PublishReport {
        self.router.publish(event)
    }

    /// Register a new subscriber.
    ///
    /// The `connected` frame is queued before the client becomes visible to
    /// the router, so it is always the first frame on the stream.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, SubscribeError> {
        if let Some(max) = self.config.max_clients
            && self.registry.size() >= max
        {
            return Err(SubscribeError::CapacityReached(max));
        }

        let client_id = Uuid::new_v4().to_string();
        let (sink, receiver) = ChannelSink::channel(self.config.sink_capacity);
        sink.try_push(Bytes::from(Frame::connected(&client_id).to_sse()?))?;

        if let Err(err) = self
            .registry
            .register(client_id.clone(), filter, Arc::new(sink))
        {
            warn!("Continuing after registration conflict: {}", err);
        }
        HubMetrics::incr(&self.metrics.subscribed);

        let lease = ClientLease::new(
            client_id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
        );
        Ok(Subscription {
            client_id,
            stream: SubscriberStream::new(receiver, lease),
        })
    }

    /// Drop every registration so open streams end. Returns how many were
    /// closed.
    pub fn close_all(&self) -> usize {
        let closed = self
            .registry
            .snapshot()
            .iter()
            .filter(|conn| self.registry.remove_connection(conn))
            .count();
        if closed > 0 {
            info!("Closed {} subscriber stream(s)", closed);
        }
        closed
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscribe_sends_connected_first() {
        let hub = Hub::default();
        let mut sub = hub.subscribe(SubscriptionFilter::all()).unwrap();
        assert_eq!(hub.client_count(), 1);

        let first = sub.stream.next().await.unwrap().unwrap();
        let frame = Frame::from_sse(std::str::from_utf8(&first).unwrap()).unwrap();
        assert_eq!(frame, Frame::connected(sub.client_id.clone()));
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let hub = Hub::default();
        let sub = hub.subscribe(SubscriptionFilter::all()).unwrap();
        let id = sub.client_id.clone();
        assert!(hub.registry().contains(&id));

        drop(sub);
        assert!(!hub.registry().contains(&id));
        assert_eq!(hub.metrics().unsubscribed, 1);
    }

    #[tokio::test]
    async fn test_client_ids_are_unique() {
        let hub = Hub::default();
        let subs: Vec<_> = (0..50)
            .map(|_| hub.subscribe(SubscriptionFilter::all()).unwrap())
            .collect();
        let ids: std::collections::HashSet<_> = subs.iter().map(|s| s.client_id.clone()).collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(hub.client_count(), 50);
    }

    #[tokio::test]
    async fn test_max_clients_policy() {
        let hub = Hub::new(HubConfig {
            max_clients: Some(1),
            ..HubConfig::default()
        });
        let _first = hub.subscribe(SubscriptionFilter::all()).unwrap();
        assert!(matches!(
            hub.subscribe(SubscriptionFilter::all()),
            Err(SubscribeError::CapacityReached(1))
        ));
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_ends_after_prune() {
        let hub = Hub::default();
        let mut sub = hub.subscribe(SubscriptionFilter::all()).unwrap();
        let conn = hub.registry().get(&sub.client_id).unwrap();
        hub.registry().unregister(&sub.client_id);
        drop(conn);

        // connected frame, then end of stream
        assert!(sub.stream.next().await.is_some());
        assert!(sub.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let hub = Hub::default();
        let mut a = hub.subscribe(SubscriptionFilter::all()).unwrap();
        let mut b = hub.subscribe(SubscriptionFilter::all()).unwrap();

        assert_eq!(hub.close_all(), 2);
        assert_eq!(hub.client_count(), 0);
        for sub in [&mut a, &mut b] {
            assert!(sub.stream.next().await.is_some());
            assert!(sub.stream.next().await.is_none());
        }
    }
}
