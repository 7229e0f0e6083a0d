//! Periodic pings that detect and reap dead connections.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use super::dispatch::{DeliveryOutcome, Dispatcher, Outgoing};

/// Encoded `{"type":"ping"}` frame.
pub(crate) const PING_FRAME: &[u8] = b"data: {\"type\":\"ping\"}\n\n";

/// Summary of one heartbeat tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatReport {
    /// Clients a ping was queued for.
    pub pinged: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Recurring timer that pings every registered client.
///
/// The timer is started at most once and runs for the lifetime of the tokio
/// runtime; there is no stop.
pub struct HeartbeatScheduler {
    dispatcher: Dispatcher,
    interval: OnceLock<Duration>,
}

impl HeartbeatScheduler {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            interval: OnceLock::new(),
        }
    }

    /// Spawn the ping loop. Returns false if it was already started.
    ///
    /// The first tick fires one full interval after this call.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        if self.interval.set(interval).is_err() {
            debug!("Heartbeat already running; ignoring start");
            return false;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.tick();
            }
        });

        info!("Heartbeat started (interval: {:?})", interval);
        true
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval.get().copied()
    }

    /// Queue a ping for every client.
    ///
    /// Each client's writer sends it after any events already queued. A ping
    /// that fails prunes on the second consecutive miss, or on the first one
    /// once the client has been silent for more than two intervals.
    pub fn tick(&self) -> HeartbeatReport {
        let clients = self.dispatcher.registry().snapshot();
        let mut report = HeartbeatReport::default();
        if clients.is_empty() {
            return report;
        }

        let frame = Bytes::from_static(PING_FRAME);
        let max_silence_ms = self
            .interval()
            .map(|i| u64::try_from(i.as_millis().saturating_mul(2)).unwrap_or(u64::MAX));

        for conn in &clients {
            let ping = Outgoing::Ping {
                frame: frame.clone(),
                max_silence_ms,
            };
            match self.dispatcher.enqueue(conn, ping) {
                DeliveryOutcome::Queued | DeliveryOutcome::Delivered => report.pinged += 1,
                DeliveryOutcome::Suspect => report.failed += 1,
                DeliveryOutcome::Pruned => {
                    report.failed += 1;
                    report.pruned += 1;
                }
            }
        }

        debug!("Heartbeat tick: {:?}", report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::metrics::HubMetrics;
    use crate::hub::registry::ClientRegistry;
    use crate::hub::sink::ChannelSink;
    use pulse_protocol::{Frame, SubscriptionFilter};

    fn scheduler(registry: &Arc<ClientRegistry>) -> Arc<HeartbeatScheduler> {
        Arc::new(HeartbeatScheduler::new(Dispatcher::new(
            Arc::clone(registry),
            Arc::new(HubMetrics::default()),
            Duration::from_millis(100),
            4,
        )))
    }

    #[test]
    fn test_ping_frame_matches_encoding() {
        assert_eq!(PING_FRAME, Frame::Ping.to_sse().unwrap().as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_pings_everyone() {
        let registry = Arc::new(ClientRegistry::new());
        let scheduler = scheduler(&registry);
        let (a, mut a_rx) = ChannelSink::channel(4);
        let (b, mut b_rx) = ChannelSink::channel(4);
        registry
            .register("a", SubscriptionFilter::all(), Arc::new(a))
            .unwrap();
        registry
            .register("b", SubscriptionFilter::all(), Arc::new(b))
            .unwrap();

        let report = scheduler.tick();
        assert_eq!(report.pinged, 2);
        assert_eq!(report.failed, 0);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(a_rx.try_recv().unwrap(), Bytes::from_static(PING_FRAME));
        assert_eq!(b_rx.try_recv().unwrap(), Bytes::from_static(PING_FRAME));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let scheduler = scheduler(&Arc::new(ClientRegistry::new()));
        assert!(scheduler.start(Duration::from_secs(30)));
        assert!(!scheduler.start(Duration::from_secs(5)));
        assert_eq!(scheduler.interval(), Some(Duration::from_secs(30)));
    }
}
