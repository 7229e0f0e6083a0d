//! Per-connection delivery queues.
//!
//! Every connection gets a bounded queue drained by its own writer task. The
//! router and the heartbeat only enqueue, so a sink that stalls delays nothing
//! but its own frames. Frames leave a queue in the order they entered it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::error::DeliveryError;
use super::metrics::HubMetrics;
use super::registry::{ClientConnection, ClientRegistry};

/// Consecutive failed deliveries after which a client is pruned.
pub const MAX_CONSECUTIVE_MISSES: u32 = 2;

/// A frame waiting in a connection's queue.
#[derive(Debug, Clone)]
pub(crate) enum Outgoing {
    Event(Bytes),
    /// Heartbeat ping. A failed ping also prunes a client that has been
    /// silent for longer than `max_silence_ms`.
    Ping {
        frame: Bytes,
        max_silence_ms: Option<u64>,
    },
}

impl Outgoing {
    fn max_silence_ms(&self) -> Option<u64> {
        match self {
            Self::Event(_) => None,
            Self::Ping { max_silence_ms, .. } => *max_silence_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Queued,
    Delivered,
    Suspect,
    Pruned,
}

/// Hands frames to connection queues and applies the liveness rules.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<ClientRegistry>,
    metrics: Arc<HubMetrics>,
    push_timeout: Duration,
    queue_capacity: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<ClientRegistry>,
        metrics: Arc<HubMetrics>,
        push_timeout: Duration,
        queue_capacity: usize,
    ) -> Self {
        Self {
            registry,
            metrics,
            push_timeout,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub(crate) fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    /// Queue `item` for `conn` without waiting.
    ///
    /// A full queue counts as a missed delivery. Must be called inside a
    /// tokio runtime; the writer task is spawned on first use.
    pub(crate) fn enqueue(&self, conn: &Arc<ClientConnection>, item: Outgoing) -> DeliveryOutcome {
        if conn.sink().is_closed() {
            return self.fail(conn, &DeliveryError::Closed, None);
        }

        let queue = conn.queue(|| self.spawn_writer(conn));
        match queue.try_send(item) {
            Ok(()) => DeliveryOutcome::Queued,
            Err(TrySendError::Full(item)) => self.fail(
                conn,
                &DeliveryError::Rejected("delivery queue full".to_string()),
                item.max_silence_ms(),
            ),
            Err(TrySendError::Closed(_)) => self.fail(conn, &DeliveryError::Closed, None),
        }
    }

    fn spawn_writer(&self, conn: &Arc<ClientConnection>) -> mpsc::Sender<Outgoing> {
        let (tx, mut rx) = mpsc::channel(self.queue_capacity);
        // The connection owns the sender, so the writer only holds it weakly
        // and exits once the registry and every snapshot have let go.
        let weak: Weak<ClientConnection> = Arc::downgrade(conn);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let Some(conn) = weak.upgrade() else {
                    break;
                };
                if dispatcher.write(&conn, item).await == DeliveryOutcome::Pruned {
                    debug!("Writer for client {} stopped", conn.client_id());
                    break;
                }
            }
        });
        tx
    }

    /// Push one frame to the sink, bounded by the push timeout.
    pub(crate) async fn write(&self, conn: &Arc<ClientConnection>, item: Outgoing) -> DeliveryOutcome {
        let max_silence_ms = item.max_silence_ms();
        let (frame, is_ping) = match item {
            Outgoing::Event(frame) => (frame, false),
            Outgoing::Ping { frame, .. } => (frame, true),
        };

        let result = if conn.sink().is_closed() {
            Err(DeliveryError::Closed)
        } else {
            match tokio::time::timeout(self.push_timeout, conn.sink().push(frame)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::TimedOut(self.push_timeout)),
            }
        };

        match result {
            Ok(()) => {
                conn.mark_seen(self.registry.now_ms());
                if is_ping {
                    HubMetrics::incr(&self.metrics.pings);
                } else {
                    HubMetrics::incr(&self.metrics.delivered);
                }
                DeliveryOutcome::Delivered
            }
            Err(err) => self.fail(conn, &err, max_silence_ms),
        }
    }

    /// Count a miss and prune if the client is dead by any liveness rule.
    fn fail(
        &self,
        conn: &Arc<ClientConnection>,
        err: &DeliveryError,
        max_silence_ms: Option<u64>,
    ) -> DeliveryOutcome {
        HubMetrics::incr(&self.metrics.failed);
        let misses = conn.record_miss();
        let silent_ms = self.registry.now_ms().saturating_sub(conn.last_seen_ms());

        let reason = if *err == DeliveryError::Closed {
            Some(err.to_string())
        } else if misses >= MAX_CONSECUTIVE_MISSES {
            Some(format!("{misses} consecutive misses, last: {err}"))
        } else if max_silence_ms.is_some_and(|max| silent_ms > max) {
            Some(format!("silent for {silent_ms}ms, last: {err}"))
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.prune(conn, &reason);
                DeliveryOutcome::Pruned
            }
            None => {
                warn!(
                    "Delivery to client {} failed ({}); marked suspect",
                    conn.client_id(),
                    err
                );
                DeliveryOutcome::Suspect
            }
        }
    }

    fn prune(&self, conn: &Arc<ClientConnection>, reason: &str) {
        if self.registry.remove_connection(conn) {
            HubMetrics::incr(&self.metrics.pruned);
            info!("Pruned client {} ({})", conn.client_id(), reason);
        }
    }
}
