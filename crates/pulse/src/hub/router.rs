//! Fan-out of events to matching subscribers.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, trace};
use pulse_protocol::{EventRecord, Frame};
use serde::Serialize;

use super::dispatch::{DeliveryOutcome, Dispatcher, Outgoing};
use super::metrics::HubMetrics;
use super::registry::ClientConnection;

/// Summary of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub matched: usize,
    /// Clients the frame was queued for.
    pub queued: usize,
    /// Clients whose queue refused the frame.
    pub failed: usize,
    pub pruned: usize,
}

/// Queues each published event for every client whose filter matches.
pub struct BroadcastRouter {
    dispatcher: Dispatcher,
}

impl BroadcastRouter {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Hand `event` to all matching clients.
    ///
    /// Never waits on a sink. Each client's writer pushes on its own, bounded
    /// by the push timeout, in the order events were published. Per-client
    /// failures only show up in the report, the metrics, and the logs.
    pub fn publish(&self, event: &EventRecord) -> PublishReport {
        let metrics = self.dispatcher.metrics();
        HubMetrics::incr(&metrics.published);

        let targets: Vec<Arc<ClientConnection>> = self
            .dispatcher
            .registry()
            .snapshot()
            .into_iter()
            .filter(|conn| conn.filter().matches(event))
            .collect();

        let mut report = PublishReport {
            matched: targets.len(),
            ..PublishReport::default()
        };
        if targets.is_empty() {
            trace!(
                "No subscribers for {} event in {}/{}",
                event.kind(),
                event.project_id(),
                event.session_id()
            );
            return report;
        }

        let frame = match Frame::Event(event.clone()).to_sse() {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                error!("Failed to encode {} event frame: {}", event.kind(), e);
                return report;
            }
        };

        for conn in &targets {
            match self
                .dispatcher
                .enqueue(conn, Outgoing::Event(frame.clone()))
            {
                DeliveryOutcome::Queued | DeliveryOutcome::Delivered => report.queued += 1,
                DeliveryOutcome::Suspect => report.failed += 1,
                DeliveryOutcome::Pruned => {
                    report.failed += 1;
                    report.pruned += 1;
                }
            }
        }

        debug!(
            "Published {} event for {}/{}: {:?}",
            event.kind(),
            event.project_id(),
            event.session_id(),
            report
        );
        report
    }
}
