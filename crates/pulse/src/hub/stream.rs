//! Subscriber side of a registration: the lease and the frame stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use log::debug;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::metrics::HubMetrics;
use super::registry::ClientRegistry;

/// A registry slot held by one stream.
///
/// Dropping the lease unregisters the client. Drop runs exactly once on every
/// exit path, including client disconnects and task cancellation.
pub struct ClientLease {
    client_id: String,
    registry: Arc<ClientRegistry>,
    metrics: Arc<HubMetrics>,
}

impl ClientLease {
    pub(crate) fn new(
        client_id: String,
        registry: Arc<ClientRegistry>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            client_id,
            registry,
            metrics,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        if self.registry.unregister(&self.client_id) {
            HubMetrics::incr(&self.metrics.unsubscribed);
        } else {
            debug!(
                "Lease for client {} released after prune",
                self.client_id
            );
        }
    }
}

/// Encoded SSE frames for one client, ending when the hub drops its sink.
pub struct SubscriberStream {
    frames: ReceiverStream<Bytes>,
    lease: ClientLease,
}

impl SubscriberStream {
    pub(crate) fn new(receiver: mpsc::Receiver<Bytes>, lease: ClientLease) -> Self {
        Self {
            frames: ReceiverStream::new(receiver),
            lease,
        }
    }

    pub fn client_id(&self) -> &str {
        self.lease.client_id()
    }
}

impl Stream for SubscriberStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().frames)
            .poll_next(cx)
            .map(|frame| frame.map(Ok))
    }
}

/// Result of a successful subscribe.
pub struct Subscription {
    pub client_id: String,
    pub stream: SubscriberStream,
}
