//! Per-connection output sinks.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::error::DeliveryError;

/// Output channel for encoded SSE frames.
///
/// `push` may wait for capacity; callers bound it with a timeout.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn push(&self, frame: Bytes) -> Result<(), DeliveryError>;

    /// Whether the reading side is gone for good.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Sink backed by a bounded mpsc channel whose receiver feeds the HTTP body.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue without waiting.
    pub fn try_push(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|err| match err {
            TrySendError::Closed(_) => DeliveryError::Closed,
            TrySendError::Full(_) => DeliveryError::Rejected("buffer full".to_string()),
        })
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn push(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.tx.send(frame).await.map_err(|_| DeliveryError::Closed)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_receive() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.push(Bytes::from_static(b"a")).await.unwrap();
        sink.try_push(Bytes::from_static(b"b")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_closed_after_receiver_dropped() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());
        assert_eq!(
            sink.push(Bytes::from_static(b"a")).await,
            Err(DeliveryError::Closed)
        );
        assert_eq!(
            sink.try_push(Bytes::from_static(b"a")),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn test_try_push_full() {
        let (sink, _rx) = ChannelSink::channel(1);
        sink.try_push(Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            sink.try_push(Bytes::from_static(b"b")),
            Err(DeliveryError::Rejected(_))
        ));
    }
}
