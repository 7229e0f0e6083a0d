//! Hub error types.
//!
//! None of these escape `publish` or the heartbeat loop; they are logged and
//! counted, and the affected client is pruned.

use std::time::Duration;

use thiserror::Error;

/// Registration conflicts. The registry still installs the new entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("client id already registered: {0}")]
    DuplicateClient(String),
}

/// A push to one client's sink failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("sink closed")]
    Closed,

    #[error("push timed out after {0:?}")]
    TimedOut(Duration),

    #[error("push rejected: {0}")]
    Rejected(String),
}

/// Reasons a subscribe request is refused before anything is registered.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscriber limit reached ({0} clients)")]
    CapacityReached(usize),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to queue connected frame: {0}")]
    Delivery(#[from] DeliveryError),
}
