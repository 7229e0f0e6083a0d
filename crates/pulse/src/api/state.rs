//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::hub::Hub;
use crate::store::{EventStore, MemoryEventStore};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live broadcast hub.
    pub hub: Arc<Hub>,
    /// Event store backing stats and recent-event queries.
    pub store: Arc<dyn EventStore>,
    /// Effective configuration.
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn EventStore>, config: AppConfig) -> Self {
        Self {
            hub,
            store,
            config: Arc::new(config),
        }
    }

    /// Hub and in-memory store built from `config`.
    ///
    /// The heartbeat is not started; callers inside a runtime do that with
    /// [`Hub::start_heartbeat`].
    pub fn from_config(config: AppConfig) -> Self {
        let hub = Arc::new(Hub::new(config.hub.clone()));
        let store = Arc::new(
            MemoryEventStore::new(config.store.max_events)
                .with_max_sessions(config.store.max_sessions),
        );
        Self::new(hub, store, config)
    }
}
