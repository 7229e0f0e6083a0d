//! Registry of live subscriber connections.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use log::{debug, error, info};
use pulse_protocol::SubscriptionFilter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::dispatch::Outgoing;
use super::error::RegistrationError;
use super::sink::FrameSink;

/// Liveness of a registered connection.
///
/// Unregistered is terminal and has no variant: the entry is simply gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    /// Last delivery attempt failed.
    Suspect,
}

/// State the registry keeps for one subscriber.
pub struct ClientConnection {
    client_id: String,
    filter: SubscriptionFilter,
    sink: Arc<dyn FrameSink>,
    registered_ms: u64,
    last_seen_ms: AtomicU64,
    missed: AtomicU32,
    queue: OnceLock<mpsc::Sender<Outgoing>>,
}

impl ClientConnection {
    fn new(
        client_id: String,
        filter: SubscriptionFilter,
        sink: Arc<dyn FrameSink>,
        now_ms: u64,
    ) -> Self {
        Self {
            client_id,
            filter,
            sink,
            registered_ms: now_ms,
            last_seen_ms: AtomicU64::new(now_ms),
            missed: AtomicU32::new(0),
            queue: OnceLock::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    pub fn sink(&self) -> &Arc<dyn FrameSink> {
        &self.sink
    }

    pub fn registered_ms(&self) -> u64 {
        self.registered_ms
    }

    /// Milliseconds since the registry epoch of the last successful delivery.
    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms.load(Ordering::Acquire)
    }

    /// Consecutive failed deliveries.
    pub fn missed(&self) -> u32 {
        self.missed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        if self.missed() == 0 {
            ConnectionState::Connected
        } else {
            ConnectionState::Suspect
        }
    }

    pub(crate) fn mark_seen(&self, now_ms: u64) {
        self.last_seen_ms.fetch_max(now_ms, Ordering::AcqRel);
        self.missed.store(0, Ordering::Release);
    }

    /// Delivery queue, created by `init` on first use.
    pub(crate) fn queue(
        &self,
        init: impl FnOnce() -> mpsc::Sender<Outgoing>,
    ) -> &mpsc::Sender<Outgoing> {
        self.queue.get_or_init(init)
    }

    /// Returns the consecutive miss count including this one.
    pub(crate) fn record_miss(&self) -> u32 {
        self.missed.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("client_id", &self.client_id)
            .field("filter", &self.filter)
            .field("last_seen_ms", &self.last_seen_ms())
            .field("missed", &self.missed())
            .finish_non_exhaustive()
    }
}

/// Process-wide map from client id to connection state.
///
/// Every mutation is a single map operation. Iteration goes over a snapshot,
/// so callbacks may register or unregister clients freely.
pub struct ClientRegistry {
    clients: DashMap<String, Arc<ClientConnection>>,
    epoch: Instant,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the registry was created.
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Insert a connection.
    ///
    /// A duplicate id overwrites the previous entry and is reported as an
    /// error; ids are random so this means a broken invariant upstream.
    pub fn register(
        &self,
        client_id: impl Into<String>,
        filter: SubscriptionFilter,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), RegistrationError> {
        let client_id = client_id.into();
        let scope = format!(
            "project: {}, session: {}",
            filter.project_id().unwrap_or("*"),
            filter.session_id().unwrap_or("*")
        );
        let conn = Arc::new(ClientConnection::new(
            client_id.clone(),
            filter,
            sink,
            self.now_ms(),
        ));

        match self.clients.insert(client_id.clone(), conn) {
            None => {
                info!("Registered client {} ({})", client_id, scope);
                Ok(())
            }
            Some(_previous) => {
                error!(
                    "Client id {} was already registered; replaced the existing entry",
                    client_id
                );
                Err(RegistrationError::DuplicateClient(client_id))
            }
        }
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, client_id: &str) -> bool {
        let removed = self.clients.remove(client_id).is_some();
        if removed {
            info!("Unregistered client {}", client_id);
        } else {
            debug!("Client {} already unregistered", client_id);
        }
        removed
    }

    /// Remove `conn` only if it is still the entry registered under its id.
    pub(crate) fn remove_connection(&self, conn: &Arc<ClientConnection>) -> bool {
        self.clients
            .remove_if(conn.client_id(), |_, current| Arc::ptr_eq(current, conn))
            .is_some()
    }

    /// Mark a client as alive now.
    pub fn touch(&self, client_id: &str) -> bool {
        match self.clients.get(client_id) {
            Some(conn) => {
                conn.mark_seen(self.now_ms());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        self.clients.get(client_id).map(|c| Arc::clone(c.value()))
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Point-in-time copy of all live connections.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Visit every connection live at call time.
    pub fn for_each(&self, mut visit: impl FnMut(&Arc<ClientConnection>)) {
        for conn in self.snapshot() {
            visit(&conn);
        }
    }

    pub fn size(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
