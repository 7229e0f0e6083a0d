//! Health, stats and hub diagnostics.

use axum::Json;
use axum::extract::State;
use pulse_protocol::SubscriptionFilter;
use serde::Serialize;
use tracing::instrument;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::hub::{ConnectionState, HubConfig, MetricsSnapshot};
use crate::store::EventStats;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Live stream subscribers.
    pub clients: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: state.hub.client_count(),
    })
}

/// Aggregate event statistics.
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<EventStats>> {
    let stats = state
        .store
        .stats(state.config.store.recent_sessions_limit)
        .await?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    pub filter: SubscriptionFilter,
    pub state: ConnectionState,
    pub registered_ms: u64,
    pub last_seen_ms: u64,
    pub missed: u32,
}

/// Hub tuning as reported by `GET /api/hub`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSettings {
    pub heartbeat_interval_ms: u64,
    pub push_timeout_ms: u64,
    pub sink_capacity: usize,
    pub max_clients: Option<usize>,
}

impl From<&HubConfig> for HubSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            push_timeout_ms: config.push_timeout_ms,
            sink_capacity: config.sink_capacity,
            max_clients: config.max_clients,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatusResponse {
    pub clients: Vec<ClientInfo>,
    pub metrics: MetricsSnapshot,
    /// Interval of the running heartbeat, if started.
    pub heartbeat_interval_ms: Option<u64>,
    pub config: HubSettings,
}

/// Hub diagnostics: live clients and delivery counters.
pub async fn hub_status(State(state): State<AppState>) -> Json<HubStatusResponse> {
    let hub = &state.hub;
    let mut clients = Vec::with_capacity(hub.client_count());
    hub.registry().for_each(|conn| {
        clients.push(ClientInfo {
            client_id: conn.client_id().to_string(),
            filter: conn.filter().clone(),
            state: conn.state(),
            registered_ms: conn.registered_ms(),
            last_seen_ms: conn.last_seen_ms(),
            missed: conn.missed(),
        });
    });
    clients.sort_by_key(|c| c.registered_ms);

    Json(HubStatusResponse {
        clients,
        metrics: hub.metrics(),
        heartbeat_interval_ms: hub
            .heartbeat()
            .interval()
            .map(|i| u64::try_from(i.as_millis()).unwrap_or(u64::MAX)),
        config: HubSettings::from(hub.config()),
    })
}
