//! Event ingestion and recent-event queries.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use pulse_protocol::{EventInput, EventRecord, SubscriptionFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::RecentEventsQuery;

const DEFAULT_RECENT_LIMIT: usize = 50;

/// Response for `POST /api/events`.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Subscribers whose filter matched the event.
    pub matched: usize,
    /// Subscribers the event was queued for. Delivery itself happens in the
    /// background.
    pub queued: usize,
}

/// Record an event and publish it to live subscribers.
#[instrument(skip(state, body))]
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Result<Json<EventInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let Json(input) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let event = input.into_record(chrono::Utc::now().timestamp_millis())?;

    state.store.record(&event).await?;
    let report = state.hub.publish(&event);
    debug!(
        kind = %event.kind(),
        project_id = event.project_id(),
        session_id = event.session_id(),
        matched = report.matched,
        queued = report.queued,
        "Ingested event"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            matched: report.matched,
            queued: report.queued,
        }),
    ))
}

/// Query parameters for `GET /api/events/recent`.
#[derive(Debug, Deserialize)]
pub struct RecentEventsParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecentEventsResponse {
    pub events: Vec<EventRecord>,
}

/// Most recent stored events, newest first.
#[instrument(skip(state, params))]
pub async fn recent_events(
    State(state): State<AppState>,
    params: Result<Query<RecentEventsParams>, QueryRejection>,
) -> ApiResult<Json<RecentEventsResponse>> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let filter = SubscriptionFilter::parse(params.project_id, params.session_id)?;
    let query = RecentEventsQuery::new(params.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .with_filter(filter);

    let events = state.store.recent_events(&query).await?;
    Ok(Json(RecentEventsResponse { events }))
}
