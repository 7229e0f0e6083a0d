//! Live event stream.

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use pulse_protocol::SubscriptionFilter;
use serde::Deserialize;
use tracing::{error, info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::hub::SubscriberStream;

/// Query parameters for `GET /api/events/stream`.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
}

/// Subscribe to the live feed.
///
/// The filter is validated before anything is registered. The first frame on
/// the stream is always `connected`; closing the response releases the
/// registration.
#[instrument(skip(state, query))]
pub async fn event_stream(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let filter = SubscriptionFilter::parse(query.project_id, query.session_id)?;

    let subscription = state.hub.subscribe(filter)?;
    info!(
        client_id = %subscription.client_id,
        clients = state.hub.client_count(),
        "Opened event stream"
    );

    build_sse_response(subscription.stream)
}

fn build_sse_response(stream: SubscriberStream) -> ApiResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no") // Disable nginx buffering if present
        .body(Body::from_stream(stream))
        .map_err(|e| {
            error!("Failed to build SSE response: {:?}", e);
            ApiError::internal("failed to open event stream")
        })
}
