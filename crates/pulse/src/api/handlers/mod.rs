//! API request handlers, organized by domain:
//! - `stream`: the live SSE subscription
//! - `events`: ingestion and recent-event queries
//! - `misc`: health, stats and hub diagnostics

mod events;
mod misc;
mod stream;

pub use events::{IngestResponse, RecentEventsResponse, ingest_event, recent_events};
pub use misc::{ClientInfo, HealthResponse, HubStatusResponse, health, hub_status, stats};
pub use stream::event_stream;
