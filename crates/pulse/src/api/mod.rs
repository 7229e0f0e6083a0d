//! HTTP API module.
//!
//! Serves the live event stream plus ingestion and query endpoints.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{
    ClientInfo, HealthResponse, HubStatusResponse, IngestResponse, RecentEventsResponse,
};
pub use routes::create_router;
pub use state::AppState;
