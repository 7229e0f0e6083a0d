//! Test utilities and common setup.

use axum::Router;
use axum::body::Body;
use http_body_util::BodyExt;
use pulse::api::{self, AppState};
use pulse::config::AppConfig;
use pulse_protocol::Frame;

/// Create a test application with the default configuration.
pub fn test_app() -> (Router, AppState) {
    test_app_with(AppConfig::default())
}

/// Create a test application from `config`. The heartbeat is not started.
pub fn test_app_with(config: AppConfig) -> (Router, AppState) {
    let state = AppState::from_config(config);
    (api::create_router(state.clone()), state)
}

/// Splits a streaming SSE response body into frames.
pub struct SseReader {
    body: Body,
    buffer: String,
}

impl SseReader {
    pub fn new(body: Body) -> Self {
        Self {
            body,
            buffer: String::new(),
        }
    }

    /// Next decoded frame, or `None` once the body ends.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                return Some(Frame::from_sse(&block).expect("valid SSE frame"));
            }

            let frame = self.body.frame().await?.expect("body frame");
            if let Ok(data) = frame.into_data() {
                self.buffer
                    .push_str(std::str::from_utf8(&data).expect("utf-8 body"));
            }
        }
    }
}
