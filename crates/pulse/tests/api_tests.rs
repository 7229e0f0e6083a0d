//! API integration tests.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use pulse::config::AppConfig;
use pulse::hub::HubConfig;
use pulse_protocol::{EventKind, Frame};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{SseReader, test_app, test_app_with};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_event(app: &Router, event: Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri("/api/events")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&event).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn next_frame(reader: &mut SseReader) -> Frame {
    tokio::time::timeout(READ_TIMEOUT, reader.next_frame())
        .await
        .expect("frame within timeout")
        .expect("stream still open")
}

/// Open a stream and return its reader plus the client id from the
/// `connected` frame.
async fn open_stream(app: &Router, query: &str) -> (SseReader, String) {
    let response = get(app, &format!("/api/events/stream{query}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut reader = SseReader::new(response.into_body());
    match next_frame(&mut reader).await {
        Frame::Connected { client_id } => (reader, client_id),
        other => panic!("expected connected frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = test_app();

    let response = get(&app, "/api/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["clients"], 0);
}

#[tokio::test]
async fn test_stream_headers_and_connected_frame() {
    let (app, state) = test_app();

    let response = get(&app, "/api/events/stream?project_id=p1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers[header::CONNECTION], "keep-alive");
    assert_eq!(headers["x-accel-buffering"], "no");

    let mut reader = SseReader::new(response.into_body());
    let Frame::Connected { client_id } = next_frame(&mut reader).await else {
        panic!("first frame must be connected");
    };

    let conn = state.hub.registry().get(&client_id).expect("registered");
    assert_eq!(conn.filter().project_id(), Some("p1"));
    assert_eq!(conn.filter().session_id(), None);
}

#[tokio::test]
async fn test_malformed_filter_rejected_before_registration() {
    let (app, state) = test_app();
    let long = "x".repeat(300);

    for query in [
        "?project_id=".to_string(),
        "?session_id=%20%20".to_string(),
        "?project_id=p1%01".to_string(),
        format!("?session_id={long}"),
    ] {
        let response = get(&app, &format!("/api/events/stream{query}")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {query}");

        let json = json_body(response).await;
        assert_eq!(json["code"], "BAD_REQUEST");
        assert!(json["error"].as_str().unwrap().contains("malformed filter"));
    }

    assert_eq!(state.hub.client_count(), 0);
    assert_eq!(state.hub.metrics().subscribed, 0);
}

#[tokio::test]
async fn test_dropping_stream_unregisters() {
    let (app, state) = test_app();

    let (reader, client_id) = open_stream(&app, "").await;
    assert!(state.hub.registry().contains(&client_id));

    drop(reader);
    assert!(!state.hub.registry().contains(&client_id));
    assert_eq!(state.hub.client_count(), 0);
}

#[tokio::test]
async fn test_ingested_event_reaches_matching_subscribers() {
    let (app, _state) = test_app();
    let (mut p1_reader, _) = open_stream(&app, "?project_id=p1").await;
    let (mut p2_reader, _) = open_stream(&app, "?project_id=p2").await;

    let response = post_event(
        &app,
        json!({
            "projectId": "p1",
            "sessionId": "s1",
            "agentId": "planner",
            "kind": "step",
            "payload": {"name": "plan", "durationMs": 12}
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["matched"], 1);
    assert_eq!(json["queued"], 1);

    match next_frame(&mut p1_reader).await {
        Frame::Event(event) => {
            assert_eq!(event.project_id(), "p1");
            assert_eq!(event.session_id(), "s1");
            assert_eq!(event.agent_id(), Some("planner"));
            assert_eq!(event.kind(), EventKind::Step);
        }
        other => panic!("expected event frame, got {other:?}"),
    }

    let nothing = tokio::time::timeout(Duration::from_millis(50), p2_reader.next_frame()).await;
    assert!(nothing.is_err(), "p2 subscriber must not receive p1 events");
}

#[tokio::test]
async fn test_invalid_events_rejected() {
    let (app, state) = test_app();

    for body in [
        json!({"projectId": "p1", "sessionId": "s1", "kind": "bogus"}),
        json!({"projectId": "p1", "sessionId": "s1", "kind": "tool_call", "payload": {}}),
        json!({"projectId": " ", "sessionId": "s1", "kind": "step"}),
        json!({"sessionId": "s1", "kind": "step"}),
    ] {
        let response = post_event(&app, body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(json_body(response).await["code"], "BAD_REQUEST");
    }

    let stats = state.store.stats(10).await.unwrap();
    assert_eq!(stats.total_events, 0);
    assert_eq!(state.hub.metrics().published, 0);
}

#[tokio::test]
async fn test_malformed_json_body_rejected() {
    let (app, _state) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/events")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, _state) = test_app();

    for (session, agent, tokens) in [("s1", "a", 100), ("s1", "b", 50), ("s2", "a", 25)] {
        let response = post_event(
            &app,
            json!({
                "projectId": "p1",
                "sessionId": session,
                "agentId": agent,
                "kind": "message",
                "payload": {"role": "assistant", "content": "hi"},
                "estimatedTokens": tokens
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let json = json_body(get(&app, "/api/stats").await).await;
    assert_eq!(json["totalEvents"], 3);
    assert_eq!(json["uniqueSessions"], 2);
    assert_eq!(json["uniqueAgents"], 2);
    assert_eq!(json["totalTokensEstimated"], 175);
    assert_eq!(json["avgDurationMs"], 0.0);
    assert_eq!(json["recentSessions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_recent_events_endpoint() {
    let (app, _state) = test_app();

    for (project, ts) in [("p1", 1), ("p2", 2), ("p1", 3)] {
        post_event(
            &app,
            json!({
                "projectId": project,
                "sessionId": "s1",
                "kind": "custom",
                "payload": {"n": ts},
                "timestampMs": ts
            }),
        )
        .await;
    }

    let json = json_body(get(&app, "/api/events/recent?project_id=p1").await).await;
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["timestampMs"], 3);
    assert_eq!(events[1]["timestampMs"], 1);
    assert_eq!(events[0]["payload"]["n"], 3);

    let json = json_body(get(&app, "/api/events/recent?limit=1").await).await;
    assert_eq!(json["events"].as_array().unwrap().len(), 1);

    let response = get(&app, "/api/events/recent?limit=lots").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&app, "/api/events/recent?limit=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(
        json_body(response).await["error"]
            .as_str()
            .unwrap()
            .contains("limit")
    );
}

#[tokio::test]
async fn test_hub_status_lists_clients() {
    let (app, _state) = test_app();
    let (_reader, client_id) = open_stream(&app, "?session_id=s9").await;

    let json = json_body(get(&app, "/api/hub").await).await;
    let clients = json["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["clientId"], client_id.as_str());
    assert_eq!(clients[0]["filter"]["sessionId"], "s9");
    assert_eq!(clients[0]["state"], "connected");
    assert_eq!(json["metrics"]["subscribed"], 1);
    assert_eq!(json["heartbeatIntervalMs"], Value::Null);
    assert_eq!(json["config"]["heartbeatIntervalMs"], 30_000);
    assert_eq!(json["config"]["sinkCapacity"], 64);
    assert!(json["config"].get("heartbeat_interval_ms").is_none());
}

#[tokio::test]
async fn test_subscriber_limit_returns_503() {
    let (app, state) = test_app_with(AppConfig {
        hub: HubConfig {
            max_clients: Some(1),
            ..HubConfig::default()
        },
        ..AppConfig::default()
    });
    let (_reader, _) = open_stream(&app, "").await;

    let response = get(&app, "/api/events/stream").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(state.hub.client_count(), 1);
}

#[tokio::test]
async fn test_ingestion_not_held_up_by_unread_stream() {
    let (app, state) = test_app_with(AppConfig {
        hub: HubConfig {
            sink_capacity: 1,
            push_timeout_ms: 5_000,
            ..HubConfig::default()
        },
        ..AppConfig::default()
    });
    // Opened but never read past the connected frame.
    let (_reader, client_id) = open_stream(&app, "").await;

    for n in 0..5 {
        let response = tokio::time::timeout(
            Duration::from_millis(500),
            post_event(
                &app,
                json!({"projectId": "p1", "sessionId": "s1", "kind": "custom", "payload": {"n": n}}),
            ),
        )
        .await
        .expect("ingestion must not wait on a slow subscriber");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    // The queue overflowed twice in a row, so the client is gone.
    assert!(!state.hub.registry().contains(&client_id));
    assert_eq!(state.hub.metrics().pruned, 1);
}
