mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use common::TestEnv;
use restreamer::repositories::VideoRepository;
use restreamer::services::StreamService;
use restreamer::web::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

// Helper function to send requests to the app
async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request_builder = Request::builder().method(method).uri(uri);

    let request = if let Some(body) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

fn app(env: &TestEnv) -> Router {
    create_router(AppState {
        streams: Arc::new(StreamService::new(
            env.engine.clone(),
            "rtmp://live.example/app".to_string(),
        )),
        videos: Arc::new(VideoRepository::new(env.database.pool())),
        supervisor: env.engine.supervisor().clone(),
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let env = TestEnv::new(Utc::now()).await;
    let (status, response) = send_request(&app(&env), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["status"], "ok");
    assert_eq!(response["data"]["tracked_processes"], 0);
}

#[tokio::test]
async fn test_list_videos() {
    let env = TestEnv::new(Utc::now()).await;
    let (status, response) = send_request(&app(&env), Method::GET, "/api/videos", None).await;

    assert_eq!(status, StatusCode::OK);
    let videos = response["data"].as_array().unwrap();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0]["id"], env.video.id.to_string());
    assert_eq!(videos[0]["source"], "local");
}

#[tokio::test]
async fn test_permanent_start_and_update() {
    let env = TestEnv::new(Utc::now()).await;
    let app = app(&env);

    let (status, created) = send_request(
        &app,
        Method::POST,
        "/api/streams",
        Some(json!({
            "title": "Evening loop",
            "destination_key": "evening",
            "video_id": env.video.id,
            "schedule": { "type": "daily", "start_time": "20:00", "duration_minutes": 120 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["state"], "scheduled");
    assert!(created["data"]["next_start"].is_string());
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, started) = send_request(
        &app,
        Method::POST,
        &format!("/api/streams/{}/start", id),
        Some(json!({ "permanent": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["data"]["schedule"]["type"], "manual");
    assert_eq!(started["data"]["state"], "live");
    assert_eq!(started["data"]["manual_override"], false);

    // Moving a live stream to another key is refused
    let (status, _) = send_request(
        &app,
        Method::PUT,
        &format!("/api/streams/{}", id),
        Some(json!({
            "title": "Evening loop",
            "destination_key": "elsewhere",
            "video_id": env.video.id,
            "schedule": { "type": "manual" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listed) = send_request(&app, Method::GET, "/api/streams", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(env.launcher.launches(), vec!["rtmp://live.example/app/evening".to_string()]);
}

#[tokio::test]
async fn test_unknown_stream_is_404() {
    let env = TestEnv::new(Utc::now()).await;
    let app = app(&env);
    let missing = uuid::Uuid::new_v4();

    for (method, uri) in [
        (Method::GET, format!("/api/streams/{}", missing)),
        (Method::POST, format!("/api/streams/{}/start", missing)),
        (Method::POST, format!("/api/streams/{}/stop", missing)),
        (Method::DELETE, format!("/api/streams/{}", missing)),
    ] {
        let (status, body) = send_request(&app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["success"], false);
    }
}
