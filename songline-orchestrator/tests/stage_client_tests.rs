//! HttpStageClient against a stub axum server on an ephemeral port

use axum::{
    extract::Query,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use songline_orchestrator::config::{StageEndpoints, StageTimeouts};
use songline_orchestrator::services::{HttpStageClient, StageError, StageService};

async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr, timeouts: StageTimeouts) -> HttpStageClient {
    let base = format!("http://{}", addr);
    HttpStageClient::new(
        StageEndpoints {
            identify_url: base.clone(),
            separate_url: base.clone(),
            transcribe_url: base.clone(),
            classify_url: base,
        },
        timeouts,
    )
    .unwrap()
}

fn healthy_stub() -> Router {
    Router::new()
        .route(
            "/identify",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["filename"], "song.wav");
                Json(json!({
                    "fingerprint": "AQADtEqSKEmS",
                    "duration": 212,
                    "matches": [
                        {"title": "Teardrop", "artist": "Massive Attack"},
                        {"title": "Teardrop (Live)", "artist": "Massive Attack"}
                    ]
                }))
            }),
        )
        .route(
            "/convert",
            post(|Json(body): Json<Value>| async move {
                let name = body["filename"].as_str().unwrap_or_default().replace(".mp3", ".wav");
                Json(json!({ "filename": name }))
            }),
        )
        .route(
            "/separate",
            post(|| async { Json(json!({"status": "ok", "message": "done"})) }),
        )
        .route(
            "/transcribe",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(json!({ "lyrics": format!("lyrics of {}", params["stem_name"]) }))
            }),
        )
        .route(
            "/classify",
            post(|Json(body): Json<Value>| async move {
                assert!(body["lyrics"].is_string());
                Json(json!({"classification": "AI", "accuracy": 0.91}))
            }),
        )
}

#[tokio::test]
async fn test_all_stages_against_healthy_services() {
    let addr = spawn_stub(healthy_stub()).await;
    let client = client_for(addr, StageTimeouts::default());

    let identification = client.identify("song.wav").await.unwrap();
    assert_eq!(identification.fingerprint, "AQADtEqSKEmS");
    assert_eq!(identification.duration_seconds, 212.0);
    assert_eq!(identification.best_match().title, "Teardrop");

    assert_eq!(client.convert("song.mp3").await.unwrap(), "song.wav");
    client.separate("song.wav").await.unwrap();

    let transcription = client.transcribe("song.wav").await.unwrap();
    assert_eq!(transcription.lyrics, "lyrics of song.wav");

    let classification = client.classify("some words").await.unwrap();
    assert_eq!(classification.label, "AI");
    assert_eq!(classification.confidence, 0.91);
}

#[tokio::test]
async fn test_identify_with_no_matches_falls_back_to_unknown() {
    let router = Router::new().route(
        "/identify",
        post(|| async { Json(json!({"fingerprint": "AQAD", "duration": 10.5, "matches": []})) }),
    );
    let client = client_for(spawn_stub(router).await, StageTimeouts::default());

    let identification = client.identify("x.wav").await.unwrap();
    assert!(identification.candidate_matches.is_empty());
    assert_eq!(identification.best_match().title, "unknown");
    assert_eq!(identification.best_match().artist, "unknown");
}

#[tokio::test]
async fn test_server_error_is_status_fault() {
    let router = Router::new().route(
        "/classify",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
    );
    let client = client_for(spawn_stub(router).await, StageTimeouts::default());

    match client.classify("words").await {
        Err(StageError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "model loading");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_separate_error_status_is_rejected() {
    let router = Router::new().route(
        "/separate",
        post(|| async { Json(json!({"status": "error", "message": "demucs crashed"})) }),
    );
    let client = client_for(spawn_stub(router).await, StageTimeouts::default());

    match client.separate("a.wav").await {
        Err(StageError::Rejected(message)) => assert_eq!(message, "demucs crashed"),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_payloads() {
    let router = Router::new()
        .route(
            "/classify",
            post(|| async { Json(json!({"classification": "AI", "accuracy": 1.7})) }),
        )
        .route(
            "/transcribe",
            get(|| async { Json(json!({"text": "wrong field"})) }),
        );
    let client = client_for(spawn_stub(router).await, StageTimeouts::default());

    assert!(matches!(
        client.classify("words").await,
        Err(StageError::Malformed(_))
    ));
    assert!(matches!(
        client.transcribe("a.wav").await,
        Err(StageError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let router = Router::new().route(
        "/classify",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({"classification": "AI", "accuracy": 0.5}))
        }),
    );
    let timeouts = StageTimeouts {
        classify_secs: 1,
        ..Default::default()
    };
    let client = client_for(spawn_stub(router).await, timeouts);

    assert!(matches!(
        client.classify("words").await,
        Err(StageError::Timeout)
    ));
}

#[tokio::test]
async fn test_unreachable_service_is_transport_fault() {
    // Bind then drop to get a port with nothing listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(addr, StageTimeouts::default());
    let err = client.identify("a.wav").await.unwrap_err();
    assert!(matches!(err, StageError::Transport(_)));
    assert_eq!(err.summary(), "service unavailable");
}
