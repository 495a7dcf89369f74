#[path = "common/mod.rs"]
mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use common::EnvGuard;
use once_cell::sync::Lazy;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use inkflow_proxy::{app, build_state_from_env};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

async fn start_slow_n8n(delay: Duration) -> (SocketAddr, JoinHandle<()>) {
    let slow = move |Json(_): Json<serde_json::Value>| async move {
        tokio::time::sleep(delay).await;
        Json(serde_json::json!({"ok": true}))
    };
    let router = Router::new().route("/webhook/tattoo-chat", post(slow));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

async fn spawn_app() -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = build_state_from_env().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn excess_connections_refused_at_admission() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    let (n8n_addr, n8n) = start_slow_n8n(Duration::from_millis(600)).await;
    env.set("N8N_WEBHOOK_BASE_URL", &format!("http://{}", n8n_addr));
    env.set("MAX_CONCURRENT_CONNECTIONS", "1");

    let (base, handle) = spawn_app().await;
    let client = reqwest::Client::new();

    // First request occupies the only slot while n8n is slow.
    let url = format!("{}/api/chat", base);
    let first = {
        let client = client.clone();
        let url = url.clone();
        tokio::spawn(async move {
            client
                .post(&url)
                .header("content-type", "application/json")
                .body(r#"{"chatInput":"hold the slot"}"#)
                .send()
                .await
                .unwrap()
                .status()
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Everything else is refused with an empty 503, never reaching a handler.
    for _ in 0..3 {
        let resp = client
            .post(&url)
            .header("content-type", "application/json")
            .body(r#"{"chatInput":"rejected"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.bytes().await.unwrap().is_empty());
    }

    assert_eq!(first.await.unwrap(), StatusCode::OK);

    // Slot released: the next request is admitted again.
    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body(r#"{"chatInput":"after release"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    handle.abort();
    n8n.abort();
}

#[tokio::test]
async fn health_reports_active_connections() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    env.set("N8N_WEBHOOK_BASE_URL", "http://127.0.0.1:9");

    let (base, handle) = spawn_app().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/api/health", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], serde_json::json!("healthy"));
    // The health request itself holds the one live slot.
    assert_eq!(body["active_connections"], serde_json::json!(1));
    assert_eq!(body["n8n_endpoints"].as_array().unwrap().len(), 2);
    assert!(body["uptime_seconds"].as_f64().unwrap() >= 0.0);
    assert!(body["config"]["max_file_size"].as_u64().unwrap() > 0);

    handle.abort();
}
