//! A small HTTP sidecar used for integration tests and local demos.
//!
//! Listens on `127.0.0.1:$PORT` and serves the same API shape as the bundled
//! web sidecar. Behaviour knobs, all optional:
//!
//! - `STUB_BIND_DELAY_MS`: wait before binding the port
//! - `STUB_HEALTH_FAIL_FIRST`: answer the first N health checks with 503
//! - `STUB_NEVER_READY`: always answer health checks with 503
//! - `STUB_EXIT_AFTER_MS`: exit with status 3 after this long
//! - `STUB_IGNORE_TERM`: keep running on SIGTERM

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct Stub {
    health_hits: Arc<AtomicU32>,
    fail_first: u32,
    never_ready: bool,
}

fn env_u64(key: &str) -> anyhow::Result<Option<u64>> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be a number")),
        _ => Ok(None),
    }
}

fn env_flag(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1") | Ok("true"))
}

async fn health(State(stub): State<Stub>) -> impl IntoResponse {
    let hit = stub.health_hits.fetch_add(1, Ordering::SeqCst);
    if stub.never_ready || hit < stub.fail_first {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "starting" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "service": "Stub Sidecar Server",
        })),
    )
}

async fn data() -> Json<serde_json::Value> {
    let items = [
        (1, "Supervisor", "Owns the sidecar process"),
        (2, "Bridge", "Forwards host calls"),
        (3, "Sidecar", "Serves the API"),
    ];
    let data: Vec<_> = items
        .iter()
        .map(|(id, title, description)| {
            json!({ "id": id, "title": title, "description": description })
        })
        .collect();
    Json(json!({ "total": data.len(), "data": data }))
}

#[derive(Deserialize)]
struct GreetRequest {
    name: Option<String>,
}

async fn greet(body: Result<Json<GreetRequest>, JsonRejection>) -> impl IntoResponse {
    match body.ok().and_then(|Json(req)| req.name).filter(|n| !n.is_empty()) {
        Some(name) => (
            StatusCode::OK,
            Json(json!({
                "message": format!("Hello from the stub sidecar, {name}!"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Name is required" })),
        ),
    }
}

async fn echo(method: Method, body: String) -> Json<serde_json::Value> {
    Json(json!({ "method": method.as_str(), "body": body }))
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {code}"))
}

#[derive(Deserialize)]
struct SlowQuery {
    ms: Option<u64>,
}

async fn slow(Query(query): Query<SlowQuery>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(query.ms.unwrap_or(5_000))).await;
    "finally"
}

async fn shutdown_signal(ignore_term: bool) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        if let Ok(mut term) = signal(SignalKind::terminate()) {
            loop {
                tokio::select! {
                    _ = term.recv() => {
                        if ignore_term {
                            tracing::info!("Ignoring SIGTERM");
                            continue;
                        }
                        tracing::info!("SIGTERM received, shutting down");
                        return;
                    }
                    _ = tokio::signal::ctrl_c() => return,
                }
            }
        }
    }
    #[cfg(not(unix))]
    let _ = ignore_term;
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_target(false)
        .init();

    let port: u16 = std::env::var("PORT")
        .context("PORT is not set")?
        .parse()
        .context("PORT must be a port number")?;

    if let Some(ms) = env_u64("STUB_EXIT_AFTER_MS")? {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            tracing::warn!("Exiting on purpose after {}ms", ms);
            std::process::exit(3);
        });
    }

    if let Some(ms) = env_u64("STUB_BIND_DELAY_MS")? {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let stub = Stub {
        health_hits: Arc::new(AtomicU32::new(0)),
        fail_first: env_u64("STUB_HEALTH_FAIL_FIRST")?.unwrap_or(0) as u32,
        never_ready: env_flag("STUB_NEVER_READY"),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/data", get(data))
        .route("/api/greet", post(greet))
        .route("/api/echo", any(echo))
        .route("/api/status/{code}", get(status))
        .route("/api/slow", get(slow))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?;
    tracing::info!("stub-sidecar listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(env_flag("STUB_IGNORE_TERM")))
        .await?;
    Ok(())
}
