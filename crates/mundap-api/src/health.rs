use std::time::Instant;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::AppResult;
use crate::state::{AppState, AppStateInner};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn uptime_secs(state: &AppStateInner) -> u64 {
    state.started_at.elapsed().as_secs()
}

pub async fn basic() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "status": "ok",
        "service": "mundapdari",
        "timestamp": Utc::now(),
    }))
}

pub async fn live(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "uptime_secs": uptime_secs(&state),
        "timestamp": Utc::now(),
    }))
}

/// 503 until the store answers.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "timestamp": Utc::now() })),
        ),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready", "timestamp": Utc::now() })),
            )
        }
    }
}

pub async fn detailed(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let database = match state.store.ping().await {
        Ok(()) => json!({
            "status": "healthy",
            "backend": state.store.backend(),
            "latency_ms": started.elapsed().as_millis() as u64,
        }),
        Err(e) => {
            warn!("Database health check failed: {}", e);
            json!({ "status": "unhealthy", "backend": state.store.backend() })
        }
    };
    let healthy = database["status"] == "healthy";

    let queue = match state.queue.stats().await {
        Ok(stats) => json!({ "status": "healthy", "backend": state.queue.backend(), "stats": stats }),
        Err(e) => {
            warn!("Queue health check failed: {}", e);
            json!({ "status": "unhealthy", "backend": state.queue.backend() })
        }
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": VERSION,
            "uptime_secs": uptime_secs(&state),
            "database": database,
            "queue": queue,
            "timestamp": Utc::now(),
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let pairs: serde_json::Map<String, Value> = state
        .store
        .count_pairs_by_status()
        .await?
        .into_iter()
        .map(|(status, n)| (status.as_str().to_string(), json!(n)))
        .collect();

    let queue = match state.queue.stats().await {
        Ok(stats) => json!(stats),
        Err(e) => {
            warn!("Queue stats unavailable: {}", e);
            Value::Null
        }
    };

    Ok(Json(json!({
        "users": state.store.count_users().await?,
        "pairs": pairs,
        "answers": state.store.count_answers().await?,
        "uptime_secs": uptime_secs(&state),
        "queue": queue,
        "timestamp": Utc::now(),
    })))
}
