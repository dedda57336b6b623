use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::state::AppState;

pub const SERVICE_NAME: &str = "OneNET Proxy Server";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: DateTime<Utc>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .with_state(state)
}

/// Never touches the upstream.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        service: SERVICE_NAME,
        timestamp: Utc::now(),
    })
}

async fn index() -> Json<JsonValue> {
    Json(json!({
        "message": "OneNET API proxy is running",
        "endpoints": {
            "health": "GET /api/health",
            "connect": "POST /api/onenet/connect",
            "token": "POST /api/onenet/token",
            "sendData": "POST /api/onenet/send-data",
            "frontend": "GET /index.html"
        },
        "documentation": "https://github.com/chinamobile/OneNET"
    }))
}
