//! Health endpoint: detailed JSON for /healthz.
//! Per-upstream status, last_error, uptime, version.
//!
//! An upstream is "degraded" while its most recent call failed; the entry
//! recovers (last_error cleared) on the next successful call.

use crate::api::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-upstream status in the health response.
#[derive(Clone, Debug, Serialize)]
pub struct UpstreamStatusDto {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Health body: version, uptime, per-upstream status.
#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub version: String,
    pub uptime_secs: f64,
    pub upstreams: HashMap<String, UpstreamStatusDto>,
}

fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Build health JSON body. One entry per configured upstream endpoint
/// (refresh always; profile/games only when their URL is set).
pub async fn build_health_body(state: &AppState) -> HealthBody {
    let uptime_secs = state.started_at.elapsed().as_secs_f64();
    let errors = state.last_errors.read().await;
    let mut upstreams = HashMap::new();
    let mut names = vec!["refresh"];
    if state.config.upstream.profile_url.is_some() {
        names.push("profile");
    }
    if state.config.upstream.games_url.is_some() {
        names.push("games");
    }
    for name in names {
        let last_error = errors.get(name).cloned();
        let status = if last_error.is_some() {
            "degraded"
        } else {
            "ok"
        };
        upstreams.insert(
            name.to_string(),
            UpstreamStatusDto {
                status: status.to_string(),
                last_error,
            },
        );
    }
    HealthBody {
        version: version(),
        uptime_secs,
        upstreams,
    }
}

/// Handler for GET /healthz: 200 + detailed JSON.
pub async fn healthz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = build_health_body(state.as_ref()).await;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        axum::Json(body),
    )
}
