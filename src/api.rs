//! Inbound API: POST /api/v1/refresh orchestrates the credential refresh and
//! the opt-in enrichment fetches.
//!
//! Caller-visible failures are (a) missing credential -> 400 and (b) refresh
//! failure -> 500, both with a generic message. Enrichment failures are
//! non-fatal: each is logged with the upstream name and dropped from the
//! response independently. Enrichment endpoints are only called when the
//! caller asked for enrichment.

use crate::config::Config;
use crate::health;
use crate::metrics;
use crate::upstream::{self, GameList, ProfileInfo};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Shared state for API and health handlers. One reqwest client for all
/// requests; last_errors feeds /healthz.
pub struct AppState {
    pub config: Config,
    pub client: Client,
    pub last_errors: Arc<RwLock<HashMap<String, String>>>,
    pub started_at: Instant,
}

/// Request body for POST /api/v1/refresh.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequestBody {
    #[serde(default)]
    pub use_cookie: String,
    #[serde(default)]
    pub include_user_info: bool,
}

/// Response body: refreshed credential, plus enrichment only when the caller
/// requested it and the corresponding fetch succeeded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponseBody {
    pub cookie: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<ProfileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_data: Option<GameList>,
}

/// Build the application router: form page, refresh API, health, metrics.
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/", get(index_handler))
        .route("/api/v1/refresh", post(refresh_handler))
        .route("/healthz", get(health::healthz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// GET / — the browser form (static, embedded at build time).
async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

/// GET /metrics — Prometheus text format; empty until metrics are initialized.
async fn metrics_handler() -> impl IntoResponse {
    let body = metrics::encode();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        body,
    )
}

fn error_body(message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message }))
}

/// POST /api/v1/refresh — validate, refresh, optionally enrich, respond.
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequestBody>,
) -> Response {
    let credential = body.use_cookie.trim();
    if credential.is_empty() {
        metrics::record_refresh_request("missing_cookie");
        return (StatusCode::BAD_REQUEST, error_body("cookie is required")).into_response();
    }

    let started = Instant::now();
    let result = upstream::refresh(&state.client, &state.config.upstream, credential).await;
    metrics::record_upstream_duration("refresh", started.elapsed().as_secs_f64());
    let refreshed = match result {
        Ok(cookie) => {
            state.last_errors.write().await.remove("refresh");
            cookie
        }
        Err(e) => {
            tracing::error!(upstream = "refresh", error = %e, "credential refresh failed");
            metrics::record_upstream_error("refresh");
            metrics::record_refresh_request("refresh_failed");
            state
                .last_errors
                .write()
                .await
                .insert("refresh".to_string(), e.to_string());
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("failed to refresh cookie"),
            )
                .into_response();
        }
    };

    // Enrichment is consent-gated: nothing is fetched unless the caller asked.
    let (user_data, game_data) = if body.include_user_info {
        fetch_enrichment(&state, &refreshed).await
    } else {
        (None, None)
    };

    metrics::record_refresh_request("ok");
    (
        StatusCode::OK,
        Json(RefreshResponseBody {
            cookie: refreshed,
            user_data,
            game_data,
        }),
    )
        .into_response()
}

/// Run one enrichment fetch, record duration and outcome. Failures are
/// non-fatal: logged with the upstream name so profile and games failures
/// stay distinguishable, then dropped.
async fn enrich<T, F>(state: &AppState, name: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::record_upstream_duration(name, started.elapsed().as_secs_f64());
    match result {
        Ok(value) => {
            state.last_errors.write().await.remove(name);
            Some(value)
        }
        Err(e) => {
            tracing::warn!(upstream = name, error = %e, "enrichment fetch failed");
            metrics::record_upstream_error(name);
            state
                .last_errors
                .write()
                .await
                .insert(name.to_string(), e.to_string());
            None
        }
    }
}

/// Fetch profile and games concurrently with the refreshed credential.
/// An endpoint with no configured URL is skipped without a warning.
async fn fetch_enrichment(
    state: &AppState,
    credential: &str,
) -> (Option<ProfileInfo>, Option<GameList>) {
    let upstream_cfg = &state.config.upstream;
    let profile_fut = async {
        if upstream_cfg.profile_url.is_some() {
            enrich(
                state,
                "profile",
                upstream::fetch_profile(&state.client, upstream_cfg, credential),
            )
            .await
        } else {
            tracing::debug!("profile_url not configured, skipping profile enrichment");
            None
        }
    };
    let games_fut = async {
        if upstream_cfg.games_url.is_some() {
            enrich(
                state,
                "games",
                upstream::fetch_games(&state.client, upstream_cfg, credential),
            )
            .await
        } else {
            tracing::debug!("games_url not configured, skipping games enrichment");
            None
        }
    };
    tokio::join!(profile_fut, games_fut)
}


#[cfg(test)]
mod tests {
    use super::test_support::app_state_with_upstream;
    use super::*;
    use crate::config::UpstreamConfig;
    use serde_json::{Value, json};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream_for(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            refresh_url: format!("{}/v2/refresh", server.uri()),
            profile_url: Some(format!("{}/v2/profile", server.uri())),
            games_url: Some(format!("{}/v2/games/list", server.uri())),
            headers: None,
            resilience: None,
        }
    }

    fn profile_record() -> Value {
        json!({
            "userSettings": { "userName": "builderman", "displayName": "Builderman", "userId": "156" },
            "userAvatar": "https://cdn.example/avatar.png",
            "userTransactions": { "Balance": 120, "Pending": 5, "Summary": 125 },
            "Collectibles": { "Limiteds": { "Rap": 990 } }
        })
    }

    /// Serve the router on an ephemeral port, return its base URL.
    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn post_refresh(base: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/refresh", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body: Value = response.json().await.unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_missing_cookie_is_400_and_no_outbound_calls() {
        let server = MockServer::start().await;
        // Zero expected requests: validation failures must not reach upstream.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let base = serve(app_state_with_upstream(upstream_for(&server))).await;

        for body in [json!({}), json!({ "useCookie": "   " })] {
            let (status, response) = post_refresh(&base, body).await;
            assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
            assert_eq!(response["error"], "cookie is required");
        }
    }

    #[tokio::test]
    async fn test_refresh_failure_is_500_and_no_enrichment_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/refresh"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/profile"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/games/list"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let base = serve(app_state_with_upstream(upstream_for(&server))).await;

        let (status, response) =
            post_refresh(&base, json!({ "useCookie": "abc", "includeUserInfo": true })).await;
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"], "failed to refresh cookie");
    }

    #[tokio::test]
    async fn test_refresh_missing_cookie_value_is_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;
        let base = serve(app_state_with_upstream(upstream_for(&server))).await;

        let (status, _) = post_refresh(&base, json!({ "useCookie": "abc" })).await;
        assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_full_scenario_returns_cookie_user_and_game_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/refresh"))
            .and(body_json(json!({ "useCookie": "abc" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cookie": "xyz" })))
            .mount(&server)
            .await;
        // Enrichment uses the refreshed credential, not the caller's.
        Mock::given(method("POST"))
            .and(path("/v2/profile"))
            .and(body_json(json!({ "useCookie": "xyz" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_record()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/games/list"))
            .and(body_json(json!({ "useCookie": "xyz" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "games": ["A", "B"] })))
            .mount(&server)
            .await;
        let base = serve(app_state_with_upstream(upstream_for(&server))).await;

        let (status, response) =
            post_refresh(&base, json!({ "useCookie": "abc", "includeUserInfo": true })).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(response["cookie"], "xyz");
        assert_eq!(response["userData"]["userSettings"]["userName"], "builderman");
        assert_eq!(response["userData"]["userTransactions"]["Balance"], 120);
        assert_eq!(response["userData"]["Collectibles"]["Limiteds"]["Rap"], 990);
        assert_eq!(response["gameData"]["games"], json!(["A", "B"]));
    }

    #[tokio::test]
    async fn test_profile_failure_keeps_games_and_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cookie": "xyz" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/profile"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/games/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "games": ["A"] })))
            .mount(&server)
            .await;
        let state = app_state_with_upstream(upstream_for(&server));
        let last_errors = state.last_errors.clone();
        let base = serve(state).await;

        let (status, response) =
            post_refresh(&base, json!({ "useCookie": "abc", "includeUserInfo": true })).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(response["cookie"], "xyz");
        assert!(response.get("userData").is_none());
        assert_eq!(response["gameData"]["games"], json!(["A"]));
        // The failure is recorded for /healthz under its own upstream name.
        let errors = last_errors.read().await;
        assert!(errors.contains_key("profile"));
        assert!(!errors.contains_key("games"));
    }

    #[tokio::test]
    async fn test_include_user_info_false_makes_no_enrichment_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cookie": "xyz" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_record()))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/games/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "games": [] })))
            .expect(0)
            .mount(&server)
            .await;
        let base = serve(app_state_with_upstream(upstream_for(&server))).await;

        let (status, response) =
            post_refresh(&base, json!({ "useCookie": "abc", "includeUserInfo": false })).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(response["cookie"], "xyz");
        assert!(response.get("userData").is_none());
        assert!(response.get("gameData").is_none());
    }

    #[tokio::test]
    async fn test_enrichment_requested_but_urls_not_configured_still_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cookie": "xyz" })))
            .mount(&server)
            .await;
        let upstream = UpstreamConfig {
            refresh_url: format!("{}/v2/refresh", server.uri()),
            profile_url: None,
            games_url: None,
            headers: None,
            resilience: None,
        };
        let base = serve(app_state_with_upstream(upstream)).await;

        let (status, response) =
            post_refresh(&base, json!({ "useCookie": "abc", "includeUserInfo": true })).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(response["cookie"], "xyz");
        assert!(response.get("userData").is_none());
        assert!(response.get("gameData").is_none());
    }

    #[tokio::test]
    async fn test_index_serves_form_page() {
        let state = super::test_support::app_state_for_tests(true, true);
        let base = serve(state).await;
        let response = reqwest::get(&base).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/html"), "got {}", content_type);
        let body = response.text().await.unwrap();
        assert!(body.contains("/api/v1/refresh"));
        assert!(body.contains("includeUserInfo"));
    }
}
