//! Upstream operations: refresh a session credential, fetch profile and
//! recently-played-games enrichment. Each is one POST with the credential in
//! the JSON body; the credential itself is opaque and forwarded verbatim.

use crate::client::post_json;
use crate::config::UpstreamConfig;
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// Request body shared by all three upstream endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialBody<'a> {
    use_cookie: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    cookie: Option<String>,
}

/// Profile record as the platform returns it. Field casing is the platform's
/// own (mixed camelCase and PascalCase); nothing is normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub user_settings: UserSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
    pub user_transactions: Transactions,
    #[serde(
        rename = "Collectibles",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub collectibles: Option<Collectibles>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub user_name: String,
    pub display_name: String,
    /// String or number depending on the platform.
    pub user_id: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transactions {
    pub balance: i64,
    pub pending: i64,
    pub summary: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Collectibles {
    pub limiteds: Limiteds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Limiteds {
    pub rap: i64,
}

/// Ordered list of recently played game names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameList {
    pub games: Vec<String>,
}

/// POST the credential to an upstream URL and parse the JSON response.
/// Non-2xx responses carry the status and the first line of the body text.
async fn post_credential<T: DeserializeOwned>(
    client: &Client,
    upstream: &UpstreamConfig,
    url: &str,
    credential: &str,
    what: &str,
) -> anyhow::Result<T> {
    let body = CredentialBody {
        use_cookie: credential,
    };
    let response = post_json(client, upstream, url, &body)?
        .send()
        .await
        .with_context(|| format!("{} request", what))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "{} failed: {} {}",
            what,
            status.as_u16(),
            text.lines().next().unwrap_or("").trim()
        );
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("{} response body", what))
}

/// Exchange the credential for a refreshed one. A 2xx response with a missing
/// or empty `cookie` field is still a failure.
pub async fn refresh(
    client: &Client,
    upstream: &UpstreamConfig,
    credential: &str,
) -> anyhow::Result<String> {
    let parsed: RefreshResponse = post_credential(
        client,
        upstream,
        &upstream.refresh_url,
        credential,
        "refresh",
    )
    .await?;
    match parsed.cookie {
        Some(cookie) if !cookie.is_empty() => Ok(cookie),
        _ => anyhow::bail!("refresh response missing cookie"),
    }
}

/// Fetch the profile record with the refreshed credential.
/// Requires `upstream.profile_url` to be configured.
pub async fn fetch_profile(
    client: &Client,
    upstream: &UpstreamConfig,
    credential: &str,
) -> anyhow::Result<ProfileInfo> {
    let url = upstream
        .profile_url
        .as_deref()
        .context("profile_url not configured")?;
    post_credential(client, upstream, url, credential, "profile").await
}

/// Fetch the recently-played-games list with the refreshed credential.
/// Requires `upstream.games_url` to be configured.
pub async fn fetch_games(
    client: &Client,
    upstream: &UpstreamConfig,
    credential: &str,
) -> anyhow::Result<GameList> {
    let url = upstream
        .games_url
        .as_deref()
        .context("games_url not configured")?;
    post_credential(client, upstream, url, credential, "games").await
}
