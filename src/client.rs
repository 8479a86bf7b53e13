//! HTTP client wrapper: build reqwest client with timeouts and extra headers
//! from config. One client is built at startup and shared across requests.

use crate::config::{ResilienceConfig, UpstreamConfig};
use anyhow::Context;
use reqwest::Client;
use reqwest::header::{HeaderName, HeaderValue};
use std::time::Duration;

/// Build a reqwest client with timeouts from resilience config.
pub fn build_client(resilience: Option<&ResilienceConfig>) -> anyhow::Result<Client> {
    let timeout_secs = resilience.map(|r| r.timeout_secs).unwrap_or(30);
    let timeout = Duration::from_secs(timeout_secs);
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(std::cmp::min(10, timeout_secs)))
        .timeout(timeout)
        .build()
        .context("build reqwest client")?;
    Ok(client)
}

/// Build a JSON POST to the given URL with extra headers from upstream config.
pub fn post_json<T: serde::Serialize>(
    client: &Client,
    upstream: &UpstreamConfig,
    url: &str,
    body: &T,
) -> anyhow::Result<reqwest::RequestBuilder> {
    let mut req = client.post(url).json(body);
    if let Some(headers) = &upstream.headers {
        for (k, v) in headers {
            let name = HeaderName::try_from(k.as_str())
                .with_context(|| format!("invalid header name: {:?}", k))?;
            let value = HeaderValue::try_from(v.as_str())
                .with_context(|| format!("invalid header value for {}: {:?}", k, v))?;
            req = req.header(name, value);
        }
    }
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn upstream_with_headers(headers: HashMap<String, String>) -> UpstreamConfig {
        UpstreamConfig {
            refresh_url: "https://upstream.example/v2/refresh".to_string(),
            profile_url: None,
            games_url: None,
            headers: Some(headers),
            resilience: None,
        }
    }

    #[test]
    fn test_post_json_applies_config_headers() {
        let client = build_client(None).unwrap();
        let mut headers = HashMap::new();
        headers.insert("Origin".to_string(), "https://example.test/".to_string());
        let upstream = upstream_with_headers(headers);
        let req = post_json(
            &client,
            &upstream,
            "https://upstream.example/v2/refresh",
            &serde_json::json!({ "useCookie": "abc" }),
        )
        .unwrap()
        .build()
        .unwrap();
        assert_eq!(
            req.headers().get("Origin").and_then(|v| v.to_str().ok()),
            Some("https://example.test/")
        );
        assert_eq!(
            req.headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn test_post_json_rejects_invalid_header_name() {
        let client = build_client(None).unwrap();
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        let upstream = upstream_with_headers(headers);
        let err = post_json(
            &client,
            &upstream,
            "https://upstream.example/v2/refresh",
            &serde_json::json!({}),
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("invalid header name"), "got: {}", err);
    }
}
