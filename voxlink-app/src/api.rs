//! REST endpoints next to the voice socket: health, token issue, batch upload.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

const HEALTH_PATH: &str = "/api/v1/health";
const TOKEN_PATH: &str = "/api/v1/auth/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct ApiClient {
    http: Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base: base.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    /// `true` when the server answers 2xx with a body mentioning `healthy`.
    pub fn health_check(&self) -> bool {
        let response = match self.http.get(self.url(HEALTH_PATH)).send() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "health check request failed");
                return false;
            }
        };
        let status = response.status();
        let body = response.text().unwrap_or_default();
        let healthy = status.is_success() && body.contains("healthy");
        debug!(%status, healthy, "health check");
        healthy
    }

    /// Exchange an API key pair for a bearer token.
    pub fn fetch_token(&self, api_key: &str, api_secret: &str) -> Result<String> {
        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .header("X-API-Key", api_key)
            .header("X-API-Secret", api_secret)
            .send()
            .context("token request failed")?;
        if !response.status().is_success() {
            bail!("token request returned {}", response.status());
        }
        let payload: TokenResponse = response.json().context("token response is not JSON")?;
        if payload.token.trim().is_empty() {
            return Err(anyhow!("server issued an empty token"));
        }
        info!("API token acquired");
        Ok(payload.token)
    }

    /// Upload a finished recording in one request. Returns the response body.
    pub fn post_audio(&self, path: &str, token: &str, wav: Vec<u8>) -> Result<String> {
        let bytes = wav.len();
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .header("Content-Type", "audio/wav")
            .body(wav)
            .send()
            .context("audio upload failed")?;
        let status = response.status();
        let body = response.text().context("reading upload response")?;
        if !status.is_success() {
            bail!("audio upload returned {status}: {body}");
        }
        info!(bytes, %status, "recording uploaded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let api = ApiClient::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(api.url(HEALTH_PATH), "http://127.0.0.1:8080/api/v1/health");
    }

    #[test]
    fn token_payload_parses() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"token":"abc.def"}"#).unwrap();
        assert_eq!(parsed.token, "abc.def");
    }

    #[test]
    fn unreachable_server_is_unhealthy() {
        // Port 9 (discard) is closed on test hosts.
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(!api.health_check());
    }
}
