// Engine REST client
//
// Thin wrapper over `reqwest::Client` for the engine's control endpoints.
// Only the calls the coordination layer needs are modelled: a liveness
// probe and the "load this configuration file" switch.

use std::time::Duration;

use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Response of `GET /version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersion {
    pub version: String,
    /// `true` for the "meta" engine flavour.
    #[serde(default)]
    pub meta: bool,
}

/// Error body the engine returns on failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for the engine's REST API.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base_url: Url,
    secret: Option<SecretString>,
}

impl EngineClient {
    /// Build a client with its own `reqwest::Client`.
    pub fn new(base_url: Url, secret: Option<SecretString>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vantage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base_url, secret))
    }

    /// Build a client around a pre-configured `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, secret: Option<SecretString>) -> Self {
        Self {
            http,
            base_url,
            secret,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /version` -- doubles as a reachability and auth check.
    pub async fn version(&self) -> Result<EngineVersion, Error> {
        let url = self.base_url.join("version")?;
        debug!("GET {}", url);

        let resp = self.authorize(self.http.get(url)).send().await?;
        let resp = check(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// `PUT /configs?force=<force>` -- load the configuration file at `path`.
    pub async fn reload_config(&self, path: &str, force: bool) -> Result<(), Error> {
        let mut url = self.base_url.join("configs")?;
        url.query_pairs_mut()
            .append_pair("force", if force { "true" } else { "false" });
        debug!("PUT {}", url);

        let resp = self
            .authorize(self.http.put(url))
            .json(&serde_json::json!({ "path": path }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.secret {
            Some(ref secret) => req.bearer_auth(secret.expose_secret()),
            None => req,
        }
    }
}

/// Map non-success responses into [`Error`].
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}
