//! Authenticated access to the care portal's sensor notification API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use vigil_config::PortalConfig;

#[derive(Debug, Error)]
pub enum PortalError {
    /// Session expired or credentials rejected.  Not retried here; a new
    /// session has to be established by restarting the monitor.
    #[error("portal session not authenticated: {0}")]
    Unauthenticated(String),

    #[error("portal answered HTTP {0}")]
    Status(u16),

    #[error("portal request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("portal payload is not valid JSON: {0}")]
    Decode(String),

    #[error("portal configuration invalid: {0}")]
    Config(String),
}

/// Source of the raw sensor payload, keyed by resident id.
#[async_trait]
pub trait SensorPortal: Send + Sync {
    async fn fetch_sensor_payload(&self) -> Result<Value, PortalError>;
}

/// Cookie-carrying HTTP session against the portal.
#[derive(Debug, Clone)]
pub struct PortalSession {
    client: reqwest::Client,
    sensor_info_url: String,
}

impl PortalSession {
    /// Establish a session.
    ///
    /// Credentials, when configured, are validated against the login
    /// endpoint and any cookies it sets are kept.  A pre-obtained cookie
    /// string is seeded into the jar before that, so a session copied from a
    /// browser login works without credentials.
    pub async fn login(config: &PortalConfig) -> Result<Self, PortalError> {
        let has_credentials = !config.username.is_empty() && !config.password.is_empty();
        if !has_credentials && config.cookie.trim().is_empty() {
            return Err(PortalError::Config(
                "set PORTAL_USERNAME and PORTAL_PASSWORD or PORTAL_COOKIE".to_string(),
            ));
        }

        let base = Url::parse(&config.base_url)
            .map_err(|err| PortalError::Config(format!("invalid base_url: {err}")))?;
        let jar = Arc::new(Jar::default());
        for cookie in split_cookies(&config.cookie) {
            jar.add_cookie_str(cookie, &base);
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let referer = HeaderValue::from_str(&config.start_url())
            .map_err(|err| PortalError::Config(format!("invalid start url: {err}")))?;
        headers.insert(REFERER, referer);

        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        if has_credentials {
            let response = client
                .post(config.login_url())
                .form(&[
                    ("login", config.username.as_str()),
                    ("password", config.password.as_str()),
                ])
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PortalError::Unauthenticated(format!(
                    "credential validation returned {status}"
                )));
            }
            info!("portal credential check passed");
        }

        Ok(Self {
            client,
            sensor_info_url: config.sensor_info_url(),
        })
    }
}

#[async_trait]
impl SensorPortal for PortalSession {
    async fn fetch_sensor_payload(&self) -> Result<Value, PortalError> {
        let response = self.client.get(&self.sensor_info_url).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(PortalError::Unauthenticated("sensor info returned 401".to_string()));
        }
        if !status.is_success() {
            return Err(PortalError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let payload: Value =
            serde_json::from_str(&body).map_err(|err| PortalError::Decode(err.to_string()))?;
        debug!(bytes = body.len(), "sensor payload fetched");
        Ok(payload)
    }
}

fn split_cookies(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| pair.contains('='))
}
