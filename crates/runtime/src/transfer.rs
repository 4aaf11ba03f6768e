//! File transfer to and from the WebDAV notification share.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use vigil_config::WebDavConfig;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The remote file does not exist.  Reported separately so a file that
    /// vanished after upload can be counted instead of treated as a crash.
    #[error("remote file {0} not found")]
    NotFound(String),

    #[error("WebDAV server answered {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("WebDAV request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("local file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), TransferError>;

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), TransferError>;
}

/// Minimal WebDAV client: `PUT` to upload, `GET` to download, basic auth.
#[derive(Debug, Clone)]
pub struct WebDavClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl WebDavClient {
    pub fn new(config: &WebDavConfig) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.hostname.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn url_for(&self, remote_path: &str) -> String {
        format!("{}/{}", self.base_url, remote_path.trim_start_matches('/'))
    }
}

fn check_status(status: StatusCode, remote_path: &str) -> Result<(), TransferError> {
    if status == StatusCode::NOT_FOUND {
        return Err(TransferError::NotFound(remote_path.to_string()));
    }
    if !status.is_success() {
        return Err(TransferError::Status {
            path: remote_path.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl FileTransfer for WebDavClient {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), TransferError> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|source| TransferError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
        let size = body.len();

        let response = self
            .client
            .put(self.url_for(remote_path))
            .basic_auth(&self.username, Some(&self.password))
            .body(body)
            .send()
            .await?;
        check_status(response.status(), remote_path)?;

        debug!(remote = remote_path, bytes = size, "upload complete");
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), TransferError> {
        let response = self
            .client
            .get(self.url_for(remote_path))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        check_status(response.status(), remote_path)?;
        let bytes = response.bytes().await?;

        let io_err = |source| TransferError::Io {
            path: local_path.to_path_buf(),
            source,
        };
        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }
        tokio::fs::write(local_path, &bytes).await.map_err(io_err)?;

        debug!(remote = remote_path, bytes = bytes.len(), "download complete");
        Ok(())
    }
}
