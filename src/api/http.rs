//! reqwest-backed [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::transport::Transport;
use crate::transfer::chunk::upload_checksum;
use crate::error::{MegaError, Result};

/// Default API endpoint.
pub const API_URL: &str = "https://g.api.mega.co.nz/cs";

/// HTTP transport for MEGA servers, optionally through a proxy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_url: String,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Route all traffic through `proxy` (e.g. `http://proxy:8080` or `socks5://proxy:1080`).
    pub fn with_proxy(proxy: &str) -> Result<Self> {
        Self::build(Some(proxy))
    }

    fn build(proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .user_agent(concat!("megacore/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| MegaError::InvalidArgument(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| MegaError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: API_URL.to_string(),
        })
    }

    /// Point at a different API endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn check_status(status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 509 {
            Err(MegaError::RateLimited)
        } else if status.is_server_error() {
            Err(MegaError::Network(format!("server returned {}", status)))
        } else {
            Err(MegaError::Http(status.as_u16()))
        }
    }
}

fn network(e: reqwest::Error) -> MegaError {
    MegaError::Network(e.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_command(&self, query: &str, body: String) -> Result<String> {
        let url = format!("{}?{}", self.api_url, query);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(network)?;
        Self::check_status(response.status())?;
        response.text().await.map_err(network)
    }

    async fn upload_chunk(&self, upload_url: &str, offset: u64, data: Bytes) -> Result<String> {
        let url = format!("{}/{}?c={}", upload_url, offset, upload_checksum(&data));
        debug!(offset, bytes = data.len(), "uploading chunk");
        let response = self
            .client
            .post(&url)
            .body(data)
            .send()
            .await
            .map_err(network)?;
        Self::check_status(response.status())?;
        response.text().await.map_err(network)
    }

    async fn download_range(&self, download_url: &str, start: u64, end: u64) -> Result<Bytes> {
        if end <= start {
            return Ok(Bytes::new());
        }
        let url = format!("{}/{}-{}", download_url, start, end - 1);
        let response = self.client.get(&url).send().await.map_err(network)?;
        Self::check_status(response.status())?;
        response.bytes().await.map_err(network)
    }

    async fn upload_file_attribute(&self, upload_url: &str, data: Bytes) -> Result<Bytes> {
        let response = self
            .client
            .post(upload_url)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(network)?;
        Self::check_status(response.status())?;
        response.bytes().await.map_err(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_creation() {
        assert!(HttpTransport::with_proxy("http://127.0.0.1:8080").is_ok());
        assert!(matches!(
            HttpTransport::with_proxy(":::::::"),
            Err(MegaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(HttpTransport::check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            HttpTransport::check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(MegaError::RateLimited)
        ));
        assert!(matches!(
            HttpTransport::check_status(StatusCode::BAD_GATEWAY),
            Err(MegaError::Network(_))
        ));
        assert!(matches!(
            HttpTransport::check_status(StatusCode::FORBIDDEN),
            Err(MegaError::Http(403))
        ));
    }
}
